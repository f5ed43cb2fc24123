//! Static route definitions.
//!
//! The compile-time route DSL is out of scope; its runtime output is this
//! table of definitions, handed to the router at construction. `screen`
//! names an entry in the screen registry; `screen_session` partitions routes
//! into navigation boundaries that cannot be crossed at runtime.

use serde::{Deserialize, Serialize};

/// One entry of the route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDef {
    /// Stable identity used in intents and the nav VM.
    pub name: String,
    /// Path pattern, unique across the table.
    pub path: String,
    /// Stable short key, unique across the table.
    pub key: String,
    /// Screen registry id this route mounts.
    pub screen: String,
    /// Optional action qualifier surfaced in the nav VM.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Routing boundary; cross-boundary navigation is rejected.
    pub screen_session: String,
}

impl RouteDef {
    /// Create a route definition without an action qualifier.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        key: impl Into<String>,
        screen: impl Into<String>,
        screen_session: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            key: key.into(),
            screen: screen.into(),
            action: None,
            screen_session: screen_session.into(),
        }
    }

    /// Attach an action qualifier.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let route = RouteDef::new("clock", "/clock", "c", "clock_screen", "main")
            .with_action("show");
        assert_eq!(route.name, "clock");
        assert_eq!(route.path, "/clock");
        assert_eq!(route.key, "c");
        assert_eq!(route.screen, "clock_screen");
        assert_eq!(route.action.as_deref(), Some("show"));
        assert_eq!(route.screen_session, "main");
    }

    #[test]
    fn serde_omits_absent_action() {
        let route = RouteDef::new("clock", "/clock", "c", "clock_screen", "main");
        let encoded = serde_json::to_string(&route).expect("encode route");
        assert!(!encoded.contains("action"));
        let decoded: RouteDef = serde_json::from_str(&encoded).expect("decode route");
        assert_eq!(decoded, route);
    }
}
