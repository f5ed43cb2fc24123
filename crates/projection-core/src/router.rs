//! Route table and navigation stack.
//!
//! The route table is the runtime output of the route DSL: a static list of
//! definitions validated at construction (non-empty, unique names, paths,
//! and keys). The nav stack records navigation history; the top entry is the
//! current screen. Routes are partitioned into screen-session boundaries and
//! navigation never crosses one.

use std::collections::{HashMap, HashSet};

use projection_error::{ProjectionError, Result};
use projection_types::RouteDef;
use serde_json::{json, Map, Value};

/// One nav stack entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NavEntry {
    pub name: String,
    pub params: Value,
    pub action: Option<String>,
}

impl NavEntry {
    fn to_vm(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("name".to_owned(), Value::String(self.name.clone()));
        entry.insert("params".to_owned(), self.params.clone());
        entry.insert(
            "action".to_owned(),
            self.action.clone().map_or(Value::Null, Value::String),
        );
        Value::Object(entry)
    }
}

/// Non-empty navigation stack. The top of the stack is the current screen
/// and lives at the tail of the vector (O(1) push/pop).
#[derive(Debug, Clone, PartialEq)]
pub struct NavState {
    stack: Vec<NavEntry>,
}

impl NavState {
    /// Current (top) entry.
    #[must_use]
    pub fn current(&self) -> &NavEntry {
        self.stack.last().expect("nav stack is never empty")
    }

    /// Stack depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Entries from oldest to newest.
    #[must_use]
    pub fn entries(&self) -> &[NavEntry] {
        &self.stack
    }

    /// VM presentation: `{stack: oldest→newest, current: top}`.
    #[must_use]
    pub fn to_vm(&self) -> Value {
        json!({
            "stack": self.stack.iter().map(NavEntry::to_vm).collect::<Vec<_>>(),
            "current": self.current().to_vm(),
        })
    }
}

/// Route lookup plus nav stack operations.
#[derive(Debug, Clone)]
pub struct Router {
    routes: Vec<RouteDef>,
    index: HashMap<String, usize>,
}

impl Router {
    /// Build a router from the route table. The first route is the default.
    pub fn new(routes: Vec<RouteDef>) -> Result<Self> {
        if routes.is_empty() {
            return Err(ProjectionError::EmptyRouteTable);
        }
        let mut index = HashMap::with_capacity(routes.len());
        let mut paths = HashSet::with_capacity(routes.len());
        let mut keys = HashSet::with_capacity(routes.len());
        for (pos, route) in routes.iter().enumerate() {
            if index.insert(route.name.clone(), pos).is_some() {
                return Err(ProjectionError::DuplicateRoute {
                    field: "name",
                    value: route.name.clone(),
                });
            }
            if !paths.insert(route.path.clone()) {
                return Err(ProjectionError::DuplicateRoute {
                    field: "path",
                    value: route.path.clone(),
                });
            }
            if !keys.insert(route.key.clone()) {
                return Err(ProjectionError::DuplicateRoute {
                    field: "key",
                    value: route.key.clone(),
                });
            }
        }
        Ok(Self { routes, index })
    }

    /// Name of the default (first) route.
    #[must_use]
    pub fn default_route_name(&self) -> &str {
        &self.routes[0].name
    }

    /// All route definitions in table order.
    #[must_use]
    pub fn route_defs(&self) -> &[RouteDef] {
        &self.routes
    }

    /// Look up a route by name.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&RouteDef> {
        self.index.get(name).map(|&pos| &self.routes[pos])
    }

    fn resolve_required(&self, name: &str) -> Result<&RouteDef> {
        self.resolve(name).ok_or_else(|| ProjectionError::UnknownRoute {
            name: name.to_owned(),
        })
    }

    /// Seed a nav stack with a single entry.
    pub fn initial_nav(&self, name: &str, params: Value) -> Result<NavState> {
        let route = self.resolve_required(name)?;
        Ok(NavState {
            stack: vec![NavEntry {
                name: route.name.clone(),
                params,
                action: route.action.clone(),
            }],
        })
    }

    /// Definition of the current (top) entry's route.
    pub fn current_route<'a>(&'a self, nav: &NavState) -> Result<&'a RouteDef> {
        self.resolve_required(&nav.current().name)
    }

    /// Whether navigating to `to_name` would cross a screen-session boundary.
    pub fn screen_session_transition(&self, nav: &NavState, to_name: &str) -> Result<bool> {
        let from = self.current_route(nav)?;
        let to = self.resolve_required(to_name)?;
        Ok(from.screen_session != to.screen_session)
    }

    /// Push a new entry. Rejects unknown targets and boundary crossings
    /// without touching the stack.
    pub fn navigate<'a>(
        &'a self,
        nav: &mut NavState,
        name: &str,
        params: Value,
    ) -> Result<&'a RouteDef> {
        let from = self.current_route(nav)?;
        let to = self.resolve_required(name)?;
        if from.screen_session != to.screen_session {
            return Err(ProjectionError::BoundaryViolation {
                from: from.screen_session.clone(),
                to: to.screen_session.clone(),
            });
        }
        nav.stack.push(NavEntry {
            name: to.name.clone(),
            params,
            action: to.action.clone(),
        });
        Ok(to)
    }

    /// Pop the top entry; fails when only one entry remains.
    pub fn back<'a>(&'a self, nav: &mut NavState) -> Result<&'a RouteDef> {
        if nav.stack.len() <= 1 {
            return Err(ProjectionError::NavUnderflow);
        }
        nav.stack.pop();
        self.current_route(nav)
    }

    /// Merge a params patch into the top entry without pushing.
    pub fn patch(&self, nav: &mut NavState, params_patch: &Value) {
        let top = nav.stack.last_mut().expect("nav stack is never empty");
        match (top.params.as_object_mut(), params_patch.as_object()) {
            (Some(current), Some(patch)) => {
                for (key, value) in patch {
                    current.insert(key.clone(), value.clone());
                }
            }
            _ => top.params = params_patch.clone(),
        }
    }
}
