//! JSON Pointer construction and parsing (RFC 6901).
//!
//! Pointers address nodes of the view-model tree in patch ops. Token
//! escaping follows the RFC: `~` encodes as `~0`, `/` as `~1`, and the
//! empty string denotes the document root. Op builders validate their path
//! by round-tripping through [`parse_pointer`]; a malformed path is a
//! contract breach, not a recoverable condition.

use projection_error::{ProjectionError, Result};
use projection_types::PatchOp;
use serde_json::Value;

/// Escape one pointer token.
#[must_use]
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Unescape one pointer token.
///
/// Rejects a trailing bare `~` and any `~X` where X is not `0` or `1`.
pub fn unescape_token(token: &str) -> Result<String> {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(ch) = chars.next() {
        if ch != '~' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => {
                return Err(ProjectionError::InvalidEscape {
                    token: token.to_owned(),
                });
            }
        }
    }
    Ok(out)
}

/// Join tokens into a pointer string, escaping each token.
///
/// An empty token list yields the root pointer `""`.
#[must_use]
pub fn pointer<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for token in tokens {
        out.push('/');
        out.push_str(&escape_token(token.as_ref()));
    }
    out
}

/// Parse a pointer string back into its token list.
pub fn parse_pointer(raw: &str) -> Result<Vec<String>> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = raw.strip_prefix('/') else {
        return Err(ProjectionError::InvalidPointer {
            pointer: raw.to_owned(),
        });
    };
    rest.split('/').map(unescape_token).collect()
}

/// Build a validated `add` op.
pub fn add(path: impl Into<String>, value: Value) -> Result<PatchOp> {
    let path = path.into();
    parse_pointer(&path)?;
    Ok(PatchOp::Add { path, value })
}

/// Build a validated `replace` op.
pub fn replace(path: impl Into<String>, value: Value) -> Result<PatchOp> {
    let path = path.into();
    parse_pointer(&path)?;
    Ok(PatchOp::Replace { path, value })
}

/// Build a validated `remove` op.
pub fn remove(path: impl Into<String>) -> Result<PatchOp> {
    let path = path.into();
    parse_pointer(&path)?;
    Ok(PatchOp::Remove { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn escapes_tilde_before_slash() {
        assert_eq!(escape_token("a~/b"), "a~0~1b");
        assert_eq!(escape_token("plain"), "plain");
    }

    #[test]
    fn joins_tokens_with_escapes() {
        assert_eq!(pointer(["devices", "by_id", "dev-250"]), "/devices/by_id/dev-250");
        assert_eq!(pointer(["a/b", "c~d"]), "/a~1b/c~0d");
        assert_eq!(pointer(Vec::<String>::new()), "");
    }

    #[test]
    fn parses_root_and_single_empty_token() {
        assert_eq!(parse_pointer("").unwrap(), Vec::<String>::new());
        assert_eq!(parse_pointer("/").unwrap(), vec![String::new()]);
    }

    #[test]
    fn rejects_missing_leading_slash() {
        let err = parse_pointer("devices/by_id").unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidPointer { .. }));
    }

    #[test]
    fn rejects_bad_escapes() {
        assert!(matches!(
            parse_pointer("/a~").unwrap_err(),
            ProjectionError::InvalidEscape { .. }
        ));
        assert!(matches!(
            parse_pointer("/a~2b").unwrap_err(),
            ProjectionError::InvalidEscape { .. }
        ));
    }

    #[test]
    fn op_builders_validate_paths() {
        assert!(add("/ok", json!(1)).is_ok());
        assert!(replace("", json!(1)).is_ok());
        assert!(matches!(
            remove("no-slash").unwrap_err(),
            ProjectionError::InvalidPointer { .. }
        ));
        assert!(matches!(
            add("/bad~escape", json!(1)).unwrap_err(),
            ProjectionError::InvalidEscape { .. }
        ));
    }

    proptest! {
        #[test]
        fn pointer_round_trip(tokens in proptest::collection::vec(".{1,12}", 0..6)) {
            let joined = pointer(&tokens);
            let parsed = parse_pointer(&joined).expect("round trip parse");
            prop_assert_eq!(parsed, tokens);
        }

        #[test]
        fn unescape_inverts_escape(token in ".{0,24}") {
            let escaped = escape_token(&token);
            prop_assert_eq!(unescape_token(&escaped).expect("unescape"), token);
        }
    }
}
