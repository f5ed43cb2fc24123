//! Structural view-model differ.
//!
//! Produces minimal RFC 6902 op lists between two VM trees. Traversal is
//! deterministic: at every mapping the union of keys is visited in sorted
//! order. Recursion happens only when both sides are mappings; lists and
//! scalars are leaves, replaced wholesale. Equality is structural, including
//! the integer/double distinction (`1` and `1.0` differ).
//!
//! The scoped variant restricts the diff to caller-nominated subtrees, used
//! when the screen's change-set bounds what can possibly have moved.

use std::collections::BTreeSet;

use projection_types::PatchOp;
use serde_json::Value;

use crate::pointer::pointer;

/// Compute the op list transforming `prev` into `next`.
#[must_use]
pub fn diff(prev: &Value, next: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    diff_into(prev, next, &mut tokens, &mut ops);
    ops
}

/// Compute ops only for the nominated subtrees.
///
/// Each entry of `paths` is a token list addressing a subtree that may have
/// changed; everything outside those subtrees is assumed identical. A path
/// whose intermediate nodes are missing or non-mappings resolves to absent.
#[must_use]
pub fn diff_at_paths(prev: &Value, next: &Value, paths: &[Vec<String>]) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    for tokens in paths {
        let before = resolve(prev, tokens);
        let after = resolve(next, tokens);
        match (before, after) {
            (None, None) => {}
            (None, Some(value)) => ops.push(PatchOp::Add {
                path: pointer(tokens),
                value: value.clone(),
            }),
            (Some(_), None) => ops.push(PatchOp::Remove {
                path: pointer(tokens),
            }),
            (Some(before), Some(after)) => {
                let mut prefix = tokens.clone();
                diff_into(before, after, &mut prefix, &mut ops);
            }
        }
    }
    ops
}

/// Walk a token path through mappings; anything else short-circuits to absent.
#[must_use]
pub fn resolve<'a>(root: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    let mut cursor = root;
    for token in tokens {
        cursor = cursor.as_object()?.get(token)?;
    }
    Some(cursor)
}

fn diff_into(prev: &Value, next: &Value, tokens: &mut Vec<String>, ops: &mut Vec<PatchOp>) {
    if prev == next {
        return;
    }

    let (Some(prev_map), Some(next_map)) = (prev.as_object(), next.as_object()) else {
        ops.push(PatchOp::Replace {
            path: pointer(tokens.iter()),
            value: next.clone(),
        });
        return;
    };

    let keys: BTreeSet<&String> = prev_map.keys().chain(next_map.keys()).collect();
    for key in keys {
        match (prev_map.get(key), next_map.get(key)) {
            (None, Some(added)) => {
                tokens.push(key.clone());
                ops.push(PatchOp::Add {
                    path: pointer(tokens.iter()),
                    value: added.clone(),
                });
                tokens.pop();
            }
            (Some(_), None) => {
                tokens.push(key.clone());
                ops.push(PatchOp::Remove {
                    path: pointer(tokens.iter()),
                });
                tokens.pop();
            }
            (Some(before), Some(after)) => {
                if before != after {
                    tokens.push(key.clone());
                    diff_into(before, after, tokens, ops);
                    tokens.pop();
                }
            }
            (None, None) => unreachable!("key came from the union of both maps"),
        }
    }
}
