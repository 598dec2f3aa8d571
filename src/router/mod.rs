//! Router / Config Store (spec.md §4.1): the in-memory `url_pattern -> RuntimeApi`
//! table, kept current by [`config_store::ConfigStore`].

pub mod config_store;

use crate::rewrite;
use crate::types::HttpMethod;
use serde::{Deserialize, Serialize};

/// One participant call definition within a `RuntimeApi` node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeCall {
    pub url_template: String,
    pub method: HttpMethod,
    pub timeout_ms: u64,
}

/// One participant's position in a transaction (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub index: i32,
    pub try_call: NodeCall,
    pub confirm: NodeCall,
    pub cancel: NodeCall,
}

/// Immutable configuration value published by the Router (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeApi {
    pub url_pattern: String,
    pub nodes: Vec<Node>,
}

impl RuntimeApi {
    /// Checks the §3 invariant: every node template's variable set is covered
    /// by the pattern's variable set.
    pub fn validate(&self) -> Result<(), crate::errors::Error> {
        let pattern_vars: std::collections::HashSet<&str> = rewrite::pattern_variables(&self.url_pattern).into_iter().collect();

        for node in &self.nodes {
            for call in [&node.try_call, &node.confirm, &node.cancel] {
                for var in rewrite::pattern_variables(&call.url_template) {
                    if !pattern_vars.contains(var) {
                        return Err(crate::errors::Error::Config {
                            message: format!(
                                "runtime api {:?} node {} references unbound variable {:?}",
                                self.url_pattern, node.index, var
                            ),
                        });
                    }
                }
            }
        }

        let expected_indices: Vec<i32> = (0..self.nodes.len() as i32).collect();
        let actual_indices: Vec<i32> = self.nodes.iter().map(|n| n.index).collect();
        if actual_indices != expected_indices {
            return Err(crate::errors::Error::Config {
                message: format!("runtime api {:?} node indices must be contiguous from 0", self.url_pattern),
            });
        }

        Ok(())
    }
}

/// Two patterns are ambiguous if they have the same segment shape (variable
/// positions and literal segments line up) — an inbound path could then match
/// both, and there is no principled way to prefer one. Spec.md §4.1 calls
/// this a load-time configuration error.
pub fn patterns_ambiguous(a: &str, b: &str) -> bool {
    let a_segs: Vec<&str> = a.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    let b_segs: Vec<&str> = b.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    if a_segs.len() != b_segs.len() {
        return false;
    }

    a_segs.iter().zip(b_segs.iter()).all(|(sa, sb)| {
        let a_is_var = sa.starts_with(':');
        let b_is_var = sb.starts_with(':');
        a_is_var == b_is_var && (a_is_var || sa == sb)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_shape_is_ambiguous() {
        assert!(patterns_ambiguous("/order/:id/pay", "/order/:oid/pay"));
    }

    #[test]
    fn different_literal_is_not_ambiguous() {
        assert!(!patterns_ambiguous("/order/:id/pay", "/order/:id/refund"));
    }

    #[test]
    fn different_length_is_not_ambiguous() {
        assert!(!patterns_ambiguous("/order/:id", "/order/:id/pay"));
    }

    #[test]
    fn validate_rejects_unbound_node_variable() {
        let api = RuntimeApi {
            url_pattern: "/order/:id/pay".to_string(),
            nodes: vec![Node {
                index: 0,
                try_call: NodeCall {
                    url_template: "http://svc/orders/:other/try".to_string(),
                    method: HttpMethod::Post,
                    timeout_ms: 1000,
                },
                confirm: NodeCall {
                    url_template: "http://svc/orders/:id/confirm".to_string(),
                    method: HttpMethod::Post,
                    timeout_ms: 1000,
                },
                cancel: NodeCall {
                    url_template: "http://svc/orders/:id/cancel".to_string(),
                    method: HttpMethod::Post,
                    timeout_ms: 1000,
                },
            }],
        };
        assert!(api.validate().is_err());
    }
}
