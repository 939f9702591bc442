//! Request context: a key/value map with a declared recognized-key list.
//!
//! Unknown keys are ignored everywhere; only recognized keys participate in
//! the context key that partitions contextual policy state.

use std::collections::BTreeMap;

/// Request context supplied by the host recommender.
pub type Context = BTreeMap<String, String>;

/// Derive the state-partitioning key from a context.
///
/// Only keys in `recognized` contribute. The result is stable under map
/// ordering (BTreeMap iterates sorted) and empty when nothing matches, which
/// is also the key non-contextual policies use.
pub fn context_key(context: &Context, recognized: &[String]) -> String {
    let mut parts = Vec::new();
    for (k, v) in context {
        if recognized.iter().any(|r| r == k) {
            parts.push(format!("{k}={v}"));
        }
    }
    parts.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_ignored() {
        let mut ctx = Context::new();
        ctx.insert("device".to_string(), "ios".to_string());
        ctx.insert("session_len".to_string(), "42".to_string());

        let recognized = vec!["device".to_string()];
        assert_eq!(context_key(&ctx, &recognized), "device=ios");
    }

    #[test]
    fn test_key_is_order_stable() {
        let mut ctx = Context::new();
        ctx.insert("b".to_string(), "2".to_string());
        ctx.insert("a".to_string(), "1".to_string());

        let recognized = vec!["a".to_string(), "b".to_string()];
        assert_eq!(context_key(&ctx, &recognized), "a=1&b=2");
    }

    #[test]
    fn test_empty_when_nothing_recognized() {
        let mut ctx = Context::new();
        ctx.insert("x".to_string(), "1".to_string());
        assert_eq!(context_key(&ctx, &[]), "");
    }
}
