use std::collections::HashMap;

use tracing::warn;

use crate::config::ServerId;

// -----------------------------------------------------------------------------
// ----- ServerIdResolver ------------------------------------------------------

/// Maps a uniqId to the gateway that owns it.
pub trait ServerIdResolver: Send + Sync + 'static {
    fn resolve_one(&self, uniq_id: &str) -> Option<ServerId>;

    /// Keys that cannot be resolved are left out of the map.
    fn resolve_many(&self, uniq_ids: &[String]) -> HashMap<String, ServerId> {
        let mut out = HashMap::with_capacity(uniq_ids.len());
        for uniq_id in uniq_ids {
            if let Some(server_id) = self.resolve_one(uniq_id) {
                out.insert(uniq_id.clone(), server_id);
            }
        }
        out
    }
}

// -----------------------------------------------------------------------------
// ----- HexPrefixResolver -----------------------------------------------------

/// Gateways prefix every uniqId with their serverId as two hex digits.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexPrefixResolver;

impl ServerIdResolver for HexPrefixResolver {
    fn resolve_one(&self, uniq_id: &str) -> Option<ServerId> {
        let parsed = uniq_id
            .get(..2)
            .filter(|prefix| prefix.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|prefix| ServerId::from_str_radix(prefix, 16).ok());

        if parsed.is_none() {
            warn!("cannot resolve serverId from uniqId {uniq_id:?}");
        }
        parsed
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_two_hex_digits() {
        let r = HexPrefixResolver;
        assert_eq!(r.resolve_one("0a65f1c2d3"), Some(10));
        assert_eq!(r.resolve_one("FFabc"), Some(255));
        assert_eq!(r.resolve_one("01"), Some(1));
    }

    #[test]
    fn rejects_short_or_non_hex_ids() {
        let r = HexPrefixResolver;
        assert_eq!(r.resolve_one(""), None);
        assert_eq!(r.resolve_one("z1abc"), None);
        assert_eq!(r.resolve_one("é1"), None);
        assert_eq!(r.resolve_one("+1abc"), None);
    }

    #[test]
    fn resolve_many_skips_unresolvable() {
        let ids = vec!["01aa".to_string(), "xx".to_string(), "02bb".to_string()];
        let map = HexPrefixResolver.resolve_many(&ids);
        assert_eq!(map.len(), 2);
        assert_eq!(map["01aa"], 1);
        assert_eq!(map["02bb"], 2);
    }
}
