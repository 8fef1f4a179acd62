use dashmap::DashMap;
use tracing::debug;

// Map from relay-minted tool_use id to the thought signature Gemini attached
// to the originating functionCall. Entries live for the process; the
// single-user workload bounds growth to the number of distinct tool calls.
#[derive(Default)]
pub struct SignatureCache {
    signatures: DashMap<String, String>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, tool_use_id: &str, signature: String) {
        if signature.is_empty() {
            return;
        }
        debug!("Caching thought signature for tool_use id: {}", tool_use_id);
        self.signatures.insert(tool_use_id.to_string(), signature);
    }

    pub fn get(&self, tool_use_id: &str) -> Option<String> {
        self.signatures.get(tool_use_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_get() {
        let cache = SignatureCache::new();
        assert!(cache.get("t1").is_none());

        cache.store("t1", "sig-1".to_string());
        assert_eq!(cache.get("t1").as_deref(), Some("sig-1"));
        assert!(cache.get("t2").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn empty_signatures_are_ignored() {
        let cache = SignatureCache::new();
        cache.store("t1", String::new());
        assert!(cache.is_empty());
    }

    #[test]
    fn later_store_overwrites() {
        let cache = SignatureCache::new();
        cache.store("t1", "old".to_string());
        cache.store("t1", "new".to_string());
        assert_eq!(cache.get("t1").as_deref(), Some("new"));
    }
}
