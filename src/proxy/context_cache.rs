// Gemini explicit context caching. A (system, tools) fingerprint keys a
// server-side cachedContents handle together with a digest of the
// conversation prefix it covers; while the prefix keeps extending, each turn
// sends only the delta. Diverged or expired prefixes rebuild the handle, and
// shutdown deletes every live handle.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::LazyLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::CACHE_CLIENT_EXPIRY;
use crate::proxy::mappers::gemini::{GeminiTool, GoogleContent, GoogleRequest};
use crate::proxy::upstream::UpstreamClient;

static TIMESTAMP_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"Current date and time: \d{4}-\d{2}-\d{2} \([^)]+\) \d{2}:\d{2}:\d{2}")
        .expect("timestamp regex")
});

// The system prompt's only by-design volatile substring is a human-readable
// timestamp; normalizing it keeps the cache key stable across turns.
pub fn normalize_system_prompt(system: &str) -> String {
    TIMESTAMP_PATTERN
        .replace_all(system, "Current date and time: [NORMALIZED]")
        .into_owned()
}

pub fn cache_key(system: &str, tools: Option<&[GeminiTool]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_system_prompt(system).as_bytes());
    hasher.update(serde_json::to_string(&tools).unwrap_or_default().as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    hash[..16].to_string()
}

pub fn contents_digest(contents: &[GoogleContent]) -> String {
    let serialized = serde_json::to_string(contents).unwrap_or_default();
    let hash = format!("{:x}", Sha256::digest(serialized.as_bytes()));
    hash[..32].to_string()
}

struct CacheEntry {
    name: String,
    // Credential that created the handle; deletion must use the same one.
    api_key: String,
    expire_at: Instant,
    cached_count: usize,
    cached_digest: String,
}

#[derive(Default)]
pub struct ContextCacheManager {
    entries: tokio::sync::Mutex<HashMap<String, CacheEntry>>,
}

impl ContextCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    // Rewrites `request` to reference a cached prefix where possible. The
    // table lock is held across the whole lookup → delete → create → insert
    // sequence so racing first-turn requests produce exactly one handle per
    // key. Any upstream failure leaves the request untouched (full, uncached
    // send).
    pub async fn apply(
        &self,
        upstream: &UpstreamClient,
        api_key: &str,
        model: &str,
        system: &str,
        request: &mut GoogleRequest,
    ) {
        if request.system_instruction.is_none() && request.tools.is_none() {
            return;
        }

        let key = cache_key(system, request.tools.as_deref());
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(&key) {
            if Instant::now() < entry.expire_at {
                if entry.cached_count < request.contents.len() {
                    let prefix_digest = contents_digest(&request.contents[..entry.cached_count]);
                    if prefix_digest == entry.cached_digest {
                        debug!(
                            "Context cache incremental hit: {} ({} cached, {} delta)",
                            entry.name,
                            entry.cached_count,
                            request.contents.len() - entry.cached_count
                        );
                        request.cached_content = Some(entry.name.clone());
                        request.system_instruction = None;
                        request.tools = None;
                        request.contents.drain(..entry.cached_count);
                        return;
                    }
                }

                // Prefix diverged (or the conversation shrank): the handle
                // no longer matches, drop it server-side and rebuild.
                debug!("Context cache prefix diverged, rebuilding");
                if let Err(e) = upstream
                    .delete_cached_content(&entry.api_key, &entry.name)
                    .await
                {
                    warn!("Failed to delete stale cached content: {}", e);
                }
                entries.remove(&key);
            }
        }

        // A single-message conversation is not worth a handle; the next turn
        // will create one covering it.
        if request.contents.len() < 2 {
            return;
        }

        let prefix_len = request.contents.len() - 1;
        let prefix = &request.contents[..prefix_len];
        match upstream
            .create_cached_content(
                api_key,
                model,
                request.system_instruction.as_ref(),
                request.tools.as_deref(),
                prefix,
            )
            .await
        {
            Ok(name) => {
                info!(
                    "Context cache created: {} ({} messages cached)",
                    name, prefix_len
                );
                entries.insert(
                    key,
                    CacheEntry {
                        name: name.clone(),
                        api_key: api_key.to_string(),
                        expire_at: Instant::now() + CACHE_CLIENT_EXPIRY,
                        cached_count: prefix_len,
                        cached_digest: contents_digest(prefix),
                    },
                );
                request.cached_content = Some(name);
                request.system_instruction = None;
                request.tools = None;
                request.contents.drain(..prefix_len);
            }
            Err(e) => {
                warn!("Context cache creation failed, sending full request: {}", e);
            }
        }
    }

    // Shutdown path: cached handles cost money, delete every live one.
    pub async fn cleanup(&self, upstream: &UpstreamClient) {
        let entries = self.entries.lock().await;
        if entries.is_empty() {
            info!("No cached content to clean up");
            return;
        }

        info!("Cleaning up {} cached content handle(s)", entries.len());
        for entry in entries.values() {
            match upstream
                .delete_cached_content(&entry.api_key, &entry.name)
                .await
            {
                Ok(()) => info!("Deleted cached content: {}", entry.name),
                Err(e) => warn!("Failed to delete cached content {}: {}", entry.name, e),
            }
        }
    }

    #[cfg(test)]
    pub async fn seed_entry(
        &self,
        key: &str,
        name: &str,
        api_key: &str,
        cached: &[GoogleContent],
    ) {
        self.entries.lock().await.insert(
            key.to_string(),
            CacheEntry {
                name: name.to_string(),
                api_key: api_key.to_string(),
                expire_at: Instant::now() + CACHE_CLIENT_EXPIRY,
                cached_count: cached.len(),
                cached_digest: contents_digest(cached),
            },
        );
    }

    #[cfg(test)]
    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::mappers::gemini::{FunctionDeclaration, GooglePart};

    fn text_turn(role: &str, text: &str) -> GoogleContent {
        GoogleContent {
            role: role.to_string(),
            parts: vec![GooglePart::text(text)],
        }
    }

    fn sample_tools() -> Vec<GeminiTool> {
        vec![GeminiTool {
            function_declarations: vec![FunctionDeclaration {
                name: "bash".to_string(),
                description: None,
                parameters: None,
            }],
        }]
    }

    #[test]
    fn cache_key_is_stable_across_timestamps() {
        let tools = sample_tools();
        let a = cache_key(
            "You are helpful.\nCurrent date and time: 2026-02-09 (Monday) 21:15:02\nrest",
            Some(&tools),
        );
        let b = cache_key(
            "You are helpful.\nCurrent date and time: 2027-12-31 (Friday) 00:00:00\nrest",
            Some(&tools),
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn cache_key_varies_with_system_and_tools() {
        let tools = sample_tools();
        let base = cache_key("system A", Some(&tools));
        assert_ne!(base, cache_key("system B", Some(&tools)));
        assert_ne!(base, cache_key("system A", None));
    }

    #[test]
    fn normalize_replaces_only_the_timestamp() {
        let system = "before\nCurrent date and time: 2026-02-09 (Monday) 21:15:02\nafter";
        assert_eq!(
            normalize_system_prompt(system),
            "before\nCurrent date and time: [NORMALIZED]\nafter"
        );
        assert_eq!(normalize_system_prompt("no timestamp"), "no timestamp");
    }

    #[test]
    fn digest_is_prefix_sensitive() {
        let turns = vec![text_turn("user", "m1"), text_turn("model", "m2")];
        let digest_full = contents_digest(&turns);
        let digest_prefix = contents_digest(&turns[..1]);
        assert_ne!(digest_full, digest_prefix);
        assert_eq!(digest_full.len(), 32);
        // Deterministic.
        assert_eq!(digest_full, contents_digest(&turns.clone()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn incremental_hit_sends_only_the_delta() {
        let manager = ContextCacheManager::new();
        // No upstream traffic expected on the hit path.
        let upstream = UpstreamClient::new_for_test("http://127.0.0.1:1");

        let m1 = text_turn("user", "m1");
        let m2 = text_turn("model", "m2");
        let m3 = text_turn("user", "m3");

        let mut request = GoogleRequest {
            contents: vec![m1.clone(), m2.clone(), m3.clone()],
            tools: Some(sample_tools()),
            system_instruction: Some(GoogleContent {
                role: String::new(),
                parts: vec![GooglePart::text("S")],
            }),
            ..GoogleRequest::default()
        };

        let key = cache_key("S", request.tools.as_deref());
        manager
            .seed_entry(&key, "cachedContents/abc", "k", &[m1, m2])
            .await;

        manager
            .apply(&upstream, "k", "gemini-3-flash-preview", "S", &mut request)
            .await;

        assert_eq!(
            request.cached_content.as_deref(),
            Some("cachedContents/abc")
        );
        assert!(request.system_instruction.is_none());
        assert!(request.tools.is_none());
        assert_eq!(request.contents, vec![m3]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cache_skipped_without_system_or_tools() {
        let manager = ContextCacheManager::new();
        let upstream = UpstreamClient::new_for_test("http://127.0.0.1:1");

        let mut request = GoogleRequest {
            contents: vec![text_turn("user", "hi")],
            ..GoogleRequest::default()
        };
        manager.apply(&upstream, "k", "m", "", &mut request).await;

        assert!(request.cached_content.is_none());
        assert_eq!(manager.entry_count().await, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn single_message_conversation_skips_creation() {
        let manager = ContextCacheManager::new();
        let upstream = UpstreamClient::new_for_test("http://127.0.0.1:1");

        let mut request = GoogleRequest {
            contents: vec![text_turn("user", "hi")],
            system_instruction: Some(GoogleContent {
                role: String::new(),
                parts: vec![GooglePart::text("S")],
            }),
            ..GoogleRequest::default()
        };
        manager.apply(&upstream, "k", "m", "S", &mut request).await;

        assert!(request.cached_content.is_none());
        assert_eq!(request.contents.len(), 1);
        assert_eq!(manager.entry_count().await, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn creation_failure_falls_back_to_full_request() {
        let manager = ContextCacheManager::new();
        // Unreachable upstream: creation fails, request goes out uncached.
        let upstream = UpstreamClient::new_for_test("http://127.0.0.1:1");

        let mut request = GoogleRequest {
            contents: vec![text_turn("user", "m1"), text_turn("model", "m2")],
            system_instruction: Some(GoogleContent {
                role: String::new(),
                parts: vec![GooglePart::text("S")],
            }),
            ..GoogleRequest::default()
        };
        manager.apply(&upstream, "k", "m", "S", &mut request).await;

        assert!(request.cached_content.is_none());
        assert!(request.system_instruction.is_some());
        assert_eq!(request.contents.len(), 2);
        assert_eq!(manager.entry_count().await, 0);
    }
}
