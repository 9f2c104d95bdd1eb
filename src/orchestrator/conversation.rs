//! Conversation state: per-conversation message history plus any action
//! awaiting the user's confirmation, held in a bounded, TTL-evicting store.
//!
//! No teacher analogue — the teacher persists conversation history in
//! sqlite (`agent/mod.rs`'s `load_conversation`); this control plane keeps
//! it in memory only, matching the spec's "State" line for the
//! orchestrator (conversation history is not guaranteed to survive a
//! restart).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::llm::adapter::ChatMessage;

#[derive(Debug, Clone)]
pub struct PendingAction {
    pub tool: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub pending: Option<PendingAction>,
    last_active: Instant,
}

impl Conversation {
    fn new(id: &str) -> Self {
        Self { id: id.to_string(), messages: Vec::new(), pending: None, last_active: Instant::now() }
    }
}

/// Bounded conversation cache: oldest-by-`last_active` entries are evicted
/// once `max_size` is exceeded, and any entry idle past `ttl` is dropped
/// on the next sweep, mirroring the ring-buffer-with-eviction shape used
/// by `security/audit.rs`'s recent-events cache elsewhere in this crate.
pub struct ConversationStore {
    inner: Mutex<HashMap<String, Conversation>>,
    max_size: usize,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self { inner: Mutex::new(HashMap::new()), max_size, ttl }
    }

    pub async fn get_or_create(&self, id: &str) -> Conversation {
        let mut map = self.inner.lock().await;
        self.evict_stale(&mut map);
        map.entry(id.to_string()).or_insert_with(|| Conversation::new(id)).clone()
    }

    pub async fn save(&self, id: &str, mut conversation: Conversation) {
        conversation.last_active = Instant::now();
        let mut map = self.inner.lock().await;
        map.insert(id.to_string(), conversation);
        self.evict_over_capacity(&mut map);
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn set_pending(&self, id: &str, pending: PendingAction) {
        let mut map = self.inner.lock().await;
        let entry = map.entry(id.to_string()).or_insert_with(|| Conversation::new(id));
        entry.pending = Some(pending);
        entry.last_active = Instant::now();
    }

    fn evict_stale(&self, map: &mut HashMap<String, Conversation>) {
        let ttl = self.ttl;
        map.retain(|_, c| c.last_active.elapsed() < ttl);
    }

    fn evict_over_capacity(&self, map: &mut HashMap<String, Conversation>) {
        if map.len() <= self.max_size {
            return;
        }
        let overflow = map.len() - self.max_size;
        let mut ids: Vec<(String, Instant)> = map.iter().map(|(k, v)| (k.clone(), v.last_active)).collect();
        ids.sort_by_key(|(_, last_active)| *last_active);
        for (id, _) in ids.into_iter().take(overflow) {
            map.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_then_save_roundtrips_messages() {
        let store = ConversationStore::new(10, Duration::from_secs(60));
        let mut conv = store.get_or_create("c1").await;
        assert!(conv.messages.is_empty());
        conv.messages.push(ChatMessage { role: "user".into(), content: "hi".into() });
        store.save("c1", conv).await;

        let reloaded = store.get_or_create("c1").await;
        assert_eq!(reloaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn pending_action_set_and_consumed() {
        let store = ConversationStore::new(10, Duration::from_secs(60));
        store.set_pending("c1", PendingAction { tool: "exec".into(), arguments: serde_json::json!({}) }).await;
        let mut conv = store.get_or_create("c1").await;
        assert!(conv.pending.is_some());
        conv.pending = None;
        store.save("c1", conv).await;
        let reloaded = store.get_or_create("c1").await;
        assert!(reloaded.pending.is_none());
    }

    #[tokio::test]
    async fn eviction_drops_oldest_over_capacity() {
        let store = ConversationStore::new(2, Duration::from_secs(60));
        for id in ["a", "b", "c"] {
            let conv = store.get_or_create(id).await;
            store.save(id, conv).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let map = store.inner.lock().await;
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key("a"));
    }
}
