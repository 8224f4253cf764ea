//! In-memory conversation store.
//!
//! Conversations live in a sharded map, each behind its own mutex, so appends
//! to one conversation serialize while different conversations never wait on
//! each other. Sessions hold a [`ConversationHandle`]; a conversation with a
//! live handle is never evicted.

use dashmap::DashMap;
use log::{ debug, info, warn };
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{ Duration, Instant };
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::ChatError;
use crate::models::chat::{ Conversation, Role, Turn };

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEvent {
    Created {
        conversation_id: String,
    },
    Evicted {
        conversation_id: String,
        turns: usize,
    },
}

struct Slot {
    id: String,
    state: Mutex<SlotState>,
}

struct SlotState {
    conversation: Conversation,
    last_active: Instant,
}

impl Slot {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(SlotState {
                conversation: Conversation::new(id),
                last_active: Instant::now(),
            }),
        }
    }

    fn last_active(&self) -> Instant {
        self.state.lock().last_active
    }

    fn turn_count(&self) -> usize {
        self.state.lock().conversation.messages.len()
    }
}

/// Shared reference to one conversation.
#[derive(Clone)]
pub struct ConversationHandle {
    slot: Arc<Slot>,
}

impl ConversationHandle {
    pub fn id(&self) -> &str {
        &self.slot.id
    }

    pub fn append(&self, role: Role, content: impl Into<String>) -> Turn {
        let mut state = self.slot.state.lock();
        state.last_active = Instant::now();
        state.conversation.push(role, content).clone()
    }

    pub fn history(&self) -> Vec<Turn> {
        self.slot.state.lock().conversation.messages.clone()
    }

    pub fn snapshot(&self) -> Conversation {
        self.slot.state.lock().conversation.clone()
    }

    pub fn len(&self) -> usize {
        self.slot.turn_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ConversationStore {
    conversations: DashMap<String, Arc<Slot>>,
    capacity: Option<usize>,
    events: broadcast::Sender<StoreEvent>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// `capacity` is a soft bound: when every stored conversation is in use
    /// by a session, new ones are still created.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            conversations: DashMap::new(),
            capacity,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn get_or_create(&self, id: &str) -> Result<ConversationHandle, ChatError> {
        validate_id(id)?;

        if let Some(slot) = self.conversations.get(id) {
            return Ok(ConversationHandle { slot: Arc::clone(slot.value()) });
        }

        if let Some(capacity) = self.capacity {
            if self.conversations.len() >= capacity && self.evict_least_recent().is_none() {
                warn!(
                    "Conversation store at capacity ({}) and every conversation is in use; creating '{}' anyway",
                    capacity,
                    id
                );
            }
        }

        let mut created = false;
        let slot = Arc::clone(
            self.conversations
                .entry(id.to_string())
                .or_insert_with(|| {
                    created = true;
                    Arc::new(Slot::new(id))
                })
                .value()
        );

        if created {
            debug!("Created conversation '{}'", id);
            let _ = self.events.send(StoreEvent::Created { conversation_id: id.to_string() });
        }

        Ok(ConversationHandle { slot })
    }

    pub fn append(&self, id: &str, role: Role, content: impl Into<String>) -> Result<Turn, ChatError> {
        Ok(self.get_or_create(id)?.append(role, content))
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.conversations.get(id).map(|slot| slot.state.lock().conversation.clone())
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Drops conversations idle for at least `ttl` that no session holds.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut evicted = Vec::new();
        self.conversations.retain(|id, slot| {
            let keep = Arc::strong_count(slot) > 1 || slot.last_active().elapsed() < ttl;
            if !keep {
                evicted.push((id.clone(), slot.turn_count()));
            }
            keep
        });

        for (conversation_id, turns) in &evicted {
            self.announce_eviction(conversation_id, *turns);
        }
        evicted.len()
    }

    fn evict_least_recent(&self) -> Option<String> {
        let candidate = self.conversations
            .iter()
            .filter(|entry| Arc::strong_count(entry.value()) == 1)
            .map(|entry| (entry.key().clone(), entry.value().last_active()))
            .min_by_key(|(_, last_active)| *last_active)
            .map(|(id, _)| id)?;

        let (id, slot) = self.conversations.remove_if(&candidate, |_, slot| {
            Arc::strong_count(slot) == 1
        })?;
        self.announce_eviction(&id, slot.turn_count());
        Some(id)
    }

    fn announce_eviction(&self, conversation_id: &str, turns: usize) {
        info!("Evicted conversation '{}' ({} turns)", conversation_id, turns);
        let _ = self.events.send(StoreEvent::Evicted {
            conversation_id: conversation_id.to_string(),
            turns,
        });
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_id(id: &str) -> Result<(), ChatError> {
    if id.trim().is_empty() {
        return Err(ChatError::InvalidConversationId(id.to_string()));
    }
    Ok(())
}

/// Periodically evicts idle conversations until the task is aborted.
pub fn spawn_sweeper(store: Arc<ConversationStore>, ttl: Duration, every: Duration) -> JoinHandle<()> {
    info!("Conversation TTL sweeper running every {:?} (ttl {:?})", every, ttl);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted = store.evict_idle(ttl);
            if evicted > 0 {
                debug!("Sweeper evicted {} idle conversations", evicted);
            }
        }
    })
}

pub fn format_history_for_log(conversation: &Conversation) -> String {
    conversation.messages
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
            };
            format!("{}: {}", role, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let store = ConversationStore::new();
        let a = store.get_or_create("c1").unwrap();
        a.append(Role::User, "hi");
        let b = store.get_or_create("c1").unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rejects_blank_ids() {
        let store = ConversationStore::new();
        assert!(matches!(store.get_or_create(""), Err(ChatError::InvalidConversationId(_))));
        assert!(matches!(store.append("  ", Role::User, "x"), Err(ChatError::InvalidConversationId(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn n_pairs_give_2n_turns_in_order() {
        let store = ConversationStore::new();
        for id in ["a", "b"] {
            for i in 0..25 {
                store.append(id, Role::User, format!("{}-q{}", id, i)).unwrap();
                store.append(id, Role::Assistant, format!("{}-a{}", id, i)).unwrap();
            }
        }
        for id in ["a", "b"] {
            let conversation = store.get(id).unwrap();
            assert_eq!(conversation.messages.len(), 50);
            for (i, pair) in conversation.messages.chunks(2).enumerate() {
                assert_eq!(pair[0].role, Role::User);
                assert_eq!(pair[0].content, format!("{}-q{}", id, i));
                assert_eq!(pair[1].role, Role::Assistant);
                assert_eq!(pair[1].content, format!("{}-a{}", id, i));
            }
        }
    }

    #[test]
    fn get_does_not_create() {
        let store = ConversationStore::new();
        assert!(store.get("missing").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_keep_per_writer_order() {
        let store = Arc::new(ConversationStore::new());
        let mut tasks = Vec::new();
        for writer in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(
                tokio::spawn(async move {
                    for i in 0..100 {
                        store.append("shared", Role::User, format!("{}:{}", writer, i)).unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            );
        }
        for task in tasks {
            task.await.unwrap();
        }

        let conversation = store.get("shared").unwrap();
        assert_eq!(conversation.messages.len(), 800);
        for writer in 0..8 {
            let seen: Vec<usize> = conversation.messages
                .iter()
                .filter_map(|turn| {
                    let (w, i) = turn.content.split_once(':')?;
                    (w == writer.to_string()).then(|| i.parse().unwrap())
                })
                .collect();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
        assert!(
            conversation.messages
                .windows(2)
                .all(|w| w[0].timestamp <= w[1].timestamp)
        );
    }

    #[test]
    fn idle_eviction_skips_pinned_conversations() {
        let store = ConversationStore::new();
        let mut events = store.subscribe();
        let pinned = store.get_or_create("pinned").unwrap();
        store.append("idle", Role::User, "bye").unwrap();

        assert_eq!(store.evict_idle(Duration::ZERO), 1);
        assert!(store.get("idle").is_none());
        assert!(store.get("pinned").is_some());

        assert_eq!(events.try_recv().unwrap(), StoreEvent::Created { conversation_id: "pinned".into() });
        assert_eq!(events.try_recv().unwrap(), StoreEvent::Created { conversation_id: "idle".into() });
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::Evicted { conversation_id: "idle".into(), turns: 1 }
        );

        drop(pinned);
        assert_eq!(store.evict_idle(Duration::ZERO), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn idle_eviction_respects_ttl() {
        let store = ConversationStore::new();
        store.append("fresh", Role::User, "hi").unwrap();
        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn capacity_evicts_least_recently_active() {
        let store = ConversationStore::with_capacity(Some(2));
        store.append("old", Role::User, "1").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.append("new", Role::User, "2").unwrap();

        store.get_or_create("third").unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get("old").is_none());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn capacity_is_soft_when_everything_is_pinned() {
        let store = ConversationStore::with_capacity(Some(1));
        let _held = store.get_or_create("held").unwrap();
        let _also = store.get_or_create("also").unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_on_interval() {
        let store = Arc::new(ConversationStore::new());
        store.append("gone", Role::User, "x").unwrap();
        let sweeper = spawn_sweeper(Arc::clone(&store), Duration::ZERO, Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(store.is_empty());
        sweeper.abort();
    }

    #[test]
    fn formats_history() {
        let mut conversation = Conversation::new("c");
        conversation.push(Role::User, "hi");
        conversation.push(Role::Assistant, "hello");
        assert_eq!(format_history_for_log(&conversation), "User: hi\nAssistant: hello");
    }
}
