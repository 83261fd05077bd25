use meshcomm_core::{Category, Message};
use parking_lot::RwLock;

/// Append-only log of received messages, in arrival order.
///
/// Appends take the write lock; reads copy the log out under the read lock,
/// so callers never see the live sequence.
#[derive(Default)]
pub struct MessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: Message) {
        self.messages.write().push(message);
    }

    /// Independent copy of every stored message.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    /// Copy of the stored messages of one category.
    pub fn snapshot_category(&self, category: Category) -> Vec<Message> {
        self.messages
            .read()
            .iter()
            .filter(|m| m.category == category)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcomm_core::User;
    use std::sync::Arc;

    fn msg(content: &str, category: Category) -> Message {
        Message::new(content, category, User::new("tester", "node-t"))
    }

    #[test]
    fn test_append_preserves_order() {
        let store = MessageStore::new();
        store.append(msg("a", Category::General));
        store.append(msg("b", Category::Help));
        store.append(msg("c", Category::General));
        let contents: Vec<_> = store.snapshot().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, ["a", "b", "c"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = MessageStore::new();
        store.append(msg("first", Category::General));
        let snap = store.snapshot();
        store.append(msg("second", Category::General));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].content, "first");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_category() {
        let store = MessageStore::new();
        store.append(msg("fire", Category::Emergency));
        store.append(msg("hi", Category::General));
        store.append(msg("flood", Category::Emergency));
        let emergencies = store.snapshot_category(Category::Emergency);
        assert_eq!(emergencies.len(), 2);
        assert!(emergencies.iter().all(|m| m.category == Category::Emergency));
        assert!(store.snapshot_category(Category::Help).is_empty());
    }

    #[test]
    fn test_concurrent_readers_see_consistent_prefixes() {
        let store = Arc::new(MessageStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    store.append(msg(&i.to_string(), Category::General));
                }
            })
        };

        let mut last_len = 0;
        while last_len < 500 {
            let snap = store.snapshot();
            assert!(snap.len() >= last_len);
            for (i, m) in snap.iter().enumerate() {
                assert_eq!(m.content, i.to_string());
            }
            last_len = snap.len();
        }
        writer.join().unwrap();
        assert_eq!(store.len(), 500);
    }
}
