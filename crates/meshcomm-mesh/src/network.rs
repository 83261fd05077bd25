use std::collections::BTreeMap;
use std::sync::Arc;

use meshcomm_core::{
    Category, MeshCommError, Message, Result, UnjoinedPolicy, User, encode_message,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatch::{DispatchLoop, LoopHealth, TopicHealth};
use crate::observers::{ObserverId, ObserverRegistry};
use crate::store::MessageStore;
use crate::topics::TopicTable;
use crate::transport::Transport;

/// Behaviour switches for a [`MeshNetwork`].
#[derive(Debug, Clone, Copy)]
pub struct NetworkOptions {
    /// After a successful broadcast, store our own message and hand it to
    /// observers. Our own deliveries are always dropped on receipt, so without
    /// this a node never sees what it sent.
    pub local_echo: bool,
    /// What `publish` does for a category that was never joined.
    pub unjoined: UnjoinedPolicy,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            local_echo: true,
            unjoined: UnjoinedPolicy::Ignore,
        }
    }
}

/// Result of a [`MeshNetwork::publish`] call.
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    /// Handed to the transport for broadcast.
    Sent(Message),
    /// The category was never joined; nothing was transmitted.
    NotJoined(Category),
}

/// Chat message distribution over the per-category gossip topics.
///
/// Joining starts one dispatch loop per category. The loops run until the
/// lifecycle token passed to `join` (or [`MeshNetwork::shutdown`]) cancels
/// them, or until their subscription fails.
pub struct MeshNetwork {
    user: User,
    topics: TopicTable,
    store: Arc<MessageStore>,
    observers: Arc<ObserverRegistry>,
    health: BTreeMap<Category, Arc<LoopHealth>>,
    options: NetworkOptions,
    cancel: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl MeshNetwork {
    /// Join every category and start dispatching.
    pub async fn join(
        transport: &dyn Transport,
        nickname: &str,
        options: NetworkOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Self::join_categories(transport, nickname, &Category::ALL, options, cancel).await
    }

    /// Join only `categories`. Fails without starting anything if any join fails.
    pub async fn join_categories(
        transport: &dyn Transport,
        nickname: &str,
        categories: &[Category],
        options: NetworkOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let user = User::new(nickname, transport.local_id());
        let (topics, subscriptions) = TopicTable::join(transport, categories).await?;

        let store = Arc::new(MessageStore::new());
        let observers = Arc::new(ObserverRegistry::new());
        let cancel = cancel.child_token();
        let mut health = BTreeMap::new();
        let mut loops = Vec::with_capacity(subscriptions.len());

        for (category, subscription) in subscriptions {
            let loop_health = Arc::new(LoopHealth::new(category));
            health.insert(category, Arc::clone(&loop_health));
            loops.push(
                DispatchLoop {
                    category,
                    subscription,
                    local_id: user.node_id.clone(),
                    store: Arc::clone(&store),
                    observers: Arc::clone(&observers),
                    health: loop_health,
                    cancel: cancel.clone(),
                }
                .spawn(),
            );
        }

        info!(
            user_id = %user.id,
            nickname = %user.nickname,
            node_id = %user.node_id,
            topics = ?topics.categories(),
            "mesh network joined"
        );

        Ok(Self {
            user,
            topics,
            store,
            observers,
            health,
            options,
            cancel,
            loops: Mutex::new(loops),
        })
    }

    /// Build a message from `content` and broadcast it on `category`'s topic.
    pub async fn publish(
        &self,
        content: impl Into<String>,
        category: Category,
    ) -> Result<PublishOutcome> {
        let message = Message::new(content, category, self.user.clone());
        let payload = encode_message(&message)?;

        let Some(publisher) = self.topics.publisher(category) else {
            return match self.options.unjoined {
                UnjoinedPolicy::Ignore => {
                    debug!(category = %category, "publish to unjoined category ignored");
                    Ok(PublishOutcome::NotJoined(category))
                }
                UnjoinedPolicy::Reject => Err(MeshCommError::NotJoined(category)),
            };
        };

        publisher.broadcast(payload).await.map_err(|e| match e {
            MeshCommError::Publish { .. } => e,
            other => MeshCommError::Publish {
                topic: publisher.topic().to_string(),
                reason: other.to_string(),
            },
        })?;
        info!(category = %category, id = %message.id, "message published");

        if self.options.local_echo {
            self.store.append(message.clone());
            self.observers.notify(&message);
        }

        Ok(PublishOutcome::Sent(message))
    }

    /// Copy of every message received so far, in arrival order.
    pub fn messages(&self) -> Vec<Message> {
        self.store.snapshot()
    }

    /// Copy of the received messages of one category.
    pub fn messages_in(&self, category: Category) -> Vec<Message> {
        self.store.snapshot_category(category)
    }

    /// Register a callback for every accepted message.
    pub fn on_message<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.observers.register(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn node_id(&self) -> &str {
        &self.user.node_id
    }

    pub fn options(&self) -> NetworkOptions {
        self.options
    }

    pub fn joined_categories(&self) -> Vec<Category> {
        self.topics.categories()
    }

    /// State and counters of every dispatch loop.
    pub fn health(&self) -> Vec<TopicHealth> {
        self.health.values().map(|h| h.snapshot()).collect()
    }

    /// `true` while every dispatch loop is running.
    pub fn is_healthy(&self) -> bool {
        self.health.values().all(|h| h.state().is_running())
    }

    /// Cancel every dispatch loop and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            let _ = handle.await;
        }
        info!("mesh network stopped");
    }
}

impl Drop for MeshNetwork {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
