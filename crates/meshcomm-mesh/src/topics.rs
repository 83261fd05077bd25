use std::collections::BTreeMap;
use std::sync::Arc;

use meshcomm_core::{Category, MeshCommError, Result};
use tracing::info;

use crate::transport::{TopicPublisher, TopicSubscription, Transport};

/// Category → publish handle, populated once at startup and read-only after.
pub struct TopicTable {
    publishers: BTreeMap<Category, Arc<dyn TopicPublisher>>,
}

impl TopicTable {
    /// Join every category in `categories`.
    ///
    /// Either all joins succeed, or the first failure is returned and nothing
    /// is kept. The subscriptions are handed back so the caller can start one
    /// dispatch loop per category once the whole table exists.
    pub async fn join(
        transport: &dyn Transport,
        categories: &[Category],
    ) -> Result<(Self, Vec<(Category, Box<dyn TopicSubscription>)>)> {
        let mut publishers = BTreeMap::new();
        let mut subscriptions = Vec::with_capacity(categories.len());

        for &category in categories {
            if publishers.contains_key(&category) {
                continue;
            }
            let (publisher, subscription) = join_category(transport, category).await?;
            publishers.insert(category, publisher);
            subscriptions.push((category, subscription));
        }

        Ok((Self { publishers }, subscriptions))
    }

    pub fn publisher(&self, category: Category) -> Option<&Arc<dyn TopicPublisher>> {
        self.publishers.get(&category)
    }

    pub fn contains(&self, category: Category) -> bool {
        self.publishers.contains_key(&category)
    }

    /// Joined categories, in declaration order.
    pub fn categories(&self) -> Vec<Category> {
        self.publishers.keys().copied().collect()
    }
}

/// Publish handle first, then the subscription, on the category's topic.
async fn join_category(
    transport: &dyn Transport,
    category: Category,
) -> Result<(Arc<dyn TopicPublisher>, Box<dyn TopicSubscription>)> {
    let topic = category.topic();
    let publisher = transport
        .join_topic(topic)
        .await
        .map_err(|e| as_join_error(topic, e))?;
    let subscription = transport
        .subscribe(topic)
        .await
        .map_err(|e| as_join_error(topic, e))?;
    info!(category = %category, "joined topic");
    Ok((publisher, subscription))
}

fn as_join_error(topic: &str, err: MeshCommError) -> MeshCommError {
    match err {
        MeshCommError::Join { .. } => err,
        other => MeshCommError::Join {
            topic: topic.to_string(),
            reason: other.to_string(),
        },
    }
}
