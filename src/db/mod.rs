//! Database layer: the backend contract and its implementations.

pub mod memory;
pub mod postgrest;

pub use memory::MemoryDb;
pub use postgrest::PostgrestDb;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::models::{Activity, ActivityPatch, Itinerary, NewActivity, NewItinerary, Notification, Table};

/// Table names as constants.
pub mod tables {
    pub const ITINERARY: &str = "itinerary";
    pub const ACTIVITIES: &str = "activities";
}

/// Which changes a feed delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    /// Only rows owned by this user (for activities: rows whose parent
    /// itinerary is owned by this user). `None` delivers every row the
    /// caller may see.
    pub user_id: Option<String>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            user_id: None,
        }
    }

    pub fn owned_by(table: Table, user_id: impl Into<String>) -> Self {
        Self {
            table,
            user_id: Some(user_id.into()),
        }
    }
}

/// One message on a change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Change(Notification),
    /// The feed is gone; anything after this point was not delivered.
    Dropped(String),
}

/// Receiving end of a change subscription.
///
/// A closed channel is reported as [`FeedMessage::Dropped`], so consumers
/// only have one failure path to handle. Dropping the feed stops any
/// producer task attached to it.
#[derive(Debug)]
pub struct ChangeFeed {
    rx: mpsc::Receiver<FeedMessage>,
    producer: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(rx: mpsc::Receiver<FeedMessage>) -> Self {
        Self { rx, producer: None }
    }

    /// Feed whose messages come from a spawned task.
    pub fn with_producer(rx: mpsc::Receiver<FeedMessage>, producer: JoinHandle<()>) -> Self {
        Self {
            rx,
            producer: Some(producer),
        }
    }

    /// Wait for the next message.
    pub async fn next(&mut self) -> FeedMessage {
        match self.rx.recv().await {
            Some(msg) => msg,
            None => FeedMessage::Dropped("channel closed".to_string()),
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Authoritative record store the client syncs against.
///
/// Every write returns the row as stored by the server (with its real id),
/// which is what the session reconciles its optimistic row against.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Itineraries owned by `user_id`.
    async fn list_itineraries(&self, user_id: &str) -> Result<Vec<Itinerary>>;

    /// Activities belonging to any of `itinerary_ids`.
    async fn list_activities(&self, itinerary_ids: &[String]) -> Result<Vec<Activity>>;

    async fn insert_itinerary(&self, user_id: &str, input: &NewItinerary) -> Result<Itinerary>;

    async fn insert_activity(&self, input: &NewActivity) -> Result<Activity>;

    async fn update_activity(&self, id: &str, patch: &ActivityPatch) -> Result<Activity>;

    async fn delete_activity(&self, id: &str) -> Result<()>;

    /// Delete an itinerary. The backend removes its activities with it.
    async fn delete_itinerary(&self, id: &str) -> Result<()>;

    /// Open a change feed for one table.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeFeed>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_channel_reads_as_drop() {
        let (tx, rx) = mpsc::channel(1);
        let mut feed = ChangeFeed::new(rx);
        drop(tx);
        assert!(matches!(feed.next().await, FeedMessage::Dropped(_)));
    }

    #[tokio::test]
    async fn test_dropping_feed_stops_producer() {
        let (_tx, rx) = mpsc::channel::<FeedMessage>(1);
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let producer = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        drop(ChangeFeed::with_producer(rx, producer));

        // The sender is only dropped once the producer is torn down.
        let closed = tokio::time::timeout(std::time::Duration::from_secs(1), alive_rx).await;
        assert!(matches!(closed, Ok(Err(_))));
    }

    #[test]
    fn test_table_names_match() {
        assert_eq!(Table::Itinerary.as_str(), tables::ITINERARY);
        assert_eq!(Table::Activities.as_str(), tables::ACTIVITIES);
    }
}
