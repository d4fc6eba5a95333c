// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! REST client for a PostgREST (Supabase) backend.
//!
//! Handles:
//! - Row reads and writes on the `itinerary` and `activities` tables
//! - Auth headers (`apikey` plus the user's bearer token)
//! - A polling change feed that diffs successive snapshots

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::db::{tables, ChangeFeed, ChangeFilter, DataStore, FeedMessage};
use crate::error::{AppError, Result};
use crate::models::{
    Activity, ActivityPatch, ChangeKind, Itinerary, NewActivity, NewItinerary, Notification, Table,
};

/// PostgREST database client.
#[derive(Clone)]
pub struct PostgrestDb {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: String,
    poll_interval: Duration,
    feed_buffer: usize,
}

#[derive(Serialize)]
struct ItineraryInsert<'a> {
    user_id: &'a str,
    #[serde(flatten)]
    input: &'a NewItinerary,
}

impl PostgrestDb {
    /// Create a client from the application config.
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/rest/v1", config.supabase_url),
            anon_key: config.supabase_anon_key.clone(),
            access_token: config.access_token.clone(),
            poll_interval: config.poll_interval,
            feed_buffer: config.feed_buffer.max(1),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.access_token)
    }

    async fn get_rows<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| AppError::Backend(e.to_string()))?;

        check_response_json(response).await
    }

    /// Send a write and return the rows the server echoes back.
    async fn write_rows<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Vec<T>> {
        let mut request = self
            .request(method, url)
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Backend(e.to_string()))?;

        check_response_json(response).await
    }

    /// URL listing every row a filter covers, as raw JSON.
    fn snapshot_url(&self, filter: &ChangeFilter) -> String {
        match (filter.table, &filter.user_id) {
            (Table::Itinerary, Some(user_id)) => format!(
                "{}?select=*&user_id=eq.{}",
                self.table_url(tables::ITINERARY),
                urlencoding::encode(user_id)
            ),
            (Table::Itinerary, None) => format!("{}?select=*", self.table_url(tables::ITINERARY)),
            // Embedding the parent row lets the server filter by owner.
            (Table::Activities, Some(user_id)) => format!(
                "{}?select=*,itinerary!inner(user_id)&itinerary.user_id=eq.{}",
                self.table_url(tables::ACTIVITIES),
                urlencoding::encode(user_id)
            ),
            (Table::Activities, None) => {
                format!("{}?select=*", self.table_url(tables::ACTIVITIES))
            }
        }
    }

    async fn fetch_snapshot(&self, filter: &ChangeFilter) -> Result<Snapshot> {
        let rows: Vec<Value> = self.get_rows(&self.snapshot_url(filter)).await?;
        Ok(index_rows(rows))
    }
}

/// Where the polling feed reads its table snapshots from.
#[async_trait]
trait SnapshotSource: Send + Sync + 'static {
    async fn snapshot(&self, filter: &ChangeFilter) -> Result<Snapshot>;
}

#[async_trait]
impl SnapshotSource for PostgrestDb {
    async fn snapshot(&self, filter: &ChangeFilter) -> Result<Snapshot> {
        self.fetch_snapshot(filter).await
    }
}

#[async_trait]
impl DataStore for PostgrestDb {
    async fn list_itineraries(&self, user_id: &str) -> Result<Vec<Itinerary>> {
        let url = format!(
            "{}?select=*&user_id=eq.{}&order=start_date.asc",
            self.table_url(tables::ITINERARY),
            urlencoding::encode(user_id)
        );
        self.get_rows(&url).await
    }

    async fn list_activities(&self, itinerary_ids: &[String]) -> Result<Vec<Activity>> {
        if itinerary_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = itinerary_ids
            .iter()
            .map(|id| format!("\"{}\"", id.replace('"', "")))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}?select=*&itinerary_id=in.({})&order=date.asc",
            self.table_url(tables::ACTIVITIES),
            urlencoding::encode(&ids)
        );
        self.get_rows(&url).await
    }

    async fn insert_itinerary(&self, user_id: &str, input: &NewItinerary) -> Result<Itinerary> {
        let body = ItineraryInsert { user_id, input };
        let rows = self
            .write_rows(
                reqwest::Method::POST,
                &self.table_url(tables::ITINERARY),
                Some(&body),
            )
            .await?;
        first_row(rows, tables::ITINERARY)
    }

    async fn insert_activity(&self, input: &NewActivity) -> Result<Activity> {
        let rows = self
            .write_rows(
                reqwest::Method::POST,
                &self.table_url(tables::ACTIVITIES),
                Some(input),
            )
            .await?;
        first_row(rows, tables::ACTIVITIES)
    }

    async fn update_activity(&self, id: &str, patch: &ActivityPatch) -> Result<Activity> {
        let url = format!(
            "{}?id=eq.{}",
            self.table_url(tables::ACTIVITIES),
            urlencoding::encode(id)
        );
        let rows: Vec<Activity> = self
            .write_rows(reqwest::Method::PATCH, &url, Some(patch))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("activity {}", id)))
    }

    async fn delete_activity(&self, id: &str) -> Result<()> {
        let url = format!(
            "{}?id=eq.{}",
            self.table_url(tables::ACTIVITIES),
            urlencoding::encode(id)
        );
        let _: Vec<Value> = self
            .write_rows::<Value, _>(reqwest::Method::DELETE, &url, None)
            .await?;
        Ok(())
    }

    async fn delete_itinerary(&self, id: &str) -> Result<()> {
        let url = format!(
            "{}?id=eq.{}",
            self.table_url(tables::ITINERARY),
            urlencoding::encode(id)
        );
        let _: Vec<Value> = self
            .write_rows::<Value, _>(reqwest::Method::DELETE, &url, None)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeFeed> {
        // Take the baseline before returning so that every change after
        // this call is reported.
        let baseline = self.fetch_snapshot(&filter).await?;
        let (tx, rx) = mpsc::channel(self.feed_buffer);

        tracing::info!(
            table = filter.table.as_str(),
            interval_secs = self.poll_interval.as_secs(),
            "Polling change feed started"
        );

        let producer = tokio::spawn(poll_changes(
            self.clone(),
            filter,
            self.poll_interval,
            baseline,
            tx,
        ));
        Ok(ChangeFeed::with_producer(rx, producer))
    }
}

/// Rows keyed by id.
type Snapshot = BTreeMap<String, Value>;

fn index_rows(rows: Vec<Value>) -> Snapshot {
    rows.into_iter()
        .filter_map(|mut row| {
            // Embedded parent rows are only used for filtering.
            if let Some(obj) = row.as_object_mut() {
                obj.remove(tables::ITINERARY);
            }
            let id = row.get("id").and_then(Value::as_str)?.to_string();
            Some((id, row))
        })
        .collect()
}

/// Notifications turning `previous` into `current`.
pub(crate) fn diff_snapshots(
    table: Table,
    previous: &Snapshot,
    current: &Snapshot,
) -> Vec<Notification> {
    let mut changes = Vec::new();

    for (id, row) in current {
        let event_type = match previous.get(id) {
            None => ChangeKind::Insert,
            Some(old) if old != row => ChangeKind::Update,
            Some(_) => continue,
        };
        changes.push(Notification {
            table,
            event_type,
            new_record: Some(row.clone()),
            old_record: None,
        });
    }

    for id in previous.keys().filter(|id| !current.contains_key(*id)) {
        changes.push(Notification {
            table,
            event_type: ChangeKind::Delete,
            new_record: None,
            old_record: Some(serde_json::json!({ "id": id })),
        });
    }

    changes
}

/// Poll `source` every `interval` and send the differences. A failed
/// poll ends the feed with [`FeedMessage::Dropped`].
async fn poll_changes<S: SnapshotSource>(
    source: S,
    filter: ChangeFilter,
    interval: Duration,
    mut previous: Snapshot,
    tx: mpsc::Sender<FeedMessage>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the baseline is fresh.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let current = match source.snapshot(&filter).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(table = filter.table.as_str(), error = %e, "Poll failed");
                let _ = tx.send(FeedMessage::Dropped(e.to_string())).await;
                return;
            }
        };

        let changes = diff_snapshots(filter.table, &previous, &current);
        if !changes.is_empty() {
            tracing::debug!(
                table = filter.table.as_str(),
                count = changes.len(),
                "Poll found changes"
            );
        }
        for change in changes {
            if tx.send(FeedMessage::Change(change)).await.is_err() {
                return;
            }
        }
        previous = current;
    }
}

fn first_row<T>(rows: Vec<T>, table: &str) -> Result<T> {
    rows.into_iter().next().ok_or_else(|| {
        AppError::Backend(format!(
            "{}: no {} row returned",
            AppError::BACKEND_REJECTED,
            table
        ))
    })
}

/// Check response status and decode JSON if successful.
async fn check_response_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 {
            tracing::warn!("Backend rejected credentials (401)");
            return Err(AppError::Unauthorized);
        }

        // The server refused the request itself; retrying will not help.
        if status.is_client_error() {
            return Err(AppError::Backend(format!(
                "{}: HTTP {}: {}",
                AppError::BACKEND_REJECTED,
                status,
                body
            )));
        }

        return Err(AppError::Backend(format!("HTTP {}: {}", status, body)));
    }

    // DELETE with return=representation may legitimately be empty.
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Backend(e.to_string()))?;
    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) {
        &b"[]"[..]
    } else {
        &bytes[..]
    };
    serde_json::from_slice(bytes)
        .map_err(|e| AppError::Backend(format!("Failed to parse response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn snapshot(rows: Vec<Value>) -> Snapshot {
        index_rows(rows)
    }

    /// Answers polls from a fixed list, then fails.
    struct ScriptedSource {
        replies: Mutex<VecDeque<Result<Snapshot>>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<Snapshot>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn snapshot(&self, _filter: &ChangeFilter) -> Result<Snapshot> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Backend("no more replies".to_string())))
        }
    }

    fn polled_feed(source: ScriptedSource, baseline: Snapshot) -> ChangeFeed {
        let (tx, rx) = mpsc::channel(8);
        let producer = tokio::spawn(poll_changes(
            source,
            ChangeFilter::table(Table::Activities),
            Duration::from_millis(5),
            baseline,
            tx,
        ));
        ChangeFeed::with_producer(rx, producer)
    }

    #[tokio::test]
    async fn test_poll_reports_changes_then_drops_on_failure() {
        let source = ScriptedSource::new(vec![
            Ok(snapshot(vec![json!({"id": "a1", "cost": 10})])),
            Err(AppError::Backend("HTTP 503 Service Unavailable".to_string())),
        ]);
        let mut feed = polled_feed(source, Snapshot::new());

        match feed.next().await {
            FeedMessage::Change(n) => {
                assert_eq!(n.event_type, ChangeKind::Insert);
                assert_eq!(n.new_record, Some(json!({"id": "a1", "cost": 10})));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        match feed.next().await {
            FeedMessage::Dropped(reason) => assert!(reason.contains("503"), "{}", reason),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unchanged_polls_send_nothing() {
        let rows = snapshot(vec![json!({"id": "a1", "cost": 10})]);
        let source = ScriptedSource::new(vec![Ok(rows.clone()), Ok(rows.clone())]);
        let mut feed = polled_feed(source, rows);

        // The third poll runs out of replies and fails.
        assert!(matches!(feed.next().await, FeedMessage::Dropped(_)));
    }

    #[test]
    fn test_diff_reports_each_kind() {
        let previous = snapshot(vec![
            json!({"id": "a1", "cost": 10}),
            json!({"id": "a2", "cost": 20}),
        ]);
        let current = snapshot(vec![
            json!({"id": "a1", "cost": 15}),
            json!({"id": "a3", "cost": 5}),
        ]);

        let changes = diff_snapshots(Table::Activities, &previous, &current);
        let kinds: Vec<_> = changes.iter().map(|n| n.event_type).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Update, ChangeKind::Insert, ChangeKind::Delete]
        );
        assert_eq!(changes[2].old_record, Some(json!({"id": "a2"})));
    }

    #[test]
    fn test_diff_of_identical_snapshots_is_empty() {
        let rows = snapshot(vec![json!({"id": "t1", "title": "Trip"})]);
        assert!(diff_snapshots(Table::Itinerary, &rows, &rows).is_empty());
    }

    #[test]
    fn test_embedded_parent_is_stripped() {
        let rows = snapshot(vec![json!({
            "id": "a1",
            "itinerary_id": "t1",
            "itinerary": {"user_id": "u1"}
        })]);
        assert_eq!(rows["a1"], json!({"id": "a1", "itinerary_id": "t1"}));
    }

    #[test]
    fn test_urls() {
        let db = PostgrestDb::new(&Config::test_default());
        assert_eq!(
            db.table_url(tables::ACTIVITIES),
            "http://localhost:54321/rest/v1/activities"
        );
        let url = db.snapshot_url(&ChangeFilter::owned_by(Table::Itinerary, "user 1"));
        assert!(url.ends_with("user_id=eq.user%201"));
    }

    #[test]
    fn test_itinerary_insert_body() {
        let input = NewItinerary::new(
            "Trip",
            None,
            chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
        );
        let body = serde_json::to_value(ItineraryInsert {
            user_id: "u1",
            input: &input,
        })
        .unwrap();
        assert_eq!(body["user_id"], "u1");
        assert_eq!(body["start_date"], "2024-06-01");
    }
}
