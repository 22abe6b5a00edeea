//! In-memory repository and scripted analyzer used by the pipeline and
//! scheduler tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::analysis::analyzer::{AnalysisResult, FeedbackAnalyzer, RawTopic};
use crate::analysis::repository::{AnalysisRepository, RepositoryError};
use crate::analysis::scheduler::AnalysisScheduler;
use crate::config::AnalysisConfig;
use crate::llm_client::LlmError;
use crate::models::analysis::{
    AnalysisSnapshot, AnalysisStatus, NewSnapshot, NewTopicAssignment, Sentiment,
    SnapshotCompletion, TopicAssignment,
};
use crate::models::feedback::PendingItem;
use crate::state::AppState;

pub fn pending_items(count: usize) -> Vec<PendingItem> {
    let start = Utc::now() - ChronoDuration::hours(1);
    (0..count)
        .map(|i| PendingItem {
            id: Uuid::new_v4(),
            rating: (i % 5 + 1) as u8,
            comment: format!("Feedback number {i}"),
            created_at: start + ChronoDuration::seconds(i as i64),
        })
        .collect()
}

/// Router state backed by `repo` and a never-started scheduler. The pool is
/// lazy and never connects, so handlers that reach the database fail.
pub fn test_state(repo: Arc<InMemoryAnalysisRepository>) -> AppState {
    let db = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/feedback_test")
        .unwrap();
    let scheduler = AnalysisScheduler::new(
        AnalysisConfig::default(),
        repo.clone(),
        Arc::new(ScriptedAnalyzer::default()),
    );

    AppState {
        db,
        analyses: repo,
        scheduler,
    }
}

fn db_error() -> RepositoryError {
    RepositoryError::Database(sqlx::Error::PoolTimedOut)
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory repository
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Store {
    snapshots: Vec<AnalysisSnapshot>,
    members: HashMap<Uuid, BTreeSet<Uuid>>,
    topics: Vec<TopicAssignment>,
    links: HashMap<Uuid, BTreeSet<Uuid>>,
    /// Every status each snapshot has been observed in, in order.
    history: HashMap<Uuid, Vec<AnalysisStatus>>,
}

#[derive(Default)]
pub struct InMemoryAnalysisRepository {
    store: Mutex<Store>,
    pub fail_create_snapshot: AtomicBool,
    pub fail_topic_writes: AtomicBool,
    /// `create_snapshot` never returns, like a database that stopped answering.
    pub hang_create_snapshot: AtomicBool,
}

impl InMemoryAnalysisRepository {
    pub fn snapshots(&self) -> Vec<AnalysisSnapshot> {
        self.store.lock().unwrap().snapshots.clone()
    }

    pub fn topics(&self) -> Vec<TopicAssignment> {
        self.store.lock().unwrap().topics.clone()
    }

    pub fn members(&self, analysis_id: Uuid) -> Vec<Uuid> {
        self.store
            .lock()
            .unwrap()
            .members
            .get(&analysis_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn status_history(&self, analysis_id: Uuid) -> Vec<AnalysisStatus> {
        self.store
            .lock()
            .unwrap()
            .history
            .get(&analysis_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert_snapshot(&self, snapshot: AnalysisSnapshot) {
        let mut store = self.store.lock().unwrap();
        store
            .history
            .entry(snapshot.id)
            .or_default()
            .push(snapshot.status);
        store.snapshots.push(snapshot);
    }
}

#[async_trait]
impl AnalysisRepository for InMemoryAnalysisRepository {
    async fn create_snapshot(&self, new: NewSnapshot) -> Result<AnalysisSnapshot, RepositoryError> {
        if self.hang_create_snapshot.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_create_snapshot.load(Ordering::SeqCst) {
            return Err(db_error());
        }
        let snapshot = new.into_snapshot();
        self.insert_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    async fn update_snapshot(
        &self,
        id: Uuid,
        completion: SnapshotCompletion,
    ) -> Result<AnalysisSnapshot, RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let snapshot = store
            .snapshots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(RepositoryError::NotFound(id))?;
        if snapshot.status.is_terminal() {
            return Err(RepositoryError::AlreadyTerminal {
                id,
                status: snapshot.status,
            });
        }
        completion.apply(snapshot, Utc::now());
        let updated = snapshot.clone();
        store.history.entry(id).or_default().push(updated.status);
        Ok(updated)
    }

    async fn latest_snapshot(&self) -> Result<Option<AnalysisSnapshot>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .snapshots
            .iter()
            .filter(|s| s.status == AnalysisStatus::Success)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn snapshot_by_id(&self, id: Uuid) -> Result<Option<AnalysisSnapshot>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store.snapshots.iter().find(|s| s.id == id).cloned())
    }

    async fn list_snapshots(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisSnapshot>, RepositoryError> {
        let mut all = self.snapshots();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn create_feedback_membership(
        &self,
        analysis_id: Uuid,
        feedback_ids: &[Uuid],
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        store
            .members
            .entry(analysis_id)
            .or_default()
            .extend(feedback_ids.iter().copied());
        Ok(())
    }

    async fn create_topic_assignment(
        &self,
        new: NewTopicAssignment,
    ) -> Result<TopicAssignment, RepositoryError> {
        if self.fail_topic_writes.load(Ordering::SeqCst) {
            return Err(db_error());
        }
        let topic = TopicAssignment {
            id: Uuid::new_v4(),
            analysis_id: new.analysis_id,
            topic: new.topic,
            summary: new.summary,
            feedback_count: new.feedback_count,
            sentiment: new.sentiment,
            created_at: Utc::now(),
        };
        self.store.lock().unwrap().topics.push(topic.clone());
        Ok(topic)
    }

    async fn create_topic_links(
        &self,
        _analysis_id: Uuid,
        topic_id: Uuid,
        feedback_ids: &[Uuid],
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        store
            .links
            .entry(topic_id)
            .or_default()
            .extend(feedback_ids.iter().copied());
        Ok(())
    }

    async fn topics_by_snapshot_id(
        &self,
        analysis_id: Uuid,
    ) -> Result<Vec<TopicAssignment>, RepositoryError> {
        Ok(self
            .topics()
            .into_iter()
            .filter(|t| t.analysis_id == analysis_id)
            .collect())
    }

    async fn feedback_ids_by_topic_id(&self, topic_id: Uuid) -> Result<Vec<Uuid>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .links
            .get(&topic_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scripted analyzer
// ────────────────────────────────────────────────────────────────────────────

pub enum Scripted {
    Reply(AnalysisResult),
    /// Builds the reply from the batch it receives, so topic ids are valid.
    ReplyWith(Box<dyn Fn(&[PendingItem]) -> AnalysisResult + Send + Sync>),
    Fail(String),
    Panic,
}

/// Pops one scripted response per call; once the script is exhausted every
/// call succeeds with a plain summary.
#[derive(Default)]
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Scripted>>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
    /// Id of the previous analysis each call was given.
    pub previous_ids: Mutex<Vec<Option<Uuid>>>,
}

impl ScriptedAnalyzer {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn simple_result(summary: &str) -> AnalysisResult {
    AnalysisResult {
        summary: summary.to_string(),
        sentiment: Sentiment::Mixed,
        key_insights: vec!["Insight".to_string()],
        topics: Vec::new(),
        tokens_used: 1234,
    }
}

pub fn raw_topic(topic: &str, ids: &[Uuid]) -> RawTopic {
    RawTopic {
        topic: topic.to_string(),
        summary: format!("About {topic}"),
        sentiment: "negative".to_string(),
        feedback_ids: ids
            .iter()
            .map(|id| serde_json::Value::String(id.to_string()))
            .collect(),
    }
}

#[async_trait]
impl FeedbackAnalyzer for ScriptedAnalyzer {
    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn analyze(
        &self,
        batch: &[PendingItem],
        previous: Option<&AnalysisSnapshot>,
    ) -> Result<AnalysisResult, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(batch.len());
        self.previous_ids.lock().unwrap().push(previous.map(|p| p.id));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(result)) => Ok(result),
            Some(Scripted::ReplyWith(build)) => Ok(build(batch)),
            Some(Scripted::Fail(message)) => Err(LlmError::Api {
                status: 503,
                message,
            }),
            Some(Scripted::Panic) => panic!("scripted analyzer panic"),
            None => Ok(simple_result("Default analysis")),
        }
    }
}
