//! Result sinks
//!
//! Every collection job hands its final [`FetchResult`] to a [`ResultSink`]
//! exactly once. A sink failure is logged by the caller and never undoes the
//! fetch.
//!
//! Results worth analysing go through [`ResultSink::store_and_announce`], which
//! emits [`Event::ResultStored`] only once the result is actually stored.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::db::Database;
use crate::error::{OsintError, Result};
use crate::events::{Event, EventBus, ResultSummary};
use crate::types::FetchResult;

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store(&self, result: &FetchResult) -> Result<()>;

    /// Store `result`, then emit `ResultStored` on `events`
    ///
    /// Nothing is emitted when storing fails. Sinks that finish the write
    /// later must emit from wherever the write completes.
    async fn store_and_announce(&self, result: &FetchResult, events: &EventBus) -> Result<()> {
        self.store(result).await?;
        events.emit(Event::ResultStored(ResultSummary::from(result)));
        Ok(())
    }
}

/// Stores results in the `fetch_results` table
pub struct DatabaseSink {
    db: Database,
}

impl DatabaseSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResultSink for DatabaseSink {
    async fn store(&self, result: &FetchResult) -> Result<()> {
        let id = self.db.insert_fetch_result(result).await?;
        debug!(id, target = %result.target, items = result.item_count(), "result stored");
        Ok(())
    }
}

/// Writes each result as pretty JSON under `<root>/<platform>/<username>/`
///
/// Files are named `data_<YYYYmmdd_HHMMSS_mmm>.json`; `latest.json` beside them
/// always holds the most recent result.
pub struct JsonDirSink {
    root: PathBuf,
}

impl JsonDirSink {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: PathBuf::from(shellexpand::tilde(&root.as_ref().to_string_lossy()).to_string()),
        }
    }

    pub fn target_dir(&self, result: &FetchResult) -> PathBuf {
        self.root
            .join(result.target.platform().as_str())
            .join(result.target.username())
    }
}

fn io_error(path: &Path, e: std::io::Error) -> OsintError {
    OsintError::Sink(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl ResultSink for JsonDirSink {
    async fn store(&self, result: &FetchResult) -> Result<()> {
        let dir = self.target_dir(result);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let body = serde_json::to_vec_pretty(result)
            .map_err(|e| OsintError::Sink(format!("failed to encode result: {}", e)))?;

        let file = dir.join(format!(
            "data_{}.json",
            result.fetched_at.format("%Y%m%d_%H%M%S_%3f")
        ));
        tokio::fs::write(&file, &body)
            .await
            .map_err(|e| io_error(&file, e))?;

        let latest = dir.join("latest.json");
        tokio::fs::write(&latest, &body)
            .await
            .map_err(|e| io_error(&latest, e))?;

        debug!(path = %file.display(), "result written");
        Ok(())
    }
}

/// Sends every result to all inner sinks
///
/// All sinks are attempted; the first error is returned.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ResultSink for FanoutSink {
    async fn store(&self, result: &FetchResult) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.store(result).await {
                warn!(target = %result.target, error = %e, "sink failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Hands results to a background worker through a bounded channel
///
/// `store` returns as soon as the result is queued; the worker logs inner
/// sink failures. An announced result is emitted by the worker after the
/// inner sink accepted it. Call [`BackgroundSink::close`] on shutdown to flush.
pub struct BackgroundSink {
    sender: Mutex<Option<mpsc::Sender<Queued>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Queued {
    result: FetchResult,
    announce: Option<EventBus>,
}

impl BackgroundSink {
    pub fn spawn(inner: Arc<dyn ResultSink>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Queued>(capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(Queued { result, announce }) = receiver.recv().await {
                let stored = match &announce {
                    Some(events) => inner.store_and_announce(&result, events).await,
                    None => inner.store(&result).await,
                };
                if let Err(e) = stored {
                    error!(target = %result.target, error = %e, "failed to store result");
                }
            }
            debug!("result sink worker drained");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn enqueue(&self, queued: Queued) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| OsintError::Sink("result sink is closed".to_string()))?;

        sender
            .send(queued)
            .await
            .map_err(|_| OsintError::Sink("result sink worker stopped".to_string()))
    }

    /// Stop accepting results and wait for queued ones to be stored
    pub async fn close(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "result sink worker panicked");
            }
        }
    }
}

#[async_trait]
impl ResultSink for BackgroundSink {
    async fn store(&self, result: &FetchResult) -> Result<()> {
        self.enqueue(Queued {
            result: result.clone(),
            announce: None,
        })
        .await
    }

    async fn store_and_announce(&self, result: &FetchResult, events: &EventBus) -> Result<()> {
        self.enqueue(Queued {
            result: result.clone(),
            announce: Some(events.clone()),
        })
        .await
    }
}

/// Keeps results in memory; for tests and embedding
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<FetchResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<FetchResult> {
        self.results.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn store(&self, result: &FetchResult) -> Result<()> {
        self.results.lock().push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Platform, Target};
    use tempfile::TempDir;

    struct FailingSink;

    #[async_trait]
    impl ResultSink for FailingSink {
        async fn store(&self, _result: &FetchResult) -> Result<()> {
            Err(OsintError::Sink("disk full".to_string()))
        }
    }

    fn result() -> FetchResult {
        let target = Target::new(Platform::Instagram, "alice").unwrap();
        FetchResult::ok(target, vec![serde_json::json!({"id": 1})])
    }

    #[tokio::test]
    async fn test_json_dir_layout() {
        let dir = TempDir::new().unwrap();
        let sink = JsonDirSink::new(dir.path());
        let result = result();

        sink.store(&result).await.unwrap();

        let target_dir = dir.path().join("instagram").join("alice");
        let latest = std::fs::read_to_string(target_dir.join("latest.json")).unwrap();
        let parsed: FetchResult = serde_json::from_str(&latest).unwrap();
        assert_eq!(parsed, result);

        let data_files: Vec<_> = std::fs::read_dir(&target_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("data_"))
            .collect();
        assert_eq!(data_files.len(), 1);
    }

    #[tokio::test]
    async fn test_database_sink() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("sink.db").to_str().unwrap())
            .await
            .unwrap();
        let sink = DatabaseSink::new(db.clone());

        sink.store(&result()).await.unwrap();
        assert_eq!(db.recent_results(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fanout_tries_every_sink() {
        let memory = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new(vec![
            Arc::new(FailingSink),
            memory.clone() as Arc<dyn ResultSink>,
        ]);

        let err = fanout.store(&result()).await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_background_sink_flushes_on_close() {
        let memory = Arc::new(MemorySink::new());
        let sink = BackgroundSink::spawn(memory.clone(), 4);

        for _ in 0..10 {
            sink.store(&result()).await.unwrap();
        }
        sink.close().await;

        assert_eq!(memory.len(), 10);
        assert!(sink.store(&result()).await.is_err());
    }

    #[tokio::test]
    async fn test_background_sink_survives_inner_failure() {
        let sink = BackgroundSink::spawn(Arc::new(FailingSink), 2);
        let target = Target::new(Platform::Twitter, "bob").unwrap();

        sink.store(&FetchResult::failed(target, ErrorKind::AuthRequired, "login"))
            .await
            .unwrap();
        sink.close().await;
    }

    fn stored_events(receiver: &mut crate::events::EventReceiver) -> usize {
        let mut count = 0;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, Event::ResultStored(_)) {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_background_sink_announces_after_inner_store() {
        let events = EventBus::new(16);
        let mut receiver = events.subscribe();
        let memory = Arc::new(MemorySink::new());
        let sink = BackgroundSink::spawn(memory.clone(), 4);

        sink.store_and_announce(&result(), &events).await.unwrap();
        sink.store(&result()).await.unwrap();
        sink.close().await;

        assert_eq!(memory.len(), 2);
        assert_eq!(stored_events(&mut receiver), 1);
    }

    #[tokio::test]
    async fn test_background_sink_no_announcement_when_inner_fails() {
        let events = EventBus::new(16);
        let mut receiver = events.subscribe();
        let sink = BackgroundSink::spawn(Arc::new(FailingSink), 4);

        sink.store_and_announce(&result(), &events).await.unwrap();
        sink.close().await;

        assert_eq!(stored_events(&mut receiver), 0);
    }

    #[tokio::test]
    async fn test_fanout_announces_only_when_every_sink_stored() {
        let events = EventBus::new(16);
        let mut receiver = events.subscribe();
        let fanout = FanoutSink::new(vec![
            Arc::new(MemorySink::new()) as Arc<dyn ResultSink>,
            Arc::new(FailingSink),
        ]);

        assert!(fanout.store_and_announce(&result(), &events).await.is_err());
        assert_eq!(stored_events(&mut receiver), 0);
    }
}
