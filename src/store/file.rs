//! JSON-file run store
//!
//! One document per run at `{dir}/{id}.json`. Every write goes to a
//! temporary file that is renamed over the document, so a reader always
//! sees a whole run. Writers are serialized per run id only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{check_append, check_transition, RunFilter, RunStore, RunSummary};
use super::{StoreError, StoreResult};
use crate::ci::{ResultEntry, Run, RunId, RunKind, RunMeta, RunStatus};

#[derive(Debug)]
pub struct FileRunStore {
    dir: PathBuf,
    locks: Mutex<HashMap<RunId, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileRunStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Document path of `id`; ids that could leave the store dir are rejected
    fn path_for(&self, id: &RunId) -> StoreResult<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty() || raw.starts_with('.') || raw.contains(['/', '\\']) {
            return Err(StoreError::InvalidId(id.clone()));
        }
        Ok(self.dir.join(format!("{}.json", raw)))
    }

    fn lock_for(&self, id: &RunId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.clone()).or_default().clone()
    }

    /// Forget a writer lock nobody holds, so the map only tracks busy runs
    fn release_lock(&self, id: &RunId) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn read(&self, id: &RunId) -> StoreResult<Run> {
        match tokio::fs::read(self.path_for(id)?).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, run: &Run) -> StoreResult<()> {
        let path = self.path_for(&run.id)?;
        let tmp = self.dir.join(format!(".{}.json.tmp", run.id));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(run)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn update(
        &self,
        id: &RunId,
        f: impl FnOnce(&mut Run) -> StoreResult<()> + Send,
    ) -> StoreResult<()> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;
        let updated = async {
            let mut run = self.read(id).await?;
            f(&mut run)?;
            self.write(&run).await
        }
        .await;
        drop(guard);
        drop(lock);
        self.release_lock(id);
        updated
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    async fn create(&self, kind: RunKind, meta: RunMeta) -> StoreResult<Run> {
        let run = Run::new(RunId::generate(), kind, meta);
        self.write(&run).await?;
        debug!(run_id = %run.id, dir = %self.dir.display(), "Created run document");
        Ok(run)
    }

    async fn append_result(&self, id: &RunId, entry: ResultEntry) -> StoreResult<()> {
        self.update(id, |run| {
            check_append(run)?;
            run.result.append(entry);
            Ok(())
        })
        .await
    }

    async fn set_status(&self, id: &RunId, status: RunStatus) -> StoreResult<()> {
        self.update(id, |run| {
            check_transition(run, status)?;
            run.status = status;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &RunId) -> StoreResult<Run> {
        self.read(id).await
    }

    async fn query(&self, filter: &RunFilter) -> StoreResult<Vec<RunSummary>> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Run>(&bytes) {
                Ok(run) => runs.push(run),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable run document"),
            }
        }

        Ok(filter.apply(runs.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scheduled(name: &str) -> RunKind {
        RunKind::Scheduled {
            schedule_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();

        let run = store
            .create(
                scheduled("nightly"),
                RunMeta {
                    triggered_by: Some("cron".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .append_result(&run.id, ResultEntry::log("Installation", RunStatus::Error, "boom"))
            .await
            .unwrap();
        store.set_status(&run.id, RunStatus::Error).await.unwrap();

        // A second handle over the same directory sees the same run
        let reopened = FileRunStore::open(dir.path()).await.unwrap();
        let stored = reopened.get(&run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Error);
        assert_eq!(stored.result.len(), 1);
        assert_eq!(stored.meta.triggered_by.as_deref(), Some("cron"));
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_different_runs() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileRunStore::open(dir.path()).await.unwrap());
        let a = store.create(scheduled("a"), RunMeta::default()).await.unwrap();
        let b = store.create(scheduled("b"), RunMeta::default()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            for id in [a.id.clone(), b.id.clone()] {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    store
                        .append_result(&id, ResultEntry::log(format!("{}", i), RunStatus::Success, ""))
                        .await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get(&a.id).await.unwrap().result.len(), 10);
        assert_eq!(store.get(&b.id).await.unwrap().result.len(), 10);
    }

    #[tokio::test]
    async fn test_query_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        store.create(scheduled("nightly"), RunMeta::default()).await.unwrap();
        std::fs::write(dir.path().join("README.txt"), "not a run").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let found = store.query(&RunFilter::schedule("nightly")).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_cannot_escape_store_dir() {
        let dir = tempdir().unwrap();
        let store = FileRunStore::open(dir.path().join("runs")).await.unwrap();
        std::fs::write(dir.path().join("outside.json"), "{}").unwrap();

        for id in ["../outside", "a/b", "..", ".hidden", ""] {
            assert!(
                matches!(store.get(&RunId::from(id)).await, Err(StoreError::InvalidId(_))),
                "{:?} accepted",
                id
            );
        }
        assert!(matches!(
            store.set_status(&RunId::from("../outside"), RunStatus::Success).await,
            Err(StoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_idle_runs_hold_no_lock() {
        let dir = tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();

        let run = store.create(scheduled("nightly"), RunMeta::default()).await.unwrap();
        store
            .append_result(&run.id, ResultEntry::log("step", RunStatus::Success, ""))
            .await
            .unwrap();
        store.set_status(&run.id, RunStatus::Success).await.unwrap();
        assert!(store.set_status(&run.id, RunStatus::Failure).await.is_err());
        assert_eq!(store.tracked_locks(), 0);

        assert_eq!(store.get(&run.id).await.unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_missing_run_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FileRunStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.get(&RunId::from("nope")).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
