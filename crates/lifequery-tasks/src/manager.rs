//! Single-flight task manager.
//!
//! At most one operation of each kind runs at a time; a second start is
//! rejected with [`Error::Conflict`]. Each admitted task gets a cancel
//! token and an open operation-log entry; the handle's `finish` closes the
//! entry with the derived terminal status.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use lifequery_core::{CancelToken, Error, IngestCounts, OperationKind, OperationStatus, Result};
use lifequery_db::OpLogStore;

type Slots = Arc<Mutex<HashMap<OperationKind, CancelToken>>>;

/// Admission control for background operations.
#[derive(Clone, Default)]
pub struct TaskManager {
    slots: Slots,
}

/// A claimed task slot. Dropping the handle frees the slot; call
/// [`TaskHandle::finish`] to also close the operation-log entry.
#[derive(Debug)]
pub struct TaskHandle {
    kind: OperationKind,
    cancel: CancelToken,
    log_id: i64,
    slots: Slots,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `kind` and open its operation-log entry.
    pub async fn begin(&self, kind: OperationKind, log: &OpLogStore) -> Result<TaskHandle> {
        {
            let mut slots = self.slots.lock().expect("task slots lock poisoned");
            if slots.contains_key(&kind) {
                return Err(Error::Conflict(kind.to_string()));
            }
            slots.insert(kind, CancelToken::new());
        }

        let log_id = match log.open(kind).await {
            Ok(id) => id,
            Err(e) => {
                self.release(kind);
                return Err(e);
            }
        };

        let cancel = self
            .slots
            .lock()
            .expect("task slots lock poisoned")
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        info!(subsystem = "tasks", op = %kind, log_id, "Task admitted");
        Ok(TaskHandle {
            kind,
            cancel,
            log_id,
            slots: self.slots.clone(),
        })
    }

    /// Signal the running task of `kind`, if any. Returns whether a task
    /// was signalled.
    pub fn cancel(&self, kind: OperationKind) -> bool {
        let slots = self.slots.lock().expect("task slots lock poisoned");
        match slots.get(&kind) {
            Some(token) => {
                token.cancel();
                info!(subsystem = "tasks", op = %kind, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, kind: OperationKind) -> bool {
        self.slots
            .lock()
            .expect("task slots lock poisoned")
            .contains_key(&kind)
    }

    fn release(&self, kind: OperationKind) {
        self.slots
            .lock()
            .expect("task slots lock poisoned")
            .remove(&kind);
    }
}

impl TaskHandle {
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn log_id(&self) -> i64 {
        self.log_id
    }

    /// Close the operation-log entry with the status derived from the
    /// outcome, then free the slot.
    pub async fn finish(self, log: &OpLogStore, outcome: &Result<IngestCounts>) -> Result<()> {
        let (status, counts, detail) = match outcome {
            Ok(counts) if counts.cancelled => (OperationStatus::Cancelled, *counts, None),
            Ok(counts) => (OperationStatus::Success, *counts, None),
            Err(Error::Cancelled(_)) => {
                (OperationStatus::Cancelled, IngestCounts::default(), None)
            }
            Err(e) => (
                OperationStatus::Error,
                IngestCounts::default(),
                Some(e.to_string()),
            ),
        };
        info!(
            subsystem = "tasks",
            op = %self.kind,
            log_id = self.log_id,
            status = status.as_str(),
            "Task finished"
        );
        log.finish(self.log_id, status, &counts, detail.as_deref())
            .await
        // The slot is freed by Drop.
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.slots
            .lock()
            .expect("task slots lock poisoned")
            .remove(&self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifequery_db::Database;

    #[tokio::test]
    async fn second_start_of_same_kind_is_rejected() {
        let db = Database::connect_memory().await.unwrap();
        let manager = TaskManager::new();

        let handle = manager.begin(OperationKind::Sync, &db.log).await.unwrap();
        let err = manager.begin(OperationKind::Sync, &db.log).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Other kinds still run concurrently.
        let other = manager.begin(OperationKind::Reindex, &db.log).await.unwrap();
        drop(other);
        drop(handle);

        // Slot is free again.
        assert!(manager.begin(OperationKind::Sync, &db.log).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_trips_the_running_token() {
        let db = Database::connect_memory().await.unwrap();
        let manager = TaskManager::new();

        assert!(!manager.cancel(OperationKind::Sync));

        let handle = manager.begin(OperationKind::Sync, &db.log).await.unwrap();
        let token = handle.cancel_token();
        assert!(manager.cancel(OperationKind::Sync));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn finish_writes_terminal_status() {
        let db = Database::connect_memory().await.unwrap();
        let manager = TaskManager::new();

        // Success path.
        let handle = manager.begin(OperationKind::Sync, &db.log).await.unwrap();
        let counts = IngestCounts {
            messages_added: 3,
            ..Default::default()
        };
        handle.finish(&db.log, &Ok(counts)).await.unwrap();

        // Cancelled path via counts.
        let handle = manager.begin(OperationKind::Sync, &db.log).await.unwrap();
        let cancelled = IngestCounts {
            messages_added: 100,
            cancelled: true,
            ..Default::default()
        };
        handle.finish(&db.log, &Ok(cancelled)).await.unwrap();

        // Error path.
        let handle = manager.begin(OperationKind::Reindex, &db.log).await.unwrap();
        handle
            .finish(&db.log, &Err(Error::Upstream("boom".to_string())))
            .await
            .unwrap();

        let tail = db.log.tail(10).await.unwrap();
        assert_eq!(tail.len(), 3);
        let statuses: Vec<Option<&str>> = tail.iter().map(|e| e.status.as_deref()).collect();
        assert!(statuses.contains(&Some("success")));
        assert!(statuses.contains(&Some("cancelled")));
        assert!(statuses.contains(&Some("error")));

        let cancelled_entry = tail
            .iter()
            .find(|e| e.status.as_deref() == Some("cancelled"))
            .unwrap();
        assert_eq!(cancelled_entry.messages_added, 100);

        let error_entry = tail
            .iter()
            .find(|e| e.status.as_deref() == Some("error"))
            .unwrap();
        assert!(error_entry.detail.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn is_running_tracks_slot_lifetime() {
        let db = Database::connect_memory().await.unwrap();
        let manager = TaskManager::new();
        assert!(!manager.is_running(OperationKind::Import));
        let handle = manager.begin(OperationKind::Import, &db.log).await.unwrap();
        assert!(manager.is_running(OperationKind::Import));
        drop(handle);
        assert!(!manager.is_running(OperationKind::Import));
    }
}
