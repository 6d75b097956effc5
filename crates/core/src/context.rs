//! Per-request reconciliation context.
//!
//! A [`RequestContext`] is created for one inbound request and passed by reference through the
//! call chain. It carries:
//! - the subject and the vendor transformer chosen once for that subject
//! - bundles already fetched from the remote, so repeated reads within the request reuse them
//! - readings this request created remotely
//! - handles of background write-back tasks
//!
//! Nothing in the context outlives the request. Dropping it detaches any write-backs still in
//! flight; [`RequestContext::finish_write_backs`] waits for them instead.

use crate::config::{ReconcileConfig, VendorProfile};
use crate::models::{Reading, ReadingKind, SubjectId};
use crate::transform::{transformer_for, VendorTransformer};
use crate::CoachResult;
use fhir::Bundle;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;

pub struct RequestContext {
    subject: SubjectId,
    transformer: Arc<dyn VendorTransformer>,
    bp_bundle: OnceCell<Bundle>,
    pulse_bundle: OnceCell<Bundle>,
    goal_bundle: OnceCell<Bundle>,
    created_remote: Mutex<Vec<Reading>>,
    write_backs: Mutex<Vec<JoinHandle<()>>>,
}

impl RequestContext {
    pub fn new(subject: SubjectId, profile: VendorProfile, config: Arc<ReconcileConfig>) -> Self {
        Self::with_transformer(subject, transformer_for(profile, config))
    }

    pub fn with_transformer(subject: SubjectId, transformer: Arc<dyn VendorTransformer>) -> Self {
        Self {
            subject,
            transformer,
            bp_bundle: OnceCell::new(),
            pulse_bundle: OnceCell::new(),
            goal_bundle: OnceCell::new(),
            created_remote: Mutex::new(Vec::new()),
            write_backs: Mutex::new(Vec::new()),
        }
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn transformer(&self) -> &Arc<dyn VendorTransformer> {
        &self.transformer
    }

    /// The remote observation bundle for `kind`, fetched on first use.
    ///
    /// A failed fetch is not cached; the next call tries again.
    pub async fn observation_bundle<F, Fut>(&self, kind: ReadingKind, fetch: F) -> CoachResult<&Bundle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoachResult<Bundle>>,
    {
        let cell = match kind {
            ReadingKind::BloodPressure => &self.bp_bundle,
            ReadingKind::Pulse => &self.pulse_bundle,
        };
        cell.get_or_try_init(fetch).await
    }

    /// The remote goal bundle, fetched on first use.
    pub async fn goal_bundle<F, Fut>(&self, fetch: F) -> CoachResult<&Bundle>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoachResult<Bundle>>,
    {
        self.goal_bundle.get_or_try_init(fetch).await
    }

    /// Remember a reading this request created on the remote, so later reads within the request
    /// see it even though the cached bundle predates it.
    pub async fn record_remote_reading(&self, reading: Reading) {
        self.created_remote.lock().await.push(reading);
    }

    pub async fn created_remote_readings(&self, kind: ReadingKind) -> Vec<Reading> {
        self.created_remote
            .lock()
            .await
            .iter()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect()
    }

    pub async fn track_write_back(&self, handle: JoinHandle<()>) {
        self.write_backs.lock().await.push(handle);
    }

    pub async fn pending_write_backs(&self) -> usize {
        self.write_backs
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait for every tracked write-back to complete. Returns how many were awaited.
    pub async fn finish_write_backs(&self) -> usize {
        let handles: Vec<_> = self.write_backs.lock().await.drain(..).collect();
        let count = handles.len();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(subject = %self.subject, error = %err, "write-back task did not complete");
            }
        }
        count
    }
}
