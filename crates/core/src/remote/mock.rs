//! Scripted in-memory remote record system for tests.

use super::{ObservationQuery, RemoteRecordSystem};
use crate::models::SubjectId;
use crate::{CoachError, CoachResult};
use async_trait::async_trait;
use fhir::{
    Bundle, BundleEntry, BundleEntryResponse, BundleType, CapabilityStatement, Resource,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockRemote {
    /// Searchable observations and encounters.
    pub records: Mutex<Bundle>,
    pub goals: Mutex<Bundle>,
    pub capability: Mutex<CapabilityStatement>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub query_calls: AtomicUsize,
    pub goal_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub transaction_calls: AtomicUsize,
    /// Every resource the remote accepted, in order.
    pub written: Mutex<Vec<Resource>>,
    next_id: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Bundle) -> Self {
        let mock = Self::new();
        *mock.records.lock().unwrap() = records;
        mock
    }

    pub fn with_goals(self, goals: Bundle) -> Self {
        *self.goals.lock().unwrap() = goals;
        self
    }

    pub fn failing_reads(self) -> Self {
        self.fail_reads.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_writes(self) -> Self {
        self.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    pub fn written(&self) -> Vec<Resource> {
        self.written.lock().unwrap().clone()
    }

    fn read_guard(&self) -> CoachResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CoachError::RemoteStatus {
                status: 503,
                url: "mock://remote".into(),
                body: "unavailable".into(),
            });
        }
        Ok(())
    }

    fn write_guard(&self) -> CoachResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoachError::RemoteStatus {
                status: 422,
                url: "mock://remote".into(),
                body: "rejected".into(),
            });
        }
        Ok(())
    }

    /// Assign an id, remember the resource and make it searchable.
    fn accept(&self, resource: &Resource) -> Resource {
        let id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let accepted = match resource.clone() {
            Resource::Observation(mut obs) => {
                obs.id = Some(id);
                Resource::Observation(obs)
            }
            Resource::Goal(mut goal) => {
                goal.id = Some(id);
                Resource::Goal(goal)
            }
            other => other,
        };
        self.written.lock().unwrap().push(accepted.clone());
        self.records
            .lock()
            .unwrap()
            .entry
            .push(BundleEntry::new(accepted.clone()));
        accepted
    }
}

#[async_trait]
impl RemoteRecordSystem for MockRemote {
    async fn query(&self, query: &ObservationQuery) -> CoachResult<Bundle> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.read_guard()?;

        let records = self.records.lock().unwrap();
        let mut result = Bundle::new(BundleType::Searchset);
        result.entry = records
            .entry
            .iter()
            .filter(|e| match &e.resource {
                Some(Resource::Observation(obs)) => query.codes.matches(&obs.code),
                Some(_) => true,
                None => false,
            })
            .cloned()
            .collect();
        Ok(result)
    }

    async fn query_goals(&self, _subject: &SubjectId) -> CoachResult<Bundle> {
        self.goal_calls.fetch_add(1, Ordering::SeqCst);
        self.read_guard()?;
        Ok(self.goals.lock().unwrap().clone())
    }

    async fn create(&self, resource: &Resource) -> CoachResult<Resource> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.write_guard()?;
        Ok(self.accept(resource))
    }

    async fn transaction(&self, bundle: &Bundle) -> CoachResult<Bundle> {
        self.transaction_calls.fetch_add(1, Ordering::SeqCst);
        self.write_guard()?;

        let mut response = Bundle::new(BundleType::TransactionResponse);
        for resource in bundle.resources() {
            let accepted = self.accept(resource);
            response.entry.push(BundleEntry {
                response: Some(BundleEntryResponse {
                    status: "201 Created".into(),
                    location: accepted.relative_reference(),
                }),
                ..BundleEntry::new(accepted)
            });
        }
        Ok(response)
    }

    async fn metadata(&self) -> CoachResult<CapabilityStatement> {
        self.read_guard()?;
        Ok(self.capability.lock().unwrap().clone())
    }
}
