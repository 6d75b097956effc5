//! Reading reconciliation.
//!
//! [`ReadingService::get_readings`] produces one deduplicated, most-recent-first view of a
//! subject's readings from the remote record system, manual local entries and the home-device
//! cache. Remote readings always supersede local readings of the same logical event. Local
//! readings with no remote counterpart are written back to the remote in the background.

use crate::config::{LookbackPeriod, ReconcileConfig, RemoteFailurePolicy};
use crate::context::RequestContext;
use crate::models::{LogicalEqualityKey, Reading, ReadingKind, SubjectId};
use crate::remote::{ObservationQuery, RemoteRecordSystem};
use crate::store::{DeviceVitals, LocalStore};
use crate::transform::VendorTransformer;
use crate::CoachResult;
use chrono::Utc;
use fhir::{Bundle, BundleMerger};
use std::collections::HashSet;
use std::sync::Arc;

/// Outcome of merging remote and local readings.
#[derive(Debug, Default, PartialEq)]
pub struct MergedReadings {
    /// Most recent first, truncated to the configured limit.
    pub readings: Vec<Reading>,
    /// Local readings with no remote counterpart, in input order.
    pub survivors: Vec<Reading>,
}

/// Merge remote and local readings.
///
/// A local reading whose logical-equality key matches any remote reading, or an earlier local
/// reading, is dropped; callers pass manual entries ahead of device-cache readings so the manual
/// entry is the one kept. The rest are sorted by effective time, most recent first; the sort is
/// stable, so readings measured at the same instant keep their input order (remote first, then
/// local). `limit` keeps only the most recent entries.
pub fn merge_readings(
    remote: Vec<Reading>,
    local: Vec<Reading>,
    limit: Option<usize>,
) -> MergedReadings {
    let mut seen: HashSet<LogicalEqualityKey> =
        remote.iter().map(Reading::logical_equality_key).collect();

    let survivors: Vec<Reading> = local
        .into_iter()
        .filter(|reading| seen.insert(reading.logical_equality_key()))
        .collect();

    let mut readings = remote;
    readings.extend(survivors.iter().cloned());
    readings.sort_by(|a, b| b.effective().cmp(&a.effective()));
    if let Some(limit) = limit {
        readings.truncate(limit);
    }

    MergedReadings {
        readings,
        survivors,
    }
}

pub struct ReadingService {
    config: Arc<ReconcileConfig>,
    remote: Arc<dyn RemoteRecordSystem>,
    store: Arc<dyn LocalStore>,
}

impl ReadingService {
    pub fn new(
        config: Arc<ReconcileConfig>,
        remote: Arc<dyn RemoteRecordSystem>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            config,
            remote,
            store,
        }
    }

    /// The reconciled readings of `kind` for the context's subject.
    ///
    /// Remote and local sources are fetched concurrently. Best-effort write-backs are spawned
    /// and tracked on `ctx`; they never delay or fail this call.
    ///
    /// # Errors
    ///
    /// Local store failures propagate. A remote read failure propagates under
    /// [`RemoteFailurePolicy::Propagate`]; under [`RemoteFailurePolicy::DegradeToLocal`] it is
    /// logged and only local readings are returned.
    pub async fn get_readings(
        &self,
        ctx: &RequestContext,
        kind: ReadingKind,
    ) -> CoachResult<Vec<Reading>> {
        let subject = ctx.subject();
        let (remote, local) = tokio::join!(self.remote_readings(ctx, kind), async {
            self.local_readings(subject, kind)
        });
        let local = local?;

        let (remote, remote_ok) = match remote {
            Ok(readings) => (readings, true),
            Err(err) => match self.config.remote_failure_policy {
                RemoteFailurePolicy::Propagate => return Err(err),
                RemoteFailurePolicy::DegradeToLocal => {
                    tracing::warn!(
                        subject = %subject,
                        kind = %kind,
                        error = %err,
                        "remote read failed; returning local readings only"
                    );
                    (Vec::new(), false)
                }
            },
        };

        let remote_count = remote.len();
        let merged = merge_readings(remote, local, self.config.reading_limit);

        tracing::info!(
            subject = %subject,
            kind = %kind,
            remote = remote_count,
            local_only = merged.survivors.len(),
            returned = merged.readings.len(),
            "reconciled readings"
        );

        if remote_ok && self.config.write_back {
            // Outside the lookback window the remote query never returns the written copy.
            let lookback = self.lookback(kind);
            let now = Utc::now();
            for reading in merged.survivors {
                if lookback.covers(reading.effective(), now) {
                    self.spawn_write_back(ctx, reading).await;
                } else {
                    tracing::debug!(
                        subject = %subject,
                        reading = %reading.logical_equality_key(),
                        "local reading outside lookback; not written back"
                    );
                }
            }
        }

        Ok(merged.readings)
    }

    /// Reconciled readings measured at home (manual home entries and device readings).
    pub async fn home_readings(
        &self,
        ctx: &RequestContext,
        kind: ReadingKind,
    ) -> CoachResult<Vec<Reading>> {
        let readings = self.get_readings(ctx, kind).await?;
        Ok(readings.into_iter().filter(Reading::is_home_reading).collect())
    }

    /// Record a manually entered reading.
    ///
    /// The reading is always stored locally. With write-back enabled it is then also created on
    /// the remote; when the remote returns its representation, that is what the caller gets.
    /// A remote failure is logged and the local reading is returned.
    pub async fn create_reading(&self, ctx: &RequestContext, reading: Reading) -> CoachResult<Reading> {
        let subject = ctx.subject();
        let saved = self.store.save_reading(subject, reading)?;

        if !self.config.write_back {
            return Ok(saved);
        }

        let transformer = ctx.transformer();
        let written = async {
            let outgoing = transformer.transform_outgoing_reading(subject, &saved)?;
            transformer.write_remote(self.remote.as_ref(), outgoing).await
        }
        .await;

        match written {
            Ok(response) => {
                let created = transformer
                    .transform_incoming_readings(&response, saved.kind())
                    .into_iter()
                    .next();
                match created {
                    Some(remote) => {
                        ctx.record_remote_reading(remote.clone()).await;
                        Ok(remote)
                    }
                    None => Ok(saved),
                }
            }
            Err(err) => {
                tracing::warn!(subject = %subject, error = %err, "remote create failed; kept local reading");
                Ok(saved)
            }
        }
    }

    pub fn delete_reading(&self, subject: &SubjectId, kind: ReadingKind, id: &str) -> CoachResult<bool> {
        self.store.delete_reading(subject, kind, id)
    }

    pub fn delete_all_readings(&self, subject: &SubjectId, kind: ReadingKind) -> CoachResult<usize> {
        self.store.delete_all_readings(subject, kind)
    }

    /// Replace the subject's home-device cache.
    pub fn sync_device_vitals(&self, subject: &SubjectId, vitals: &[DeviceVitals]) -> CoachResult<()> {
        self.store.save_device_vitals(subject, vitals)?;
        tracing::info!(subject = %subject, count = vitals.len(), "synchronised device vitals");
        Ok(())
    }

    async fn remote_readings(&self, ctx: &RequestContext, kind: ReadingKind) -> CoachResult<Vec<Reading>> {
        let bundle = ctx
            .observation_bundle(kind, || self.fetch_remote(ctx.subject(), kind))
            .await?;
        let mut readings = ctx.transformer().transform_incoming_readings(bundle, kind);

        let known: HashSet<_> = readings.iter().map(Reading::logical_equality_key).collect();
        readings.extend(
            ctx.created_remote_readings(kind)
                .await
                .into_iter()
                .filter(|r| !known.contains(&r.logical_equality_key())),
        );
        Ok(readings)
    }

    /// Query the remote for `kind`. Blood pressure also pulls the protocol answers recorded
    /// alongside, merged into the same bundle.
    async fn fetch_remote(&self, subject: &SubjectId, kind: ReadingKind) -> CoachResult<Bundle> {
        let config = &self.config;
        let lookback = self.lookback(kind);
        let codes = match kind {
            ReadingKind::BloodPressure => config
                .systolic_codes
                .union(&config.diastolic_codes)
                .union(&config.bp_panel_codes),
            ReadingKind::Pulse => config.pulse_codes.clone(),
        };

        let primary = self
            .remote
            .query(&ObservationQuery::new(subject.clone(), codes, lookback))
            .await?;

        let mut merger = BundleMerger::new();
        merger.consume(&primary);

        if kind == ReadingKind::BloodPressure {
            let supplemental = self
                .remote
                .query(&ObservationQuery::new(
                    subject.clone(),
                    config.protocol_codes.clone(),
                    lookback,
                ))
                .await?;
            merger.consume(&supplemental);
        }

        Ok(merger.into_merged())
    }

    fn lookback(&self, kind: ReadingKind) -> LookbackPeriod {
        match kind {
            ReadingKind::BloodPressure => self.config.bp_lookback,
            ReadingKind::Pulse => self.config.pulse_lookback,
        }
    }

    /// Manual entries followed by device-cache readings.
    fn local_readings(&self, subject: &SubjectId, kind: ReadingKind) -> CoachResult<Vec<Reading>> {
        let mut readings = self.store.find_readings(subject, kind)?;
        for vitals in self.store.find_device_vitals(subject)? {
            match vitals.reading(kind) {
                Ok(Some(reading)) => readings.push(reading),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(subject = %subject, vitals = %vitals.id, error = %err, "skipping device vitals")
                }
            }
        }
        Ok(readings)
    }

    async fn spawn_write_back(&self, ctx: &RequestContext, reading: Reading) {
        let transformer: Arc<dyn VendorTransformer> = ctx.transformer().clone();
        let remote = self.remote.clone();
        let subject = ctx.subject().clone();

        let handle = tokio::spawn(async move {
            let key = reading.logical_equality_key();
            let result = match transformer.transform_outgoing_reading(&subject, &reading) {
                Ok(bundle) => transformer.write_remote(remote.as_ref(), bundle).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(_) => tracing::debug!(subject = %subject, reading = %key, "wrote local reading back to remote"),
                Err(err) => tracing::warn!(subject = %subject, reading = %key, error = %err, "write-back failed"),
            }
        });
        ctx.track_write_back(handle).await;
    }
}
