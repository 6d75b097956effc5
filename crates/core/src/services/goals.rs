//! Goal reconciliation and local goal management.
//!
//! The current blood pressure goal is chosen between the remote and local candidates:
//! - the remote candidate is the remote BP goal with the earliest creation date
//! - the local candidate is the single local BP goal the store allows
//! - when both exist the later creation date wins, and a tie goes to the local goal
//! - when neither exists a default goal is created locally
//!
//! Creating the default goal is serialised per subject so concurrent requests agree on one goal.

use crate::config::{ReconcileConfig, RemoteFailurePolicy};
use crate::context::RequestContext;
use crate::models::{AchievementStatus, Goal, GoalDraft, GoalTarget, SubjectId};
use crate::remote::RemoteRecordSystem;
use crate::store::LocalStore;
use crate::{CoachError, CoachResult};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_BP_GOAL_DESCRIPTION: &str = "Blood pressure";

pub struct GoalService {
    config: Arc<ReconcileConfig>,
    remote: Arc<dyn RemoteRecordSystem>,
    store: Arc<dyn LocalStore>,
    create_locks: DashMap<SubjectId, Arc<Mutex<()>>>,
}

impl GoalService {
    pub fn new(
        config: Arc<ReconcileConfig>,
        remote: Arc<dyn RemoteRecordSystem>,
        store: Arc<dyn LocalStore>,
    ) -> Self {
        Self {
            config,
            remote,
            store,
            create_locks: DashMap::new(),
        }
    }

    /// Remote goals followed by local goals.
    pub async fn goals(&self, ctx: &RequestContext) -> CoachResult<Vec<Goal>> {
        let mut goals = self.remote_goals(ctx).await?;
        goals.extend(self.store.find_goals(ctx.subject())?);
        Ok(goals)
    }

    /// The subject's current blood pressure goal. Never absent: when no goal exists anywhere, a
    /// default goal is created and returned.
    ///
    /// # Errors
    ///
    /// Store failures, and remote read failures under [`RemoteFailurePolicy::Propagate`].
    pub async fn current_bp_goal(&self, ctx: &RequestContext) -> CoachResult<Goal> {
        let subject = ctx.subject();
        let remote = self
            .remote_goals(ctx)
            .await?
            .into_iter()
            .filter(Goal::is_bp_goal)
            .min_by_key(Goal::created);
        let local = self.store.find_current_bp_goal(subject)?;

        let current = match (remote, local) {
            (Some(remote), Some(local)) => {
                if remote.created() > local.created() {
                    remote
                } else {
                    local
                }
            }
            (Some(remote), None) => remote,
            (None, Some(local)) => local,
            (None, None) => self.create_default_bp_goal(subject).await?,
        };

        tracing::debug!(
            subject = %subject,
            goal = %current.ext_goal_id(),
            authorship = ?current.authorship(),
            "selected current blood pressure goal"
        );
        Ok(current)
    }

    pub fn local_goal(&self, subject: &SubjectId, ext_goal_id: &str) -> CoachResult<Option<Goal>> {
        self.store.find_goal(subject, ext_goal_id)
    }

    pub fn local_non_bp_goals(&self, subject: &SubjectId) -> CoachResult<Vec<Goal>> {
        Ok(self
            .store
            .find_goals(subject)?
            .into_iter()
            .filter(|g| !g.is_bp_goal())
            .collect())
    }

    pub fn has_any_local_non_bp_goals(&self, subject: &SubjectId) -> CoachResult<bool> {
        Ok(!self.local_non_bp_goals(subject)?.is_empty())
    }

    /// Create a local goal. A second blood pressure goal is rejected by the store.
    pub fn create_goal(&self, subject: &SubjectId, draft: GoalDraft) -> CoachResult<Goal> {
        let goal = Goal::new_local(draft, uuid::Uuid::new_v4().to_string(), Utc::now());
        let goal = self.store.save_goal(subject, goal)?;
        tracing::info!(subject = %subject, goal = %goal.ext_goal_id(), "created goal");
        Ok(goal)
    }

    /// Replace an existing local goal.
    pub fn update_goal(&self, subject: &SubjectId, goal: Goal) -> CoachResult<Goal> {
        if self.store.find_goal(subject, goal.ext_goal_id())?.is_none() {
            return Err(CoachError::GoalNotFound(goal.ext_goal_id().to_string()));
        }
        self.store.save_goal(subject, goal)
    }

    /// Append an achievement status to a local goal's history.
    pub fn record_achievement(
        &self,
        subject: &SubjectId,
        ext_goal_id: &str,
        status: AchievementStatus,
    ) -> CoachResult<Goal> {
        let mut goal = self
            .store
            .find_goal(subject, ext_goal_id)?
            .ok_or_else(|| CoachError::GoalNotFound(ext_goal_id.to_string()))?;
        goal.record_achievement(status, Utc::now());
        self.store.save_goal(subject, goal)
    }

    pub fn delete_goal(&self, subject: &SubjectId, ext_goal_id: &str) -> CoachResult<bool> {
        self.store.delete_goal(subject, ext_goal_id)
    }

    pub fn delete_bp_goal_if_exists(&self, subject: &SubjectId) -> CoachResult<bool> {
        self.store.delete_bp_goal(subject)
    }

    pub fn delete_all_goals(&self, subject: &SubjectId) -> CoachResult<usize> {
        let count = self.store.delete_all_goals(subject)?;
        tracing::info!(subject = %subject, count, "deleted all local goals");
        Ok(count)
    }

    async fn remote_goals(&self, ctx: &RequestContext) -> CoachResult<Vec<Goal>> {
        let fetched = ctx
            .goal_bundle(|| self.remote.query_goals(ctx.subject()))
            .await;

        match fetched {
            Ok(bundle) => Ok(ctx.transformer().transform_incoming_goals(bundle)),
            Err(err) => match self.config.remote_failure_policy {
                RemoteFailurePolicy::Propagate => Err(err),
                RemoteFailurePolicy::DegradeToLocal => {
                    tracing::warn!(subject = %ctx.subject(), error = %err, "remote goal read failed; using local goals only");
                    Ok(Vec::new())
                }
            },
        }
    }

    /// Create the default blood pressure goal unless another request already has.
    async fn create_default_bp_goal(&self, subject: &SubjectId) -> CoachResult<Goal> {
        let lock = self.create_locks.entry(subject.clone()).or_default().clone();
        let created = {
            let _guard = lock.lock().await;
            self.create_default_bp_goal_locked(subject)
        };
        drop(lock);

        // Only the map holds the lock once no other request is waiting on it.
        self.create_locks
            .remove_if(subject, |_, lock| Arc::strong_count(lock) == 1);
        created
    }

    fn create_default_bp_goal_locked(&self, subject: &SubjectId) -> CoachResult<Goal> {
        if let Some(existing) = self.store.find_current_bp_goal(subject)? {
            return Ok(existing);
        }

        let draft = GoalDraft {
            referent: self.config.bp_goal_coding.clone(),
            description: DEFAULT_BP_GOAL_DESCRIPTION.to_string(),
            target: GoalTarget::BloodPressure {
                systolic: self.config.bp_goal_default_systolic,
                diastolic: self.config.bp_goal_default_diastolic,
            },
            target_date: None,
        };

        match self.create_goal(subject, draft) {
            Ok(goal) => Ok(goal),
            // Another process saved one between our check and our insert.
            Err(CoachError::GoalConflict { .. }) => self
                .store
                .find_current_bp_goal(subject)?
                .ok_or_else(|| CoachError::GoalNotFound(format!("blood pressure goal for {subject}"))),
            Err(err) => Err(err),
        }
    }
}
