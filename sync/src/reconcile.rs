//! The reconciler: one complete sync cycle.
//!
//! A cycle is push-then-pull. Local changes must reach the authority
//! before asking what is new, so the authority can fold them into the
//! response and return versions this client can trust as its own.
//!
//! # Algorithm
//!
//! 1. Drain the change log (entries not marked failed)
//! 2. Batch creates/updates into one atomic push; issue deletes
//!    individually
//! 3. Pull pages of entities above the local watermark, ascending by
//!    version
//! 4. Merge each under last-writer-wins: adopt only strictly newer
//!    versions
//! 5. Advance the watermark to the highest version fully merged
//!
//! The reconciler never raises errors across its public boundary: every
//! outcome, including total network failure, is a [`CycleReport`].

use crate::changelog::{ChangeLogEntry, ChangeOp};
use crate::config::SyncConfig;
use crate::error::{Result, SyncIssue};
use crate::store::LocalStore;
use crate::transport::{Authority, PushRequest};
use crate::{Entity, EntityType, Timestamp, Version};
use std::sync::Arc;

/// The outcome of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Creates/updates confirmed by the authority
    pub pushed: usize,
    /// Deletes confirmed by the authority
    pub deleted: usize,
    /// Entities received from pull
    pub pulled: usize,
    /// Pulled entities adopted into the local store
    pub merged: usize,
    /// Pulled entities discarded as stale re-deliveries
    pub discarded: usize,
    /// The local watermark after the cycle
    pub watermark: Version,
    /// Everything that went wrong, user-visible or not
    pub issues: Vec<SyncIssue>,
}

impl CycleReport {
    /// Whether the cycle finished without user-visible errors.
    /// Transient failures below the retry maximum do not count.
    pub fn is_clean(&self) -> bool {
        self.issues.iter().all(|i| !i.visible)
    }

    /// The first user-visible issue, if any.
    pub fn first_visible(&self) -> Option<&SyncIssue> {
        self.issues.iter().find(|i| i.visible)
    }
}

/// Adopt an incoming version only if it is strictly newer than the
/// local one (or no local copy exists). Equal or lower versions are
/// idempotent re-deliveries.
pub(crate) fn should_adopt(local_version: Option<Version>, remote_version: Version) -> bool {
    local_version.map_or(true, |v| remote_version > v)
}

/// Executes sync cycles against a local store and a backend authority.
///
/// The reconciler exclusively owns change log and watermark mutation;
/// callers serialize cycles (the coordinator enforces single-flight).
pub struct Reconciler<S, A> {
    store: Arc<S>,
    authority: Arc<A>,
    config: SyncConfig,
}

impl<S: LocalStore, A: Authority> Reconciler<S, A> {
    pub fn new(store: Arc<S>, authority: Arc<A>, config: SyncConfig) -> Self {
        Self {
            store,
            authority,
            config,
        }
    }

    /// Run one push-then-pull cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        self.push_pending(&mut report).await;
        self.pull_remote(&mut report).await;

        match self.store.watermark().await {
            Ok(watermark) => report.watermark = watermark,
            Err(err) => report
                .issues
                .push(SyncIssue::visible("read watermark", err.to_string())),
        }

        tracing::debug!(
            pushed = report.pushed,
            deleted = report.deleted,
            pulled = report.pulled,
            merged = report.merged,
            watermark = report.watermark,
            issues = report.issues.len(),
            "sync cycle finished"
        );
        report
    }

    async fn push_pending(&self, report: &mut CycleReport) {
        let entries = match self.store.pending_changes().await {
            Ok(entries) => entries,
            Err(err) => {
                report
                    .issues
                    .push(SyncIssue::visible("read change log", err.to_string()));
                return;
            }
        };

        // Entries past the retry maximum wait for an explicit retry.
        let (deletes, upserts): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .filter(|e| !e.failed)
            .partition(|e| e.op == ChangeOp::Delete);

        if !upserts.is_empty() {
            self.push_upserts(upserts, report).await;
        }
        for entry in deletes {
            self.push_delete(entry, report).await;
        }
    }

    async fn push_upserts(&self, entries: Vec<ChangeLogEntry>, report: &mut CycleReport) {
        let mut request = PushRequest {
            node_id: self.config.node_id.clone(),
            conversations: Vec::new(),
            messages: Vec::new(),
        };
        let mut involved = Vec::new();
        let mut orphaned = Vec::new();

        for entry in entries {
            match self.store.get(entry.entity_type, &entry.entity_id).await {
                Ok(Some(Entity::Conversation(conv))) => {
                    request.conversations.push(conv);
                    involved.push(entry);
                }
                Ok(Some(Entity::Message(msg))) => {
                    request.messages.push(msg);
                    involved.push(entry);
                }
                // The entity vanished locally since staging; nothing to push.
                Ok(None) => orphaned.push((entry.id.clone(), entry.staged_at)),
                Err(err) => report.issues.push(SyncIssue::visible(
                    format!("load {} {}", entry.entity_type, entry.entity_id),
                    err.to_string(),
                )),
            }
        }

        if !orphaned.is_empty() {
            if let Err(err) = self.store.clear_changes(&orphaned).await {
                report
                    .issues
                    .push(SyncIssue::visible("clear orphaned changes", err.to_string()));
            }
        }
        if request.is_empty() {
            return;
        }

        match self.authority.push(request).await {
            Ok(response) => {
                // Stamp local copies with their assigned versions so the
                // cache matches the authority without waiting for a pull.
                for entry in &involved {
                    let Some(&version) = response.versions.get(&entry.entity_id) else {
                        continue;
                    };
                    if let Ok(Some(mut entity)) =
                        self.store.get(entry.entity_type, &entry.entity_id).await
                    {
                        entity.set_version(version);
                        if let Err(err) = self.store.put(entity).await {
                            report.issues.push(SyncIssue::visible(
                                format!("stamp {} {}", entry.entity_type, entry.entity_id),
                                err.to_string(),
                            ));
                        }
                    }
                }

                // Clear only intents unchanged since the push was read; an
                // entry restaged mid-flight carries an unconfirmed mutation.
                let confirmed: Vec<(String, Timestamp)> = involved
                    .iter()
                    .map(|e| (e.id.clone(), e.staged_at))
                    .collect();
                if let Err(err) = self.store.clear_changes(&confirmed).await {
                    report
                        .issues
                        .push(SyncIssue::visible("clear change log", err.to_string()));
                }
                report.pushed += involved.len();
                tracing::debug!(
                    count = involved.len(),
                    watermark = response.new_watermark,
                    "push accepted"
                );
            }
            Err(err) => {
                // Whole-batch failure: every involved entry shares the fate.
                for entry in &involved {
                    self.record_push_failure(entry, &err, report).await;
                }
            }
        }
    }

    async fn push_delete(&self, entry: ChangeLogEntry, report: &mut CycleReport) {
        match self.authority.delete(&entry.entity_id).await {
            Ok(()) => {
                if let Err(err) = self
                    .store
                    .clear_changes(&[(entry.id.clone(), entry.staged_at)])
                    .await
                {
                    report
                        .issues
                        .push(SyncIssue::visible("clear change log", err.to_string()));
                }
                report.deleted += 1;
            }
            Err(err) => self.record_push_failure(&entry, &err, report).await,
        }
    }

    async fn record_push_failure(
        &self,
        entry: &ChangeLogEntry,
        err: &crate::SyncError,
        report: &mut CycleReport,
    ) {
        let context = format!("push {} {}", entry.entity_type, entry.entity_id);
        let attempts = match self.store.increment_attempt(&entry.id).await {
            Ok(attempts) => attempts,
            Err(store_err) => {
                report
                    .issues
                    .push(SyncIssue::visible(context, store_err.to_string()));
                return;
            }
        };

        if !err.is_transient() {
            // Permanent rejection: surface immediately, wait for explicit retry.
            if let Err(store_err) = self.store.mark_failed(&entry.id).await {
                report
                    .issues
                    .push(SyncIssue::visible(&context, store_err.to_string()));
            }
            report.issues.push(SyncIssue::visible(context, err.to_string()));
        } else if attempts >= self.config.max_attempts {
            if let Err(store_err) = self.store.mark_failed(&entry.id).await {
                report
                    .issues
                    .push(SyncIssue::visible(&context, store_err.to_string()));
            }
            report.issues.push(SyncIssue::visible(
                context,
                format!("giving up after {attempts} attempts: {err}"),
            ));
        } else {
            tracing::debug!(context = %context, attempts, error = %err, "transient push failure");
            report.issues.push(SyncIssue::transient(context, err));
        }
    }

    async fn pull_remote(&self, report: &mut CycleReport) {
        let mut since = match self.store.watermark().await {
            Ok(watermark) => watermark,
            Err(err) => {
                report
                    .issues
                    .push(SyncIssue::visible("read watermark", err.to_string()));
                return;
            }
        };

        loop {
            let response = match self.authority.pull(since, self.config.pull_limit).await {
                Ok(response) => response,
                Err(err) => {
                    report.issues.push(if err.is_transient() {
                        SyncIssue::transient("pull", &err)
                    } else {
                        SyncIssue::visible("pull", err.to_string())
                    });
                    return;
                }
            };

            if response.entities.is_empty() {
                return;
            }
            report.pulled += response.entities.len();

            let mut highest = since;
            let mut halted = false;
            for entity in response.entities {
                let version = entity.version();
                let context = format!("merge {} {}", entity.entity_type(), entity.id());
                match self.merge_one(entity).await {
                    Ok(true) => {
                        report.merged += 1;
                        highest = version;
                    }
                    Ok(false) => {
                        report.discarded += 1;
                        highest = version;
                    }
                    Err(err) => {
                        // The watermark stops at the last fully merged
                        // entity; the next cycle resumes from there.
                        report.issues.push(SyncIssue::visible(context, err.to_string()));
                        halted = true;
                        break;
                    }
                }
            }

            if highest > since {
                if let Err(err) = self.store.set_watermark(highest).await {
                    report
                        .issues
                        .push(SyncIssue::visible("persist watermark", err.to_string()));
                    return;
                }
                since = highest;
            }
            if halted || !response.has_more {
                return;
            }
        }
    }

    /// Merge one pulled entity. Returns whether it was adopted.
    async fn merge_one(&self, remote: Entity) -> Result<bool> {
        let entity_type = remote.entity_type();
        let id = remote.id().clone();

        let local_version = self
            .store
            .get(entity_type, &id)
            .await?
            .map(|local| local.version());
        if !should_adopt(local_version, remote.version()) {
            return Ok(false);
        }

        if remote.is_deleted() {
            self.store.remove(entity_type, &id).await?;
            if entity_type == EntityType::Conversation {
                self.store.remove_conversation_messages(&id).await?;
            }
        } else {
            self.store.put(remote).await?;
        }
        Ok(true)
    }
}
