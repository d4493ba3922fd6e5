//! Generic child-object reconciliation
//!
//! A [`Reconciler`] converges the children of one parent towards a desired
//! set of keys. For every key in the union of desired and existing keys it
//! either creates, updates, schedules a disruptive update, recreates, or turns
//! down the object, delegating everything kind-specific to a [`Strategy`].
//!
//! Failures are isolated per key: one key failing never stops the others, and
//! the first hard error is reported through the returned [`ReconcileResult`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::store::ObjectStore;
use super::strategy::{Child, Strategy, UpdateMode};
use crate::controller::metrics::{MetricsRecorder, NoopRecorder};
use crate::error::Error;
use crate::key::{matches_labels, ObjectKey, Parent};
use crate::results::{Builder, ReconcileResult};
use crate::rollout;

/// How long to wait before recreating an object deleted for a rolling update
pub const RECREATE_REQUEUE_DELAY: Duration = Duration::from_secs(5);

/// How soon to retry a key whose write lost a race with another writer
pub const CONFLICT_REQUEUE_DELAY: Duration = Duration::from_secs(5);

const PENDING_UPDATE: &str = "pending disruptive update";

/// Counts of the writes made during one pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub scheduled: usize,
    pub recreated: usize,
    pub deleted: usize,
    pub orphaned: usize,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Reconciles the children of one kind owned by one parent
pub struct Reconciler<'a, K: Child> {
    store: &'a dyn ObjectStore<K>,
    parent: &'a Parent,
    selector: &'a BTreeMap<String, String>,
    metrics: &'a dyn MetricsRecorder,
}

impl<'a, K: Child> Reconciler<'a, K> {
    pub fn new(
        store: &'a dyn ObjectStore<K>,
        parent: &'a Parent,
        selector: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            store,
            parent,
            selector,
            metrics: &NoopRecorder,
        }
    }

    pub fn with_metrics(mut self, metrics: &'a dyn MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    /// Converge the parent's children of kind `K` to exactly `desired`
    #[instrument(skip_all, fields(kind = %K::kind(&()), parent = %self.parent.name))]
    pub async fn reconcile_set<S>(
        &self,
        desired: &BTreeSet<ObjectKey>,
        strategy: &mut S,
    ) -> ReconcileResult
    where
        S: Strategy<K>,
    {
        let existing = match self.list_owned().await {
            Ok(existing) => existing,
            Err(err) => {
                warn!("Failed to list {} children of {}: {}", K::kind(&()), self.parent.name, err);
                return ReconcileResult::error(err);
            }
        };

        let keys: BTreeSet<&ObjectKey> = desired.iter().chain(existing.keys()).collect();
        let mut report = ReconcileReport::default();
        let mut results = Builder::new();
        for key in keys {
            let outcome = self
                .reconcile_key(key, desired.contains(key), existing.get(key), strategy, &mut report)
                .await;
            results.add(outcome);
        }

        self.log_report(&report);
        results.finish()
    }

    /// Converge a single child that should exist iff `want_exists`
    #[instrument(skip_all, fields(kind = %K::kind(&()), key = %key))]
    pub async fn reconcile_object<S>(
        &self,
        key: &ObjectKey,
        want_exists: bool,
        strategy: &mut S,
    ) -> ReconcileResult
    where
        S: Strategy<K>,
    {
        let current = match self.store.get(key).await {
            Ok(current) => current.filter(|obj| self.selects(obj)),
            Err(err) if err.is_not_found() => None,
            Err(err) => return self.failed(key, "get", err),
        };

        let mut report = ReconcileReport::default();
        let result = self
            .reconcile_key(key, want_exists, current.as_ref(), strategy, &mut report)
            .await;
        self.log_report(&report);
        result
    }

    async fn list_owned(&self) -> Result<BTreeMap<ObjectKey, K>, Error> {
        let objects = self.store.list(&self.parent.namespace, self.selector).await?;
        Ok(objects
            .into_iter()
            .filter(|obj| self.selects(obj))
            .map(|obj| (ObjectKey::from_resource(&obj), obj))
            .collect())
    }

    fn selects(&self, obj: &K) -> bool {
        self.parent.owns(obj) && matches_labels(obj, self.selector)
    }

    async fn reconcile_key<S>(
        &self,
        key: &ObjectKey,
        wanted: bool,
        current: Option<&K>,
        strategy: &mut S,
        report: &mut ReconcileReport,
    ) -> ReconcileResult
    where
        S: Strategy<K>,
    {
        match (wanted, current) {
            (true, None) => self.create(key, strategy, report).await,
            (true, Some(cur)) => self.update(key, cur, strategy, report).await,
            (false, Some(cur)) => self.turn_down(key, cur, strategy, report).await,
            (false, None) => ReconcileResult::ok(),
        }
    }

    async fn create<S>(
        &self,
        key: &ObjectKey,
        strategy: &mut S,
        report: &mut ReconcileReport,
    ) -> ReconcileResult
    where
        S: Strategy<K>,
    {
        let mut obj = strategy.new_object(key);
        {
            let meta = obj.meta_mut();
            meta.name = Some(key.name.clone());
            meta.namespace = Some(key.namespace.clone());
            meta.labels
                .get_or_insert_with(BTreeMap::new)
                .extend(self.selector.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.parent.adopt(&mut obj);

        match self.store.create(&obj).await {
            Ok(created) => {
                debug!("Created {} {}", K::kind(&()), key);
                report.created += 1;
                self.record("create");
                strategy.status(key, &created);
                ReconcileResult::ok()
            }
            Err(err) if err.is_conflict() => self.create_conflict(key, err).await,
            Err(err) => self.failed(key, "create", err),
        }
    }

    // The name is taken. If the holder is ours, a concurrent pass created it;
    // otherwise nothing will ever free the name without an operator.
    async fn create_conflict(&self, key: &ObjectKey, err: Error) -> ReconcileResult {
        match self.store.get(key).await {
            Ok(Some(existing)) if !self.selects(&existing) => {
                warn!(
                    "Cannot create {} {}: name is taken by an object not owned by {}",
                    K::kind(&()),
                    key,
                    self.parent.name
                );
                ReconcileResult::error(Error::Conflict(format!(
                    "{key}: name taken by an object not owned by {}",
                    self.parent.name
                )))
            }
            Ok(_) => self.failed(key, "create", err),
            Err(get_err) => self.failed(key, "get", get_err),
        }
    }

    async fn update<S>(
        &self,
        key: &ObjectKey,
        cur: &K,
        strategy: &mut S,
        report: &mut ReconcileReport,
    ) -> ReconcileResult
    where
        S: Strategy<K>,
    {
        if cur.meta().deletion_timestamp.is_some() {
            strategy.status(key, cur);
            return ReconcileResult::ok();
        }

        let mut next = cur.clone();
        strategy.update_in_place(key, &mut next);

        let mode = strategy.update_mode();
        let mut rolled = next.clone();
        match mode {
            UpdateMode::RollingRecreate => strategy.update_rolling_recreate(key, &mut rolled),
            UpdateMode::RollingInPlace => strategy.update_rolling_in_place(key, &mut rolled),
        }

        if rolled != next {
            if rollout::released(cur) {
                if mode == UpdateMode::RollingRecreate {
                    return self.recreate(key, cur, strategy, report).await;
                }
                next = rolled;
                rollout::unschedule(&mut next);
                rollout::unrelease(&mut next);
            } else {
                let description = describe_change(&next, &rolled);
                if cur.annotations().get(rollout::SCHEDULED_ANNOTATION) != Some(&description) {
                    info!("Scheduling disruptive update of {} {}: {}", K::kind(&()), key, description);
                    report.scheduled += 1;
                    self.record("schedule");
                }
                rollout::schedule(&mut next, &description);
            }
        } else {
            rollout::unschedule(&mut next);
            rollout::unrelease(&mut next);
        }

        if next == *cur {
            strategy.status(key, cur);
            return ReconcileResult::ok();
        }

        match self.store.replace(&next).await {
            Ok(updated) => {
                debug!("Updated {} {}", K::kind(&()), key);
                report.updated += 1;
                self.record("update");
                strategy.status(key, &updated);
                ReconcileResult::ok()
            }
            Err(err) => {
                strategy.status(key, cur);
                self.failed(key, "update", err)
            }
        }
    }

    async fn recreate<S>(
        &self,
        key: &ObjectKey,
        cur: &K,
        strategy: &mut S,
        report: &mut ReconcileReport,
    ) -> ReconcileResult
    where
        S: Strategy<K>,
    {
        strategy.status(key, cur);
        match self.store.delete(key, strategy.delete_propagation()).await {
            Ok(()) => {
                info!("Deleted {} {} for a released rolling update", K::kind(&()), key);
                report.recreated += 1;
                self.record("recreate");
                ReconcileResult::requeue_after(RECREATE_REQUEUE_DELAY)
            }
            Err(err) => self.failed(key, "delete", err),
        }
    }

    async fn turn_down<S>(
        &self,
        key: &ObjectKey,
        cur: &K,
        strategy: &mut S,
        report: &mut ReconcileReport,
    ) -> ReconcileResult
    where
        S: Strategy<K>,
    {
        if cur.meta().deletion_timestamp.is_some() {
            strategy.status(key, cur);
            return ReconcileResult::ok();
        }

        if let Some(orphan) = strategy.prepare_for_turndown(key, cur) {
            debug!("Keeping {} {}: {}", K::kind(&()), key, orphan.message);
            report.orphaned += 1;
            self.record("orphan");
            strategy.orphan_status(key, cur, &orphan);
            strategy.status(key, cur);
            return ReconcileResult::ok();
        }

        strategy.status(key, cur);
        match self.store.delete(key, strategy.delete_propagation()).await {
            Ok(()) => {
                info!("Turned down {} {}", K::kind(&()), key);
                report.deleted += 1;
                self.record("delete");
                ReconcileResult::ok()
            }
            Err(err) => self.failed(key, "delete", err),
        }
    }

    // Not-found and conflicts mean another writer got there first. Retry soon
    // in case no watch event for that write reaches this controller.
    fn failed(&self, key: &ObjectKey, action: &str, err: Error) -> ReconcileResult {
        if err.is_not_found() || err.is_conflict() {
            debug!("Skipped {} of {} {}: {}", action, K::kind(&()), key, err);
            return ReconcileResult::requeue_after(CONFLICT_REQUEUE_DELAY);
        }
        warn!("Failed to {} {} {}: {}", action, K::kind(&()), key, err);
        ReconcileResult::error(err)
    }

    fn record(&self, operation: &str) {
        self.metrics.child_operation(&K::kind(&()), operation);
    }

    fn log_report(&self, report: &ReconcileReport) {
        if report.is_empty() {
            debug!("No changes to {} children of {}", K::kind(&()), self.parent.name);
            return;
        }
        info!(
            created = report.created,
            updated = report.updated,
            scheduled = report.scheduled,
            recreated = report.recreated,
            deleted = report.deleted,
            orphaned = report.orphaned,
            "Reconciled {} children of {}",
            K::kind(&()),
            self.parent.name
        );
    }
}

static NULL: Value = Value::Null;

/// Short human-readable summary of the fields that differ, e.g.
/// `changes to spec.image`
pub fn describe_change<K: Serialize>(before: &K, after: &K) -> String {
    let (Ok(before), Ok(after)) = (serde_json::to_value(before), serde_json::to_value(after)) else {
        return PENDING_UPDATE.to_string();
    };
    let mut paths = Vec::new();
    changed_paths(&before, &after, "", 2, &mut paths);
    if paths.is_empty() {
        PENDING_UPDATE.to_string()
    } else {
        format!("changes to {}", paths.join(", "))
    }
}

fn changed_paths(before: &Value, after: &Value, prefix: &str, depth: usize, out: &mut Vec<String>) {
    match (before, after) {
        (Value::Object(b), Value::Object(a)) if depth > 0 => {
            let fields: BTreeSet<&String> = b.keys().chain(a.keys()).collect();
            for field in fields {
                let bv = b.get(field).unwrap_or(&NULL);
                let av = a.get(field).unwrap_or(&NULL);
                if bv == av {
                    continue;
                }
                let path = if prefix.is_empty() {
                    field.clone()
                } else {
                    format!("{prefix}.{field}")
                };
                changed_paths(bv, av, &path, depth - 1, out);
            }
        }
        _ if before != after && !prefix.is_empty() => out.push(prefix.to_string()),
        _ => {}
    }
}
