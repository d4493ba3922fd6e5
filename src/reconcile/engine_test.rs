//! Tests for the reconciliation engine
//!
//! Every test drives the engine against the in-memory store with a ConfigMap
//! strategy: `data.config` is updated in place while `data.image` is a
//! disruptive field that goes through the rollout protocol.

#[cfg(test)]
mod tests {
    use super::super::engine::*;
    use super::super::memory::{MemoryStore, Operation};
    use super::super::strategy::{OrphanStatus, Strategy, UpdateMode};
    use crate::controller::metrics::MetricsRecorder;
    use crate::error::Error;
    use crate::hash::DesiredStateHash;
    use crate::key::{ObjectKey, Parent};
    use crate::results::ReconcileResult;
    use crate::rollout;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;
    use kube::ResourceExt;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;
    use std::time::Duration;

    const NAMESPACE: &str = "db";

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(NAMESPACE, name)
    }

    fn data<'a>(cm: &'a ConfigMap, field: &str) -> Option<&'a str> {
        cm.data.as_ref()?.get(field).map(String::as_str)
    }

    struct TestStrategy {
        config: String,
        image: String,
        mode: UpdateMode,
        keep: BTreeSet<String>,
        statuses: Vec<ObjectKey>,
        orphans: BTreeMap<ObjectKey, OrphanStatus>,
    }

    impl TestStrategy {
        fn new() -> Self {
            Self {
                config: "v1".to_string(),
                image: "db:1".to_string(),
                mode: UpdateMode::RollingRecreate,
                keep: BTreeSet::new(),
                statuses: Vec::new(),
                orphans: BTreeMap::new(),
            }
        }

        fn apply_image(&self, cm: &mut ConfigMap) {
            cm.data
                .get_or_insert_with(BTreeMap::new)
                .insert("image".to_string(), self.image.clone());
            DesiredStateHash::new()
                .add_string("image", &self.image)
                .annotate(cm);
        }
    }

    impl Strategy<ConfigMap> for TestStrategy {
        fn new_object(&self, _key: &ObjectKey) -> ConfigMap {
            let mut cm = ConfigMap::default();
            cm.data = Some(BTreeMap::from([("config".to_string(), self.config.clone())]));
            self.apply_image(&mut cm);
            cm
        }

        fn update_in_place(&self, _key: &ObjectKey, cm: &mut ConfigMap) {
            cm.data
                .get_or_insert_with(BTreeMap::new)
                .insert("config".to_string(), self.config.clone());
        }

        fn update_rolling_in_place(&self, _key: &ObjectKey, cm: &mut ConfigMap) {
            self.apply_image(cm);
        }

        fn update_rolling_recreate(&self, _key: &ObjectKey, cm: &mut ConfigMap) {
            self.apply_image(cm);
        }

        fn update_mode(&self) -> UpdateMode {
            self.mode
        }

        fn status(&mut self, key: &ObjectKey, _cm: &ConfigMap) {
            self.statuses.push(key.clone());
        }

        fn prepare_for_turndown(&mut self, key: &ObjectKey, _cm: &ConfigMap) -> Option<OrphanStatus> {
            self.keep
                .contains(&key.name)
                .then(|| OrphanStatus::new("Draining", format!("{} is still draining", key.name)))
        }

        fn orphan_status(&mut self, key: &ObjectKey, _cm: &ConfigMap, status: &OrphanStatus) {
            self.orphans.insert(key.clone(), status.clone());
        }
    }

    #[derive(Default)]
    struct RecordingMetrics {
        operations: Mutex<Vec<(String, String)>>,
    }

    impl MetricsRecorder for RecordingMetrics {
        fn observe_reconcile(&self, _controller: &str, _duration: Duration, _outcome: &str) {}

        fn child_operation(&self, kind: &str, operation: &str) {
            self.operations
                .lock()
                .unwrap()
                .push((kind.to_string(), operation.to_string()));
        }
    }

    struct Harness {
        store: MemoryStore<ConfigMap>,
        parent: Parent,
        selector: BTreeMap<String, String>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                parent: Parent {
                    api_version: "dbcluster.io/v1".to_string(),
                    kind: "DatabaseCluster".to_string(),
                    name: "main".to_string(),
                    namespace: NAMESPACE.to_string(),
                    uid: "parent-uid".to_string(),
                },
                selector: BTreeMap::from([(
                    "app.kubernetes.io/instance".to_string(),
                    "main".to_string(),
                )]),
            }
        }

        fn reconciler(&self) -> Reconciler<'_, ConfigMap> {
            Reconciler::<ConfigMap>::new(&self.store, &self.parent, &self.selector)
        }

        async fn pass(&self, desired: &[&str], strategy: &mut TestStrategy) -> ReconcileResult {
            let desired: BTreeSet<ObjectKey> = desired.iter().map(|name| key(name)).collect();
            self.reconciler().reconcile_set(&desired, strategy).await
        }

        /// An object owned by the parent that the engine did not create
        fn seed_owned(&self, name: &str) -> ConfigMap {
            let mut cm = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(NAMESPACE.to_string()),
                    labels: Some(self.selector.clone()),
                    uid: Some(format!("seed-{name}")),
                    ..Default::default()
                },
                ..Default::default()
            };
            self.parent.adopt(&mut cm);
            self.store.seed(cm)
        }

        /// Mark the stored object as released, like an external policy would
        fn release(&self, name: &str) {
            let mut cm = self.store.object(&key(name)).unwrap();
            rollout::release(&mut cm);
            self.store.seed(cm);
        }

        fn writes(&self) -> usize {
            self.store.operations().len()
        }
    }

    #[tokio::test]
    async fn test_creates_missing_objects_with_labels_and_owner() {
        let h = Harness::new();
        let metrics = RecordingMetrics::default();
        let mut strategy = TestStrategy::new();
        let desired: BTreeSet<ObjectKey> = [key("a"), key("b")].into();

        let result = h
            .reconciler()
            .with_metrics(&metrics)
            .reconcile_set(&desired, &mut strategy)
            .await;

        assert!(result.is_ok());
        assert_eq!(h.store.keys(), vec![key("a"), key("b")]);
        let a = h.store.object(&key("a")).unwrap();
        assert_eq!(a.labels().get("app.kubernetes.io/instance").unwrap(), "main");
        assert!(h.parent.owns(&a));
        assert_eq!(data(&a, "config"), Some("v1"));
        assert_eq!(data(&a, "image"), Some("db:1"));
        assert_eq!(strategy.statuses, vec![key("a"), key("b")]);
        assert_eq!(
            *metrics.operations.lock().unwrap(),
            vec![
                ("ConfigMap".to_string(), "create".to_string()),
                ("ConfigMap".to_string(), "create".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_converged_pass_makes_no_writes() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.pass(&["a", "b"], &mut strategy).await;
        let writes = h.writes();

        strategy.statuses.clear();
        let result = h.pass(&["a", "b"], &mut strategy).await;

        assert!(result.is_ok());
        assert_eq!(h.writes(), writes);
        assert_eq!(strategy.statuses, vec![key("a"), key("b")]);
    }

    #[tokio::test]
    async fn test_mutable_change_is_applied_in_place() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.pass(&["a"], &mut strategy).await;
        let uid = h.store.object(&key("a")).unwrap().uid();

        strategy.config = "v2".to_string();
        let result = h.pass(&["a"], &mut strategy).await;

        assert!(result.is_ok());
        let a = h.store.object(&key("a")).unwrap();
        assert_eq!(data(&a, "config"), Some("v2"));
        assert_eq!(a.uid(), uid);
        assert!(!rollout::scheduled(&a));
        assert_eq!(h.store.count(Operation::Replace, &key("a")), 1);
    }

    #[tokio::test]
    async fn test_disruptive_change_waits_for_release_then_recreates() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.pass(&["a"], &mut strategy).await;

        strategy.image = "db:2".to_string();
        strategy.config = "v2".to_string();
        h.pass(&["a"], &mut strategy).await;

        let a = h.store.object(&key("a")).unwrap();
        assert_eq!(data(&a, "image"), Some("db:1"));
        assert_eq!(data(&a, "config"), Some("v2"));
        assert!(rollout::scheduled(&a));
        assert!(a.annotations()[rollout::SCHEDULED_ANNOTATION].contains("data.image"));

        // Still unreleased: nothing more to write.
        let writes = h.writes();
        h.pass(&["a"], &mut strategy).await;
        assert_eq!(h.writes(), writes);

        h.release("a");
        let result = h.pass(&["a"], &mut strategy).await;
        assert!(result.is_ok());
        assert_eq!(result.requeue_after, Some(RECREATE_REQUEUE_DELAY));
        assert!(h.store.object(&key("a")).is_none());
        assert_eq!(h.store.count(Operation::Delete, &key("a")), 1);

        h.pass(&["a"], &mut strategy).await;
        let a = h.store.object(&key("a")).unwrap();
        assert_eq!(data(&a, "image"), Some("db:2"));
        assert!(!rollout::scheduled(&a));
        assert!(!rollout::released(&a));
        assert_eq!(h.store.count(Operation::Create, &key("a")), 2);
    }

    #[tokio::test]
    async fn test_rolling_in_place_writes_released_change() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        strategy.mode = UpdateMode::RollingInPlace;
        h.pass(&["a"], &mut strategy).await;
        let uid = h.store.object(&key("a")).unwrap().uid();

        strategy.image = "db:2".to_string();
        h.pass(&["a"], &mut strategy).await;
        assert!(rollout::scheduled(&h.store.object(&key("a")).unwrap()));

        h.release("a");
        let result = h.pass(&["a"], &mut strategy).await;

        assert!(result.is_ok());
        assert_eq!(result.requeue_after, None);
        let a = h.store.object(&key("a")).unwrap();
        assert_eq!(data(&a, "image"), Some("db:2"));
        assert_eq!(a.uid(), uid);
        assert!(!rollout::scheduled(&a));
        assert!(!rollout::released(&a));
        assert_eq!(h.store.count(Operation::Delete, &key("a")), 0);
    }

    #[tokio::test]
    async fn test_stale_rollout_flags_are_cleared() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.pass(&["a"], &mut strategy).await;

        // A change was scheduled and then reverted before anyone released it.
        strategy.image = "db:2".to_string();
        h.pass(&["a"], &mut strategy).await;
        strategy.image = "db:1".to_string();
        h.pass(&["a"], &mut strategy).await;

        let a = h.store.object(&key("a")).unwrap();
        assert!(!rollout::scheduled(&a));
        assert_eq!(data(&a, "image"), Some("db:1"));
    }

    #[tokio::test]
    async fn test_turndown_is_gated_then_deleted_exactly_once() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.pass(&["a", "b"], &mut strategy).await;

        strategy.keep.insert("b".to_string());
        strategy.statuses.clear();
        let result = h.pass(&["a"], &mut strategy).await;

        assert!(result.is_ok());
        assert!(h.store.object(&key("b")).is_some());
        assert_eq!(strategy.orphans[&key("b")].reason, "Draining");
        assert_eq!(strategy.statuses, vec![key("a"), key("b")]);

        h.pass(&["a"], &mut strategy).await;
        assert!(h.store.object(&key("b")).is_some());

        strategy.keep.clear();
        h.pass(&["a"], &mut strategy).await;
        assert!(h.store.object(&key("b")).is_none());

        h.pass(&["a"], &mut strategy).await;
        assert_eq!(h.store.count(Operation::Delete, &key("b")), 1);
        assert_eq!(h.store.keys(), vec![key("a")]);
    }

    #[tokio::test]
    async fn test_terminating_objects_are_left_alone() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        let mut cm = h.seed_owned("old");
        cm.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        h.store.seed(cm);

        let result = h.pass(&[], &mut strategy).await;

        assert!(result.is_ok());
        assert_eq!(h.writes(), 0);
        assert_eq!(strategy.statuses, vec![key("old")]);
    }

    #[tokio::test]
    async fn test_failure_on_one_key_does_not_stop_the_others() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.store.fail_writes_to("b");

        let result = h.pass(&["a", "b", "c"], &mut strategy).await;

        assert!(matches!(result.error, Some(Error::StoreUnavailable(_))));
        assert_eq!(h.store.keys(), vec![key("a"), key("c")]);

        h.store.heal();
        let result = h.pass(&["a", "b", "c"], &mut strategy).await;
        assert!(result.is_ok());
        assert_eq!(h.store.keys(), vec![key("a"), key("b"), key("c")]);
    }

    #[tokio::test]
    async fn test_write_conflicts_are_swallowed() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.pass(&["a"], &mut strategy).await;

        strategy.config = "v2".to_string();
        strategy.statuses.clear();
        h.store.conflict_writes_to("a");
        let result = h.pass(&["a"], &mut strategy).await;

        assert!(result.is_ok());
        assert_eq!(result.requeue_after, Some(CONFLICT_REQUEUE_DELAY));
        assert_eq!(h.store.count(Operation::Replace, &key("a")), 0);
        assert_eq!(strategy.statuses, vec![key("a")]);
    }

    #[tokio::test]
    async fn test_create_conflict_with_our_own_object_requeues() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.store.conflict_writes_to("a");

        let result = h.pass(&["a"], &mut strategy).await;

        assert!(result.is_ok());
        assert_eq!(result.requeue_after, Some(CONFLICT_REQUEUE_DELAY));
        assert_eq!(h.writes(), 0);
    }

    #[tokio::test]
    async fn test_name_taken_by_unowned_object_is_reported() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.store.seed(ConfigMap {
            metadata: ObjectMeta {
                name: Some("a".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        for _ in 0..2 {
            let result = h.pass(&["a"], &mut strategy).await;
            assert!(
                matches!(&result.error, Some(Error::Conflict(msg)) if msg.contains("not owned by main")),
                "{result:?}"
            );
        }
        assert_eq!(h.writes(), 0);
        assert!(strategy.statuses.is_empty());
        assert!(!h.parent.owns(&h.store.object(&key("a")).unwrap()));
    }

    #[tokio::test]
    async fn test_list_failure_writes_nothing() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.seed_owned("old");
        h.store.fail_lists();

        let result = h.pass(&["a", "b"], &mut strategy).await;

        assert!(matches!(result.error, Some(Error::StoreUnavailable(_))));
        assert_eq!(h.writes(), 0);
        assert!(strategy.statuses.is_empty());
        assert!(h.store.object(&key("old")).is_some());

        h.store.heal();
        let result = h.pass(&["a", "b"], &mut strategy).await;
        assert!(result.is_ok());
        assert_eq!(h.store.keys(), vec![key("a"), key("b")]);
    }

    #[tokio::test]
    async fn test_objects_owned_by_someone_else_are_ignored() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();
        h.store.seed(ConfigMap {
            metadata: ObjectMeta {
                name: Some("stray".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(h.selector.clone()),
                ..Default::default()
            },
            ..Default::default()
        });
        h.seed_owned("leftover");

        let result = h.pass(&[], &mut strategy).await;

        assert!(result.is_ok());
        assert!(h.store.object(&key("stray")).is_some());
        assert!(h.store.object(&key("leftover")).is_none());
        assert_eq!(strategy.statuses, vec![key("leftover")]);
    }

    #[tokio::test]
    async fn test_reconcile_object_creates_and_deletes_one_key() {
        let h = Harness::new();
        let mut strategy = TestStrategy::new();

        let result = h.reconciler().reconcile_object(&key("solo"), true, &mut strategy).await;
        assert!(result.is_ok());
        assert!(h.store.object(&key("solo")).is_some());

        let result = h.reconciler().reconcile_object(&key("solo"), false, &mut strategy).await;
        assert!(result.is_ok());
        assert!(h.store.object(&key("solo")).is_none());

        let result = h.reconciler().reconcile_object(&key("solo"), false, &mut strategy).await;
        assert!(result.is_ok());
        assert_eq!(h.store.count(Operation::Delete, &key("solo")), 1);
    }

    #[test]
    fn test_describe_change_names_changed_fields() {
        let before = ConfigMap {
            data: Some(BTreeMap::from([("image".to_string(), "db:1".to_string())])),
            ..Default::default()
        };
        let mut after = before.clone();
        after
            .data
            .as_mut()
            .unwrap()
            .insert("image".to_string(), "db:2".to_string());

        assert_eq!(describe_change(&before, &after), "changes to data.image");
        assert_eq!(describe_change(&before, &before), "pending disruptive update");
    }
}
