//! Controller loop shared by every parent kind
//!
//! Wraps a kube-rs [`Controller`] with the pieces each controller needs: the
//! configured concurrency, timer-driven resyncs fed in next to watch events,
//! a per-pass deadline, metrics, and a uniform error policy.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::{Api, ListParams},
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::metrics::{MetricsRecorder, NoopRecorder};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::key::ObjectKey;
use crate::resync::{PeriodicResync, ResyncEvents};

/// Shared state handed to every reconcile pass
pub struct Context<C> {
    /// Controller name used in logs and metric labels
    pub name: String,
    pub config: ControllerConfig,
    pub resync: PeriodicResync,
    pub metrics: Arc<dyn MetricsRecorder>,
    /// Controller-specific state, typically holding the kube `Client`
    pub state: C,
}

impl<C> Context<C> {
    /// Must be called inside a tokio runtime; starts the resync loop.
    pub fn new(name: impl Into<String>, config: ControllerConfig, state: C) -> (Self, ResyncEvents) {
        let (resync, events) = PeriodicResync::new(config.resync_period);
        let ctx = Self {
            name: name.into(),
            config,
            resync,
            metrics: Arc::new(NoopRecorder),
            state,
        };
        (ctx, events)
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Main entry point to start a controller for parent kind `K`
///
/// `configure` runs on the built [`Controller`] before it starts, typically to
/// add `.owns(..)` watches on the child kinds so that child writes trigger a
/// pass on their parent.
#[instrument(skip_all, fields(controller = %ctx.name))]
pub async fn run_controller<K, C, W, F, Fut>(
    api: Api<K>,
    ctx: Arc<Context<C>>,
    resync: ResyncEvents,
    configure: W,
    reconcile: F,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    C: Send + Sync + 'static,
    W: FnOnce(Controller<K>) -> Controller<K>,
    F: Fn(Arc<K>, Arc<Context<C>>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Action>> + Send + 'static,
{
    ctx.config.validate()?;
    info!("Starting {} controller", ctx.name);

    let config = controller::Config::default().concurrency(ctx.config.max_concurrent_reconciles);
    let controller = configure(
        Controller::new(api.clone(), watcher::Config::default())
            .with_config(config)
            .reconcile_on(resync.into_object_refs::<K>()),
    );

    // Fail fast when the kind is not served, e.g. a missing CRD
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("{} is not available: {}", K::kind(&()), e);
        return Err(Error::from_kube(e, K::kind(&()).to_string()));
    }

    controller
        .shutdown_on_signal()
        .run(
            move |obj: Arc<K>, ctx: Arc<Context<C>>| {
                let pass = reconcile(obj.clone(), ctx.clone());
                supervise(obj, ctx, pass)
            },
            error_policy,
            ctx.clone(),
        )
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!("Reconciled {}: {:?}", obj, action),
                Err(e) => warn!("Reconcile failed: {}", e),
            }
        })
        .await;

    info!("{} controller stopped", ctx.name);
    Ok(())
}

/// Run one pass under the configured deadline, then record it and put the
/// object back on the resync timer.
pub(crate) async fn supervise<K, C, Fut>(obj: Arc<K>, ctx: Arc<Context<C>>, pass: Fut) -> Result<Action>
where
    K: Resource,
    Fut: Future<Output = Result<Action>>,
{
    let key = ObjectKey::from_resource(obj.as_ref());
    let started = Instant::now();
    let timeout = ctx.config.reconcile_timeout;

    let outcome = match tokio::time::timeout(timeout, pass).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!("Reconcile of {} did not finish within {:?}", key, timeout);
            Err(Error::Timeout(timeout))
        }
    };

    let label = match &outcome {
        Ok(_) => "success",
        Err(e) => e.metric_label(),
    };
    ctx.metrics.observe_reconcile(&ctx.name, started.elapsed(), label);

    if obj.meta().deletion_timestamp.is_some() {
        ctx.resync.dequeue(key);
    } else {
        ctx.resync.enqueue(key);
    }
    outcome
}

pub fn error_policy<K, C>(obj: Arc<K>, error: &Error, _ctx: Arc<Context<C>>) -> Action
where
    K: Resource,
{
    error!("Reconciliation error for {}: {}", obj.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
