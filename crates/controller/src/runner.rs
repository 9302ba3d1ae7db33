//! Drives the reconciler with kube's `Controller`: Operator changes and
//! component events both trigger reconciles, failures requeue with backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{stream, Stream, StreamExt};
use kube::{
    runtime::{
        controller::{self, Action, Controller},
        reflector::ObjectRef,
        watcher,
    },
    Api, Client, ResourceExt,
};
use metrics::{counter, histogram};
use opdisco_core::Operator;
use opdisco_kubehub::ComponentEvent;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::error::ReconcileError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::ResourceStore;

/// Knobs of the reconcile loop.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Reconciles allowed to run at once (distinct Operators only).
    pub workers: u16,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { workers: 2, backoff_base: Duration::from_millis(500), backoff_max: Duration::from_secs(300) }
    }
}

/// Shared state handed to every reconcile and error policy call.
pub struct Context<S: ResourceStore + ?Sized> {
    reconciler: Arc<Reconciler<S>>,
    backoff: Backoff,
}

impl<S: ResourceStore + ?Sized> Context<S> {
    pub fn new(reconciler: Arc<Reconciler<S>>, config: &ControllerConfig) -> Self {
        Self { reconciler, backoff: Backoff::new(config.backoff_base, config.backoff_max) }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<S>> { &self.reconciler }

    pub fn backoff(&self) -> &Backoff { &self.backoff }
}

pub async fn reconcile_operator<S>(operator: Arc<Operator>, ctx: Arc<Context<S>>) -> Result<Action, ReconcileError>
where
    S: ResourceStore + ?Sized,
{
    let name = operator.name_any();
    let started = Instant::now();
    let result = ctx.reconciler.reconcile(&name).await;
    histogram!("opdisco_reconcile_latency_ms", started.elapsed().as_secs_f64() * 1000.0);
    match &result {
        Ok(outcome) => {
            let label = match outcome {
                ReconcileOutcome::Updated { .. } => "updated",
                ReconcileOutcome::Gone => "gone",
            };
            counter!("opdisco_reconcile_total", 1u64, "result" => label);
            ctx.backoff.forget(&name);
        }
        Err(e) => counter!("opdisco_reconcile_total", 1u64, "result" => e.reason()),
    }
    result.map(|_| Action::await_change())
}

/// Retryable failures come back after a per-Operator exponential delay;
/// terminal ones wait for the Operator or a component to change.
pub fn error_policy<S>(operator: Arc<Operator>, error: &ReconcileError, ctx: Arc<Context<S>>) -> Action
where
    S: ResourceStore + ?Sized,
{
    let name = operator.name_any();
    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&name);
        warn!(operator = %name, error = %error, retry_in_ms = delay.as_millis() as u64, "reconcile failed; requeueing");
        Action::requeue(delay)
    } else {
        error!(operator = %name, error = %error, "reconcile failed; not retrying");
        ctx.backoff.forget(&name);
        Action::await_change()
    }
}

/// Reconcile requests for the Operators named by each component event.
pub fn component_requests<S>(
    reconciler: Arc<Reconciler<S>>,
    events: mpsc::Receiver<ComponentEvent>,
) -> impl Stream<Item = ObjectRef<Operator>> + Send + 'static
where
    S: ResourceStore + ?Sized + 'static,
{
    stream::unfold((reconciler, events), |(reconciler, mut events)| async move {
        let event = events.recv().await?;
        let names = reconciler.map_component_event(&event).await;
        Some((names, (reconciler, events)))
    })
    .flat_map(|names| stream::iter(names.into_iter().map(|name| ObjectRef::new(&name))))
}

/// Handle one item of the controller's output stream. A request for an
/// Operator the controller does not know means it is gone.
pub fn on_controller_result<S>(
    reconciler: &Reconciler<S>,
    result: Result<(ObjectRef<Operator>, Action), controller::Error<ReconcileError, watcher::Error>>,
) where
    S: ResourceStore + ?Sized,
{
    match result {
        Ok((obj, action)) => debug!(operator = %obj.name, ?action, "reconciled"),
        Err(controller::Error::ObjectNotFound(obj)) => {
            reconciler.observed().unobserve(&obj.name);
            debug!(operator = %obj.name, "operator gone; dropped from observed set");
        }
        // Already logged by the error policy.
        Err(controller::Error::ReconcilerFailed(..)) => {}
        Err(e) => warn!(error = %e, "controller error"),
    }
}

/// Run until ctrl-c: watch Operators, take component events from `events`
/// and reconcile with at most `config.workers` Operators at a time.
pub async fn run<S>(client: Client, reconciler: Arc<Reconciler<S>>, events: mpsc::Receiver<ComponentEvent>, config: ControllerConfig)
where
    S: ResourceStore + ?Sized + 'static,
{
    let operators: Api<Operator> = Api::all(client);
    let ctx = Arc::new(Context::new(Arc::clone(&reconciler), &config));
    info!(workers = config.workers, "controller running");
    Controller::new(operators, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(config.workers))
        .reconcile_on(component_requests(Arc::clone(&reconciler), events))
        .shutdown_on_signal()
        .run(reconcile_operator::<S>, error_policy::<S>, ctx)
        .for_each(|result| {
            on_controller_result(&*reconciler, result);
            futures::future::ready(())
        })
        .await;
    info!("controller stopped");
}
