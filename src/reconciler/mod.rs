//! Reconciliation is split into small sub-reconcilers that each own one
//! concern (a child object, the status, the remote setup, ...). They run in a
//! fixed order; the first one that asks for a requeue or fails ends the pass.

use crate::{
    config::ControllerConfig,
    endpoint::EndpointStrategy,
    error::{Error, Result},
    telemetry::Metrics,
};
use async_trait::async_trait;
use kube::{client::Client, runtime::controller::Action, Resource, ResourceExt};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub mod apply;
pub mod component;
pub mod ctfd;

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
    pub metrics: Arc<Metrics>,
    pub endpoints: EndpointStrategy,
    pub shutdown: CancellationToken,
}

#[async_trait]
pub trait SubReconciler<K: Send + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some` ends the pass with that action, `None` hands over to the next step.
    async fn reconcile(&self, obj: &K, ctx: &Context) -> Result<Option<Action>>;
}

/// Ordered list of sub-reconcilers for one kind.
pub struct Reconciler<K> {
    steps: Vec<Box<dyn SubReconciler<K>>>,
}

pub struct ReconcilerBuilder<K> {
    steps: Vec<Box<dyn SubReconciler<K>>>,
}

impl<K: Send + Sync> ReconcilerBuilder<K> {
    pub fn with(mut self, step: impl SubReconciler<K> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn build(self) -> Reconciler<K> {
        Reconciler { steps: self.steps }
    }
}

impl<K: Send + Sync> Reconciler<K> {
    pub fn builder() -> ReconcilerBuilder<K> {
        ReconcilerBuilder { steps: Vec::new() }
    }

    pub fn steps(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, obj: &K, ctx: &Context) -> Result<Action> {
        for step in &self.steps {
            match step.reconcile(obj, ctx).await {
                Ok(None) => {}
                Ok(Some(action)) => {
                    debug!(step = step.name(), "Step ended the pass early");
                    return Ok(action);
                }
                // someone else wrote first; their write triggers a fresh pass
                Err(e) if e.is_conflict() => {
                    info!(step = step.name(), "Conflict, waiting for the next event");
                    ctx.metrics.record_conflict();
                    return Ok(Action::await_change());
                }
                Err(e) => {
                    warn!(step = step.name(), error = %e, "Step failed");
                    return Err(e);
                }
            }
        }
        Ok(Action::await_change())
    }
}

/// What a kube-runtime `Controller` is run with.
pub struct ControllerContext<K> {
    pub shared: Arc<Context>,
    pub reconciler: Reconciler<K>,
}

#[instrument(skip(obj, ctx), fields(kind = %K::kind(&()), name = %obj.name_any(), namespace = %obj.namespace().unwrap_or_default()))]
pub async fn reconcile<K>(obj: Arc<K>, ctx: Arc<ControllerContext<K>>) -> Result<Action>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    info!("Reconciling");
    ctx.shared.metrics.record_reconcile();

    // owned objects are garbage collected, nothing to do
    if obj.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    ctx.reconciler.run(&obj, &ctx.shared).await
}

pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<ControllerContext<K>>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    error!("[*] Reconciliation error for {} {}: {:?}", K::kind(&()), obj.name_any(), error);
    ctx.shared.metrics.record_error();

    let config = &ctx.shared.config;
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(config.error_requeue_secs))
    } else {
        Action::requeue(Duration::from_secs(config.error_backoff_secs))
    }
}

#[cfg(test)]
impl Context {
    /// A context whose client points nowhere. Only for steps that never touch it.
    pub fn for_testing() -> Self {
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Self {
            client: Client::try_from(config).unwrap(),
            config: Arc::new(ControllerConfig::default()),
            metrics: Arc::new(Metrics::default()),
            endpoints: EndpointStrategy::InCluster,
            shutdown: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    #[derive(Clone, Copy)]
    enum Outcome {
        Proceed,
        Requeue,
        Conflict,
        Fail,
    }
    use Outcome::*;

    struct Step {
        name: &'static str,
        outcome: Outcome,
        journal: Journal,
    }

    #[async_trait]
    impl SubReconciler<()> for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn reconcile(&self, _: &(), _: &Context) -> Result<Option<Action>> {
            self.journal.lock().unwrap().push(self.name);
            match self.outcome {
                Proceed => Ok(None),
                Requeue => Ok(Some(Action::requeue(Duration::from_secs(5)))),
                Conflict => Err(Error::Conflict("the object has been modified".into())),
                Fail => Err(Error::MissingObjectKey("metadata.namespace")),
            }
        }
    }

    fn reconciler(steps: &[(&'static str, Outcome)]) -> (Reconciler<()>, Journal) {
        let journal = Journal::default();
        let mut builder = Reconciler::builder();
        for &(name, outcome) in steps {
            builder = builder.with(Step {
                name,
                outcome,
                journal: journal.clone(),
            });
        }
        (builder.build(), journal)
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let (reconciler, journal) = reconciler(&[("a", Proceed), ("b", Proceed), ("c", Proceed)]);
        let action = reconciler.run(&(), &Context::for_testing()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(*journal.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(reconciler.steps(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn requeue_ends_the_pass() {
        let (reconciler, journal) = reconciler(&[("a", Proceed), ("b", Requeue), ("c", Proceed)]);
        let action = reconciler.run(&(), &Context::for_testing()).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert_eq!(*journal.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn conflict_is_swallowed() {
        let ctx = Context::for_testing();
        let (reconciler, journal) = reconciler(&[("a", Conflict), ("b", Proceed)]);
        let action = reconciler.run(&(), &ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(*journal.lock().unwrap(), vec!["a"]);
        assert_eq!(ctx.metrics.conflicts.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn errors_end_the_pass() {
        let (reconciler, journal) = reconciler(&[("a", Fail), ("b", Proceed)]);
        let result = reconciler.run(&(), &Context::for_testing()).await;

        assert!(matches!(result, Err(Error::MissingObjectKey(_))));
        assert_eq!(*journal.lock().unwrap(), vec!["a"]);
    }
}
