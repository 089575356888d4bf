use ctf_ui_operator::{
    config::ControllerConfig,
    crds::{CTFd, ChallengeDescription, MariaDB, Minio, Redis},
    endpoint::EndpointStrategy,
    error::Error,
    reconciler::{
        self,
        component::{mariadb_reconciler, minio_reconciler, redis_reconciler},
        ctfd::ctfd_reconciler,
        Context, ControllerContext, Reconciler,
    },
    telemetry::{self, Metrics},
};
use futures::{channel::mpsc, Future, StreamExt};
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{PersistentVolumeClaim, Secret, Service, ServiceAccount},
    },
    NamespaceResourceScope,
};
use kube::{
    runtime::{
        controller::{Action, Controller, Error as ControllerError},
        reflector::ObjectRef,
        watcher::{self, Config as WatcherConfig},
    },
    Api, Client, Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{fmt::Debug, pin::Pin, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;
    let metrics = Arc::new(Metrics::default());

    info!("Starting CTF UI operator");
    let config = Arc::new(ControllerConfig::load()?);
    info!("Configuration loaded");
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    let endpoints =
        EndpointStrategy::from_config(&config, client.clone(), shutdown.clone(), metrics.clone());

    let shared = Arc::new(Context {
        client,
        config,
        metrics,
        endpoints,
        shutdown: shutdown.clone(),
    });

    let controllers = vec![
        ctfd_controller(&shared),
        component_controller(&shared, redis_reconciler()),
        component_controller(&shared, mariadb_reconciler()),
        component_controller(&shared, minio_reconciler()),
    ];

    info!("Starting controller loops");
    futures::future::join_all(controllers).await;

    // closes open port forwards
    shutdown.cancel();
    info!("Controllers stopped");
    Ok(())
}

/// Fires every `interval` until shutdown, used to reconcile everything periodically
/// so drift in CTFd itself gets corrected.
fn resync_trigger(interval: Duration, shutdown: CancellationToken) -> mpsc::Receiver<()> {
    let (mut reload_tx, reload_rx) = mpsc::channel(0);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = reload_tx.try_send(());
                }
            }
        }
    });
    reload_rx
}

async fn log_reconcile_result<K>(
    result: Result<(ObjectRef<K>, Action), ControllerError<Error, watcher::Error>>,
) where
    K: Resource<DynamicType = ()>,
{
    match result {
        Ok((obj, action)) => debug!("Reconciled {}: {:?}", obj, action),
        // if the object cannot be found it was likely deleted. we can ignore this.
        Err(ControllerError::ObjectNotFound(_)) => {}
        Err(e) => warn!("[!] Reconciliation error: {:?}", e),
    }
}

fn ctfd_controller(shared: &Arc<Context>) -> ControllerFuture {
    let client = shared.client.clone();
    let ctx = Arc::new(ControllerContext {
        shared: shared.clone(),
        reconciler: ctfd_reconciler(),
    });

    let controller = Controller::new(Api::<CTFd>::all(client.clone()), WatcherConfig::default());
    let ctfds = controller.store();

    let controller = controller
        .owns(Api::<Secret>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<ServiceAccount>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Redis>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<MariaDB>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Minio>::all(client.clone()), WatcherConfig::default())
        // every CTFd reading challenges from the namespace of a changed description
        .watches(
            Api::<ChallengeDescription>::all(client),
            WatcherConfig::default(),
            move |description| {
                let namespace = description.namespace().unwrap_or_default();
                ctfds
                    .state()
                    .into_iter()
                    .filter(|ctfd| ctfd.challenge_namespace() == Some(namespace.as_str()))
                    .map(|ctfd| ObjectRef::from_obj(&*ctfd))
                    .collect::<Vec<_>>()
            },
        )
        .reconcile_all_on(resync_trigger(
            shared.config.resync_interval(),
            shared.shutdown.clone(),
        ))
        .shutdown_on_signal()
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(log_reconcile_result);

    Box::pin(controller)
}

fn component_controller<K>(shared: &Arc<Context>, reconciler: Reconciler<K>) -> ControllerFuture
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let client = shared.client.clone();
    let ctx = Arc::new(ControllerContext {
        shared: shared.clone(),
        reconciler,
    });

    let controller = Controller::new(Api::<K>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Secret>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<ServiceAccount>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client), WatcherConfig::default())
        .reconcile_all_on(resync_trigger(
            shared.config.resync_interval(),
            shared.shutdown.clone(),
        ))
        .shutdown_on_signal()
        .run(reconciler::reconcile, reconciler::error_policy, ctx)
        .for_each(log_reconcile_result);

    Box::pin(controller)
}
