//! Local port tunnels into the cluster, used when the operator runs outside of it.
//!
//! One tunnel exists per (namespace, service, port). It is registered before it
//! becomes ready so concurrent callers for the same key share it, and it stays
//! open for reuse until the pod goes away or the operator shuts down.

use crate::{
    error::{Error, Result},
    telemetry::Metrics,
};
use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{Pod, Service, ServicePort},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{
    api::{Api, ListParams},
    Client, ResourceExt,
};
use std::{
    collections::HashMap,
    fmt,
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::{watch, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Port of a Service, by number or by name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServicePortRef {
    Number(i32),
    Name(String),
}

impl ServicePortRef {
    fn matches(&self, port: &ServicePort) -> bool {
        match self {
            ServicePortRef::Number(number) => port.port == *number,
            ServicePortRef::Name(name) => port.name.as_deref() == Some(name.as_str()),
        }
    }
}

impl fmt::Display for ServicePortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServicePortRef::Number(number) => write!(f, "{}", number),
            ServicePortRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TunnelKey {
    pub namespace: String,
    pub name: String,
    pub port: ServicePortRef,
}

impl fmt::Display for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

/// The pod and container port a tunnel forwards to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodTarget {
    pub namespace: String,
    pub pod: String,
    pub port: u16,
}

pub trait TunnelStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelStream for T {}

#[async_trait]
pub trait TunnelBackend: Send + Sync + 'static {
    /// Map a service port to a ready pod behind it.
    async fn resolve(&self, key: &TunnelKey) -> Result<PodTarget>;

    /// Open one stream to the target pod port.
    async fn connect(&self, target: &PodTarget) -> Result<Box<dyn TunnelStream>>;
}

/// Tunnels through the Kubernetes pod portforward subresource
pub struct KubeTunnelBackend {
    client: Client,
}

impl KubeTunnelBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TunnelBackend for KubeTunnelBackend {
    async fn resolve(&self, key: &TunnelKey) -> Result<PodTarget> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &key.namespace);
        let service = services
            .get_opt(&key.name)
            .await?
            .ok_or_else(|| Error::ServiceNotFound {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
            })?;
        let spec = service.spec.unwrap_or_default();

        let service_port = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .find(|p| key.port.matches(p))
            .ok_or_else(|| Error::PortNotFound {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                port: key.port.to_string(),
            })?;
        let target_port = service_port
            .target_port
            .unwrap_or(IntOrString::Int(service_port.port));

        let no_ready_pod = || Error::NoReadyPod {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        };

        let selector = spec.selector.unwrap_or_default();
        if selector.is_empty() {
            return Err(no_ready_pod());
        }
        let selector = selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        let pod = pods
            .list(&ListParams::default().labels(&selector))
            .await?
            .items
            .into_iter()
            .find(pod_ready)
            .ok_or_else(no_ready_pod)?;

        let port = container_port(&pod, &target_port).ok_or_else(|| Error::PortNotFound {
            namespace: key.namespace.clone(),
            name: pod.name_any(),
            port: match &target_port {
                IntOrString::Int(number) => number.to_string(),
                IntOrString::String(name) => name.clone(),
            },
        })?;

        Ok(PodTarget {
            namespace: key.namespace.clone(),
            pod: pod.name_any(),
            port,
        })
    }

    async fn connect(&self, target: &PodTarget) -> Result<Box<dyn TunnelStream>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let mut forwarder = pods.portforward(&target.pod, &[target.port]).await?;
        let stream = forwarder.take_stream(target.port).ok_or_else(|| {
            Error::TunnelError(format!(
                "failed to get stream for port {} on {}",
                target.port, target.pod
            ))
        })?;

        tokio::spawn(async move {
            if let Err(e) = forwarder.join().await {
                debug!(error = %e, "Port forward ended with error");
            }
        });

        Ok(Box::new(stream))
    }
}

fn pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .as_ref()
            .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
            .is_some_and(|c| c.status == "True")
}

fn container_port(pod: &Pod, target_port: &IntOrString) -> Option<u16> {
    match target_port {
        IntOrString::Int(number) => u16::try_from(*number).ok(),
        IntOrString::String(name) => pod
            .spec
            .as_ref()?
            .containers
            .iter()
            .flat_map(|c| c.ports.iter().flatten())
            .find(|p| p.name.as_deref() == Some(name.as_str()))
            .and_then(|p| u16::try_from(p.container_port).ok()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum TunnelState {
    Pending,
    Ready(u16),
    Closed(Option<String>),
}

struct Registration {
    id: u64,
    state: watch::Receiver<TunnelState>,
    stop: CancellationToken,
    /// Callers currently waiting for the tunnel to become ready
    waiters: Arc<AtomicUsize>,
}

type Registry = Arc<Mutex<HashMap<TunnelKey, Registration>>>;

pub struct PortForwarder<B: TunnelBackend = KubeTunnelBackend> {
    backend: Arc<B>,
    tunnels: Registry,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    ready_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl<B: TunnelBackend> PortForwarder<B> {
    /// Cancelling `shutdown` closes every tunnel.
    pub fn new(
        backend: B,
        shutdown: CancellationToken,
        ready_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            backend: Arc::new(backend),
            tunnels: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            shutdown,
            ready_timeout,
            metrics,
        }
    }

    /// Return the local port of the tunnel for `key`, opening it if necessary.
    #[instrument(skip(self, cancel), fields(tunnel = %key))]
    pub async fn forward(&self, key: &TunnelKey, cancel: &CancellationToken) -> Result<u16> {
        let (id, mut state, stop, waiters) = {
            let mut tunnels = self.tunnels.lock().await;
            match tunnels.get(key) {
                Some(existing) => {
                    existing.waiters.fetch_add(1, Ordering::SeqCst);
                    (
                        existing.id,
                        existing.state.clone(),
                        existing.stop.clone(),
                        existing.waiters.clone(),
                    )
                }
                None => {
                    let target = self.backend.resolve(key).await?;
                    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let (state_tx, state_rx) = watch::channel(TunnelState::Pending);
                    let stop = self.shutdown.child_token();
                    let waiters = Arc::new(AtomicUsize::new(1));

                    tunnels.insert(
                        key.clone(),
                        Registration {
                            id,
                            state: state_rx.clone(),
                            stop: stop.clone(),
                            waiters: waiters.clone(),
                        },
                    );

                    let task = TunnelTask {
                        backend: self.backend.clone(),
                        tunnels: self.tunnels.clone(),
                        key: key.clone(),
                        id,
                        target,
                        listener,
                        state: state_tx,
                        stop: stop.clone(),
                        metrics: self.metrics.clone(),
                    };
                    tokio::spawn(task.run());

                    (id, state_rx, stop, waiters)
                }
            }
        };

        let ready = async {
            state
                .wait_for(|s| *s != TunnelState::Pending)
                .await
                .map(|s| s.clone())
        };

        let failure = tokio::select! {
            state = ready => match state {
                Ok(TunnelState::Ready(port)) => {
                    waiters.fetch_sub(1, Ordering::SeqCst);
                    return Ok(port);
                }
                Ok(TunnelState::Closed(Some(reason))) => Error::TunnelError(reason),
                _ => Error::TunnelError(format!("tunnel {} closed before becoming ready", key)),
            },
            _ = cancel.cancelled() => Error::TunnelCancelled(key.to_string()),
            _ = tokio::time::sleep(self.ready_timeout) => {
                Error::TunnelError(format!("timed out waiting for tunnel {}", key))
            }
        };

        self.give_up(key, id, &waiters, &stop).await;
        Err(failure)
    }

    /// Drop out of the wait. The last caller to leave closes a tunnel that
    /// never became ready.
    async fn give_up(&self, key: &TunnelKey, id: u64, waiters: &AtomicUsize, stop: &CancellationToken) {
        let mut tunnels = self.tunnels.lock().await;
        if waiters.fetch_sub(1, Ordering::SeqCst) > 1 {
            return;
        }
        stop.cancel();
        if tunnels.get(key).is_some_and(|r| r.id == id) {
            tunnels.remove(key);
        }
    }

    /// Number of registered tunnels, pending or ready.
    pub async fn registered(&self) -> usize {
        self.tunnels.lock().await.len()
    }
}

async fn unregister(tunnels: &Registry, key: &TunnelKey, id: u64) {
    let mut tunnels = tunnels.lock().await;
    // a newer tunnel may already have taken the slot
    if tunnels.get(key).is_some_and(|r| r.id == id) {
        tunnels.remove(key);
    }
}

struct TunnelTask<B> {
    backend: Arc<B>,
    tunnels: Registry,
    key: TunnelKey,
    id: u64,
    target: PodTarget,
    listener: TcpListener,
    state: watch::Sender<TunnelState>,
    stop: CancellationToken,
    metrics: Arc<Metrics>,
}

impl<B: TunnelBackend> TunnelTask<B> {
    async fn run(self) {
        let reason = match self.serve().await {
            Ok(()) => None,
            Err(e) => {
                warn!(tunnel = %self.key, error = %e, "Tunnel terminated");
                Some(e.to_string())
            }
        };
        self.state.send_replace(TunnelState::Closed(reason));
        unregister(&self.tunnels, &self.key, self.id).await;
        debug!(tunnel = %self.key, "Tunnel unregistered");
    }

    async fn serve(&self) -> Result<()> {
        let port = self.listener.local_addr()?.port();

        // the pod has to accept one stream before callers get the port
        tokio::select! {
            probe = self.backend.connect(&self.target) => drop(probe?),
            _ = self.stop.cancelled() => return Ok(()),
        }

        info!(
            tunnel = %self.key,
            pod = %self.target.pod,
            local_port = port,
            "Tunnel established"
        );
        self.state.send_replace(TunnelState::Ready(port));

        self.metrics.incr_open_tunnels();
        let result = self.accept_loop().await;
        self.metrics.decr_open_tunnels();
        result
    }

    async fn accept_loop(&self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                accepted = self.listener.accept() => {
                    let (mut socket, _) = accepted?;
                    let backend = self.backend.clone();
                    let target = self.target.clone();
                    let stop = self.stop.clone();
                    tokio::spawn(async move {
                        let mut upstream = match backend.connect(&target).await {
                            Ok(upstream) => upstream,
                            Err(e) => {
                                warn!(pod = %target.pod, error = %e, "Pod unreachable, closing tunnel");
                                stop.cancel();
                                return;
                            }
                        };
                        match tokio::io::copy_bidirectional(&mut socket, &mut upstream).await {
                            Ok((sent, received)) => debug!(sent, received, "Tunnel connection closed"),
                            Err(e) => debug!(error = %e, "Tunnel connection error"),
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, ContainerPort, PodCondition, PodSpec, PodStatus,
    };
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[derive(Default)]
    struct EchoBackend {
        resolves: AtomicUsize,
        connects: AtomicUsize,
        unreachable: bool,
        hang: bool,
        slow: bool,
    }

    #[async_trait]
    impl TunnelBackend for EchoBackend {
        async fn resolve(&self, key: &TunnelKey) -> Result<PodTarget> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            // widen the window in which a second caller could race us
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(PodTarget {
                namespace: key.namespace.clone(),
                pod: format!("{}-0", key.name),
                port: 8000,
            })
        }

        async fn connect(&self, _target: &PodTarget) -> Result<Box<dyn TunnelStream>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.slow {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            if self.unreachable {
                return Err(Error::TunnelError("connection refused".into()));
            }
            let (client, server) = tokio::io::duplex(1024);
            tokio::spawn(async move {
                let (mut reader, mut writer) = tokio::io::split(server);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
            Ok(Box::new(client))
        }
    }

    fn key() -> TunnelKey {
        TunnelKey {
            namespace: "ctf".into(),
            name: "demo".into(),
            port: ServicePortRef::Name("http".into()),
        }
    }

    fn forwarder(backend: EchoBackend, shutdown: CancellationToken) -> Arc<PortForwarder<EchoBackend>> {
        Arc::new(PortForwarder::new(
            backend,
            shutdown,
            Duration::from_secs(5),
            Arc::new(Metrics::default()),
        ))
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_tunnel() {
        let forwarder = forwarder(EchoBackend::default(), CancellationToken::new());
        let cancel = CancellationToken::new();
        let key = key();

        let (first, second) = tokio::join!(
            forwarder.forward(&key, &cancel),
            forwarder.forward(&key, &cancel)
        );
        let port = first.unwrap();
        assert_eq!(port, second.unwrap());
        assert_eq!(forwarder.backend.resolves.load(Ordering::SeqCst), 1);
        assert_eq!(forwarder.registered().await, 1);

        let mut socket = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        socket.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // a later call reuses the warm tunnel
        assert_eq!(forwarder.forward(&key, &cancel).await.unwrap(), port);
        assert_eq!(forwarder.backend.resolves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_caller_leaves_pending_tunnel_to_others() {
        let backend = EchoBackend {
            slow: true,
            ..Default::default()
        };
        let forwarder = forwarder(backend, CancellationToken::new());
        let key = key();
        let impatient = CancellationToken::new();
        let patient = CancellationToken::new();

        let canceller = impatient.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let (first, second) = tokio::join!(
            forwarder.forward(&key, &impatient),
            forwarder.forward(&key, &patient)
        );
        assert!(matches!(first, Err(Error::TunnelCancelled(_))));
        let port = second.unwrap();
        assert_eq!(forwarder.registered().await, 1);
        assert_eq!(forwarder.backend.resolves.load(Ordering::SeqCst), 1);
        assert_eq!(forwarder.forward(&key, &patient).await.unwrap(), port);
    }

    #[tokio::test]
    async fn unreachable_pod_releases_registration() {
        let backend = EchoBackend {
            unreachable: true,
            ..Default::default()
        };
        let forwarder = forwarder(backend, CancellationToken::new());
        let cancel = CancellationToken::new();

        let err = forwarder.forward(&key(), &cancel).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(forwarder.registered().await, 0);

        assert!(forwarder.forward(&key(), &cancel).await.is_err());
        assert_eq!(forwarder.backend.resolves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_releases_registration() {
        let backend = EchoBackend {
            hang: true,
            ..Default::default()
        };
        let forwarder = forwarder(backend, CancellationToken::new());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = forwarder.forward(&key(), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::TunnelCancelled(_)));
        assert_eq!(forwarder.registered().await, 0);
    }

    #[tokio::test]
    async fn shutdown_closes_tunnels() {
        let shutdown = CancellationToken::new();
        let forwarder = forwarder(EchoBackend::default(), shutdown.clone());
        forwarder
            .forward(&key(), &CancellationToken::new())
            .await
            .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), async {
            while forwarder.registered().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    fn pod(phase: &str, ready: &str) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "ctfd".into(),
                    ports: Some(vec![ContainerPort {
                        name: Some("http".into()),
                        container_port: 8000,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.into()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".into(),
                    status: ready.into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn only_running_and_ready_pods_qualify() {
        assert!(pod_ready(&pod("Running", "True")));
        assert!(!pod_ready(&pod("Running", "False")));
        assert!(!pod_ready(&pod("Pending", "True")));
        assert!(!pod_ready(&Pod::default()));
    }

    #[test]
    fn container_port_by_name_or_number() {
        let pod = pod("Running", "True");
        assert_eq!(container_port(&pod, &IntOrString::String("http".into())), Some(8000));
        assert_eq!(container_port(&pod, &IntOrString::Int(9000)), Some(9000));
        assert_eq!(container_port(&pod, &IntOrString::String("metrics".into())), None);
    }
}
