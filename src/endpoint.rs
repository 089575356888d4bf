use crate::{
    config::{ControllerConfig, EndpointMode},
    error::{Error, Result},
    port_forward::{KubeTunnelBackend, PortForwarder, ServicePortRef, TunnelKey},
    telemetry::Metrics,
};
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A port on a Service the operator needs to talk to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceTarget {
    pub namespace: String,
    pub name: String,
    pub port_name: String,
    pub port: u16,
}

/// How services inside the cluster are reached. Chosen once at startup.
#[derive(Clone)]
pub enum EndpointStrategy {
    /// Cluster DNS, `<service>.<namespace>:<port>`
    InCluster,
    /// Local port forwards, `127.0.0.1:<port>`
    OutOfCluster(Arc<PortForwarder>),
}

impl EndpointStrategy {
    pub fn from_config(
        config: &ControllerConfig,
        client: Client,
        shutdown: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> Self {
        let in_cluster = match config.endpoint_mode {
            EndpointMode::InCluster => true,
            EndpointMode::OutOfCluster => false,
            EndpointMode::Auto => kube::Config::incluster().is_ok(),
        };

        if in_cluster {
            info!("Reaching services through cluster DNS");
            EndpointStrategy::InCluster
        } else {
            info!("Reaching services through port forwards");
            EndpointStrategy::OutOfCluster(Arc::new(PortForwarder::new(
                KubeTunnelBackend::new(client),
                shutdown,
                config.tunnel_ready_timeout(),
                metrics,
            )))
        }
    }

    /// Address (`host:port`) under which `target` is reachable from this process.
    pub async fn endpoint(&self, target: &ServiceTarget, cancel: &CancellationToken) -> Result<String> {
        if target.name.is_empty() || target.namespace.is_empty() {
            return Err(Error::InvalidEndpoint(format!(
                "service name and namespace are required, got {:?}",
                target
            )));
        }

        match self {
            EndpointStrategy::InCluster => Ok(format!(
                "{}.{}:{}",
                target.name, target.namespace, target.port
            )),
            EndpointStrategy::OutOfCluster(forwarder) => {
                let key = TunnelKey {
                    namespace: target.namespace.clone(),
                    name: target.name.clone(),
                    port: ServicePortRef::Name(target.port_name.clone()),
                };
                let local_port = forwarder.forward(&key, cancel).await?;
                Ok(format!("127.0.0.1:{}", local_port))
            }
        }
    }
}
