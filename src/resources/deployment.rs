use super::{child_meta, labels};
use crate::{
    config::ControllerConfig,
    crds::{CTFd, ComponentResource, MariaDB, Minio, Redis, ResourceRequirementsSpec},
    diff::UpdatePolicy,
    error::Result,
};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy},
        core::v1::{
            Capabilities, Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource,
            HTTPGetAction, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
            PodTemplateSpec, Probe, ResourceRequirements, SecretEnvSource, SecurityContext,
            Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
};
use kube::{api::ObjectMeta, Resource, ResourceExt};

pub const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Fields(&["spec"]);

pub const CTFD_PORT: (&str, i32) = ("http", 8000);
pub const REDIS_PORT: (&str, i32) = ("redis", 6379);
pub const MARIADB_PORT: (&str, i32) = ("mariadb", 3306);
pub const MINIO_PORT: (&str, i32) = ("minio", 9000);

const TMP_VOLUME: &str = "tmp";
const DATA_VOLUME: &str = "data";

/// The single-container pod shape shared by CTFd and its components.
struct Workload<'a> {
    app: &'static str,
    image: &'a str,
    replicas: i32,
    run_as_user: i64,
    read_only_root: bool,
    port: (&'static str, i32),
    env_secret: Option<String>,
    data_mount: Option<&'static str>,
    probe_path: Option<&'static str>,
    recreate: bool,
    resources: Option<&'a ResourceRequirementsSpec>,
}

impl Workload<'_> {
    fn build<K>(self, owner: &K) -> Result<Deployment>
    where
        K: Resource<DynamicType = ()>,
    {
        let name = owner.name_any();
        let selector = labels::selector_labels(self.app, &name);

        let mut volumes = vec![Volume {
            name: TMP_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: Some(Quantity("128Mi".to_string())),
            }),
            ..Default::default()
        }];
        let mut volume_mounts = vec![VolumeMount {
            name: TMP_VOLUME.to_string(),
            mount_path: "/tmp".to_string(),
            ..Default::default()
        }];
        if let Some(mount_path) = self.data_mount {
            volumes.push(Volume {
                name: DATA_VOLUME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            });
            volume_mounts.push(VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: mount_path.to_string(),
                ..Default::default()
            });
        }

        let probe = self.probe_path.map(|path| Probe {
            http_get: Some(HTTPGetAction {
                path: Some(path.to_string()),
                port: IntOrString::String(self.port.0.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });

        let container = Container {
            name: self.app.to_string(),
            image: Some(self.image.to_string()),
            ports: Some(vec![ContainerPort {
                name: Some(self.port.0.to_string()),
                container_port: self.port.1,
                ..Default::default()
            }]),
            env_from: self.env_secret.map(|secret| {
                vec![EnvFromSource {
                    secret_ref: Some(SecretEnvSource {
                        name: secret,
                        ..Default::default()
                    }),
                    ..Default::default()
                }]
            }),
            volume_mounts: Some(volume_mounts),
            resources: Some(
                self.resources
                    .map(ResourceRequirementsSpec::to_requirements)
                    .unwrap_or_else(ResourceRequirements::default),
            ),
            startup_probe: probe.clone(),
            readiness_probe: probe.clone(),
            liveness_probe: probe,
            security_context: Some(build_security_context(self.read_only_root)),
            ..Default::default()
        };

        Ok(Deployment {
            metadata: child_meta(owner, name.clone(), self.app)?,
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector.clone()),
                    ..Default::default()
                },
                strategy: self.recreate.then(|| DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels::labels(self.app, &name)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(name),
                        automount_service_account_token: Some(false),
                        enable_service_links: Some(false),
                        security_context: Some(PodSecurityContext {
                            run_as_user: Some(self.run_as_user),
                            run_as_non_root: Some(true),
                            ..Default::default()
                        }),
                        containers: vec![container],
                        volumes: Some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn build_security_context(read_only_root: bool) -> SecurityContext {
    SecurityContext {
        privileged: Some(false),
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(read_only_root),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ctfd_deployment(ctfd: &CTFd, config: &ControllerConfig) -> Result<Deployment> {
    Workload {
        app: "ctfd",
        image: &config.ctfd_image,
        replicas: ctfd.spec.replicas,
        run_as_user: 1001,
        read_only_root: true,
        port: CTFD_PORT,
        env_secret: Some(ctfd.name_any()),
        data_mount: None,
        probe_path: Some("/healthcheck"),
        recreate: false,
        resources: ctfd.spec.resources.as_ref(),
    }
    .build(ctfd)
}

pub fn redis_deployment(redis: &Redis, config: &ControllerConfig) -> Result<Deployment> {
    Workload {
        app: Redis::APP,
        image: &config.redis_image,
        replicas: 1,
        run_as_user: 999,
        read_only_root: true,
        port: REDIS_PORT,
        env_secret: None,
        data_mount: Some("/data"),
        probe_path: None,
        recreate: true,
        resources: redis.resources(),
    }
    .build(redis)
}

pub fn mariadb_deployment(mariadb: &MariaDB, config: &ControllerConfig) -> Result<Deployment> {
    Workload {
        app: MariaDB::APP,
        image: &config.mariadb_image,
        replicas: 1,
        run_as_user: 999,
        read_only_root: false,
        port: MARIADB_PORT,
        env_secret: Some(mariadb.name_any()),
        data_mount: Some("/var/lib/mysql"),
        probe_path: None,
        recreate: true,
        resources: mariadb.resources(),
    }
    .build(mariadb)
}

pub fn minio_deployment(minio: &Minio, config: &ControllerConfig) -> Result<Deployment> {
    Workload {
        app: Minio::APP,
        image: &config.minio_image,
        replicas: 1,
        run_as_user: 1001,
        read_only_root: false,
        port: MINIO_PORT,
        env_secret: Some(minio.name_any()),
        data_mount: Some("/bitnami/minio/data"),
        probe_path: Some("/minio/health/live"),
        recreate: true,
        resources: minio.resources(),
    }
    .build(minio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crds::RedisSpec, resources::testing};
    use serde_json::json;

    #[test]
    fn ctfd_deployment_runs_hardened() {
        let ctfd = testing::ctfd(json!({
            "replicas": 2,
            "resources": { "limits": { "memory": "1Gi" } }
        }));
        let deployment = ctfd_deployment(&ctfd, &ControllerConfig::default()).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert!(spec.strategy.is_none());

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("demo"));
        assert_eq!(pod.security_context.unwrap().run_as_non_root, Some(true));

        let container = &pod.containers[0];
        assert_eq!(container.image.as_deref(), Some("ctfd/ctfd:3.7.6"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8000);
        assert_eq!(
            container.env_from.as_ref().unwrap()[0].secret_ref.as_ref().unwrap().name,
            "demo"
        );
        let security = container.security_context.as_ref().unwrap();
        assert_eq!(security.allow_privilege_escalation, Some(false));
        assert_eq!(
            security.capabilities.as_ref().unwrap().drop,
            Some(vec!["ALL".to_string()])
        );
        let probe = container.readiness_probe.as_ref().unwrap().http_get.as_ref().unwrap();
        assert_eq!(probe.path.as_deref(), Some("/healthcheck"));
        assert_eq!(probe.port, IntOrString::String("http".into()));
        assert_eq!(
            container.resources.as_ref().unwrap().limits.as_ref().unwrap()["memory"],
            Quantity("1Gi".into())
        );
    }

    #[test]
    fn component_deployment_mounts_its_claim() {
        let mut redis = Redis::new("demo-redis", RedisSpec::default());
        redis.metadata.namespace = Some("ctf".into());
        redis.metadata.uid = Some("uid".into());

        let deployment = redis_deployment(&redis, &ControllerConfig::default()).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.strategy.unwrap().type_.as_deref(), Some("Recreate"));
        assert_eq!(
            spec.selector.match_labels.unwrap()["app.kubernetes.io/instance"],
            "demo-redis"
        );

        let pod = spec.template.spec.unwrap();
        let claim = pod
            .volumes
            .unwrap()
            .into_iter()
            .find_map(|v| v.persistent_volume_claim)
            .unwrap();
        assert_eq!(claim.claim_name, "demo-redis");
        assert!(pod.containers[0].env_from.is_none());
    }
}
