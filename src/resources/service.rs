use super::{
    child_meta,
    deployment::{CTFD_PORT, MARIADB_PORT, MINIO_PORT, REDIS_PORT},
    labels,
};
use crate::{
    crds::{CTFd, ComponentResource, MariaDB, Minio, Redis},
    diff::UpdatePolicy,
    endpoint::ServiceTarget,
    error::Result,
};
use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{Resource, ResourceExt};

pub const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Fields(&["spec"]);

/// Port the CTFd service listens on
pub const CTFD_SERVICE_PORT: u16 = 80;

fn service<K>(owner: &K, app: &str, port: i32, target: (&str, i32)) -> Result<Service>
where
    K: Resource<DynamicType = ()>,
{
    let name = owner.name_any();
    Ok(Service {
        metadata: child_meta(owner, name.clone(), app)?,
        spec: Some(ServiceSpec {
            selector: Some(labels::selector_labels(app, &name)),
            ports: Some(vec![ServicePort {
                name: Some(target.0.to_string()),
                port,
                target_port: Some(IntOrString::String(target.0.to_string())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn ctfd_service(ctfd: &CTFd) -> Result<Service> {
    service(ctfd, "ctfd", CTFD_SERVICE_PORT.into(), CTFD_PORT)
}

pub fn redis_service(redis: &Redis) -> Result<Service> {
    service(redis, Redis::APP, REDIS_PORT.1, REDIS_PORT)
}

pub fn mariadb_service(mariadb: &MariaDB) -> Result<Service> {
    service(mariadb, MariaDB::APP, MARIADB_PORT.1, MARIADB_PORT)
}

pub fn minio_service(minio: &Minio) -> Result<Service> {
    service(minio, Minio::APP, MINIO_PORT.1, MINIO_PORT)
}

/// Where the operator reaches the CTFd API of `ctfd`.
pub fn ctfd_target(ctfd: &CTFd) -> ServiceTarget {
    ServiceTarget {
        namespace: ctfd.namespace().unwrap_or_default(),
        name: ctfd.name_any(),
        port_name: CTFD_PORT.0.to_string(),
        port: CTFD_SERVICE_PORT,
    }
}
