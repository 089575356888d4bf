use super::{apply::ApplyResource, Context, Reconciler, SubReconciler};
use crate::{
    config::ControllerConfig,
    crds::{ComponentResource, MariaDB, Minio, Redis},
    diff::UpdatePolicy,
    error::{Error, Result},
    readiness,
    resources::{deployment, pvc, secret, service, service_account},
};
use async_trait::async_trait;
use k8s_openapi::{api::apps::v1::Deployment, NamespaceResourceScope};
use kube::{
    api::{Patch, PatchParams},
    runtime::controller::Action,
    Api, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, marker::PhantomData};
use tracing::info;

/// Patches `status.ready` of `name` when it differs from `current`.
pub(super) async fn update_ready<K>(api: &Api<K>, name: &str, current: bool, ready: bool) -> Result<()>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    if current == ready {
        return Ok(());
    }
    info!(ready, "Readiness changed");
    let patch = serde_json::json!({ "status": { "ready": ready } });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// A component is ready once its deployment is rolled out.
pub struct ComponentStatusReconciler<K>(PhantomData<fn() -> K>);

impl<K> Default for ComponentStatusReconciler<K> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

#[async_trait]
impl<K> SubReconciler<K> for ComponentStatusReconciler<K>
where
    K: ComponentResource
        + Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        "status"
    }

    async fn reconcile(&self, obj: &K, ctx: &Context) -> Result<Option<Action>> {
        let namespace = obj
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let name = obj.name_any();

        let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &namespace);
        let deployment = deployments.get_opt(&name).await?;
        let ready = readiness::aggregate(&[], deployment.as_ref());

        let api: Api<K> = Api::namespaced(ctx.client.clone(), &namespace);
        update_ready(&api, &name, obj.ready(), ready).await?;
        Ok(None)
    }
}

fn service_account_step<K>() -> ApplyResource<K, k8s_openapi::api::core::v1::ServiceAccount>
where
    K: ComponentResource + Resource<DynamicType = ()>,
{
    ApplyResource::new(
        "service account",
        service_account::UPDATE_POLICY,
        |obj: &K, _: &ControllerConfig| service_account::service_account(obj, K::APP),
    )
}

fn pvc_step<K>() -> ApplyResource<K, k8s_openapi::api::core::v1::PersistentVolumeClaim>
where
    K: ComponentResource + Resource<DynamicType = ()>,
{
    ApplyResource::new(
        "persistent volume claim",
        pvc::UPDATE_POLICY,
        |obj: &K, _: &ControllerConfig| pvc::persistent_volume_claim(obj),
    )
}

pub fn redis_reconciler() -> Reconciler<Redis> {
    Reconciler::builder()
        .with(service_account_step())
        .with(pvc_step())
        .with(ApplyResource::new(
            "deployment",
            deployment::UPDATE_POLICY,
            deployment::redis_deployment,
        ))
        .with(ApplyResource::new(
            "service",
            service::UPDATE_POLICY,
            |redis: &Redis, _: &ControllerConfig| service::redis_service(redis),
        ))
        .with(ComponentStatusReconciler::default())
        .build()
}

pub fn mariadb_reconciler() -> Reconciler<MariaDB> {
    Reconciler::builder()
        .with(service_account_step())
        .with(ApplyResource::new(
            "secret",
            UpdatePolicy::CreateOnly,
            |mariadb: &MariaDB, _: &ControllerConfig| secret::mariadb_secret(mariadb),
        ))
        .with(pvc_step())
        .with(ApplyResource::new(
            "deployment",
            deployment::UPDATE_POLICY,
            deployment::mariadb_deployment,
        ))
        .with(ApplyResource::new(
            "service",
            service::UPDATE_POLICY,
            |mariadb: &MariaDB, _: &ControllerConfig| service::mariadb_service(mariadb),
        ))
        .with(ComponentStatusReconciler::default())
        .build()
}

pub fn minio_reconciler() -> Reconciler<Minio> {
    Reconciler::builder()
        .with(service_account_step())
        .with(ApplyResource::new(
            "secret",
            UpdatePolicy::CreateOnly,
            |minio: &Minio, _: &ControllerConfig| secret::minio_secret(minio),
        ))
        .with(pvc_step())
        .with(ApplyResource::new(
            "deployment",
            deployment::UPDATE_POLICY,
            deployment::minio_deployment,
        ))
        .with(ApplyResource::new(
            "service",
            service::UPDATE_POLICY,
            |minio: &Minio, _: &ControllerConfig| service::minio_service(minio),
        ))
        .with(ComponentStatusReconciler::default())
        .build()
}
