use super::{Context, SubReconciler};
use crate::{
    config::ControllerConfig,
    diff::{self, Outcome, UpdatePolicy},
    error::{Error, Result},
};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{runtime::controller::Action, Api, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::info;

/// Keeps one child object of `K` in line with what `build` produces.
pub struct ApplyResource<K, R> {
    name: &'static str,
    policy: UpdatePolicy,
    build: fn(&K, &ControllerConfig) -> Result<R>,
}

impl<K, R> ApplyResource<K, R> {
    pub fn new(
        name: &'static str,
        policy: UpdatePolicy,
        build: fn(&K, &ControllerConfig) -> Result<R>,
    ) -> Self {
        Self {
            name,
            policy,
            build,
        }
    }
}

#[async_trait]
impl<K, R> SubReconciler<K> for ApplyResource<K, R>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
    R: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn reconcile(&self, obj: &K, ctx: &Context) -> Result<Option<Action>> {
        let desired = (self.build)(obj, &ctx.config)?;
        let namespace = obj
            .namespace()
            .ok_or(Error::MissingObjectKey("metadata.namespace"))?;
        let api: Api<R> = Api::namespaced(ctx.client.clone(), &namespace);

        let outcome = diff::apply(&api, desired, self.policy).await?;
        if outcome != Outcome::Unchanged {
            info!(resource = self.name, ?outcome, "Applied {}", R::kind(&()));
        }
        Ok(None)
    }
}
