use super::child_meta;
use crate::{diff::UpdatePolicy, error::Result};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::{Resource, ResourceExt};

pub const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Fields(&["automountServiceAccountToken"]);

/// Dedicated identity for the pods of `owner`. None of them talk to the API server.
pub fn service_account<K>(owner: &K, app: &str) -> Result<ServiceAccount>
where
    K: Resource<DynamicType = ()>,
{
    Ok(ServiceAccount {
        metadata: child_meta(owner, owner.name_any(), app)?,
        automount_service_account_token: Some(false),
        ..Default::default()
    })
}
