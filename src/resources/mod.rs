//! Desired state of everything the operator creates in the cluster.

pub mod components;
pub mod deployment;
pub mod labels;
pub mod pvc;
pub mod secret;
pub mod service;
pub mod service_account;

use crate::error::{Error, Result};
use kube::{api::ObjectMeta, Resource, ResourceExt};

/// Metadata for an object controlled by `owner`, living in the owner's namespace.
pub fn child_meta<K>(owner: &K, name: impl Into<String>, app: &str) -> Result<ObjectMeta>
where
    K: Resource<DynamicType = ()>,
{
    let owner_ref = owner
        .controller_owner_ref(&())
        .ok_or(Error::MissingObjectKey("metadata.uid"))?;
    let namespace = owner
        .namespace()
        .ok_or(Error::MissingObjectKey("metadata.namespace"))?;

    Ok(ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace),
        labels: Some(labels::labels(app, &owner.name_any())),
        owner_references: Some(vec![owner_ref]),
        ..Default::default()
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::crds::{CTFd, CTFdSpec};
    use kube::api::ObjectMeta;

    /// A CTFd as the API server would return it.
    pub fn ctfd(spec: serde_json::Value) -> CTFd {
        let mut spec = spec;
        if spec.get("title").is_none() {
            spec["title"] = "Demo CTF".into();
        }
        let spec: CTFdSpec = serde_json::from_value(spec).unwrap();
        let mut ctfd = CTFd::new("demo", spec);
        ctfd.metadata = ObjectMeta {
            name: Some("demo".into()),
            namespace: Some("ctf".into()),
            uid: Some("8c1b5a36-0000-4000-8000-000000000001".into()),
            ..Default::default()
        };
        ctfd
    }
}
