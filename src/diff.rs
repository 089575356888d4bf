//! Desired-state diff and apply for owned native resources.
//!
//! The current object is fetched by the desired object's name. An absent object
//! is created. A present one is compared with [`is_subset`] on the fields named
//! by the [`UpdatePolicy`] and replaced only when a desired field differs.

use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, PostParams},
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;

/// Subset equality: every field present in `desired` must match `current`.
///
/// `null` in desired means "unset" and always matches. Objects only compare the
/// keys of `desired`, arrays must have the same length and match element-wise.
pub fn is_subset(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Null, _) => true,
        (Value::Object(desired), Value::Object(current)) => desired.iter().all(|(key, value)| {
            is_subset(value, current.get(key).unwrap_or(&Value::Null))
        }),
        (Value::Array(desired), Value::Array(current)) => {
            desired.len() == current.len()
                && desired.iter().zip(current).all(|(d, c)| is_subset(d, c))
        }
        (desired, current) => desired == current,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Never touch an existing object. Used for generated credentials.
    CreateOnly,
    /// Compare and overwrite these top-level fields.
    Fields(&'static [&'static str]),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Patched,
    Unchanged,
}

#[async_trait]
pub trait ResourceClient<K>: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<K>>;
    async fn create(&self, resource: &K) -> Result<K>;
    async fn replace(&self, name: &str, resource: &K) -> Result<K>;
}

#[async_trait]
impl<K> ResourceClient<K> for Api<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>> {
        Ok(self.get_opt(name).await?)
    }

    async fn create(&self, resource: &K) -> Result<K> {
        Ok(Api::create(self, &PostParams::default(), resource).await?)
    }

    async fn replace(&self, name: &str, resource: &K) -> Result<K> {
        Ok(Api::replace(self, name, &PostParams::default(), resource).await?)
    }
}

/// Bring the object named by `desired` in line with it.
pub async fn apply<K, C>(client: &C, desired: K, policy: UpdatePolicy) -> Result<Outcome>
where
    K: Resource + Serialize + DeserializeOwned + Send + Sync,
    C: ResourceClient<K> + ?Sized,
{
    let name = desired
        .meta()
        .name
        .clone()
        .ok_or(Error::MissingObjectKey("metadata.name"))?;

    let Some(current) = client.get(&name).await? else {
        client.create(&desired).await?;
        return Ok(Outcome::Created);
    };

    let fields = match policy {
        UpdatePolicy::CreateOnly => return Ok(Outcome::Unchanged),
        UpdatePolicy::Fields(fields) => fields,
    };

    match merge_fields(&desired, &current, fields)? {
        Some(updated) => {
            client.replace(&name, &updated).await?;
            Ok(Outcome::Patched)
        }
        None => Ok(Outcome::Unchanged),
    }
}

/// Copy every listed field of `desired` that is not a subset of `current` onto
/// `current`. Returns `None` when nothing differs.
fn merge_fields<K>(desired: &K, current: &K, fields: &[&str]) -> Result<Option<K>>
where
    K: Resource + Serialize + DeserializeOwned,
{
    let desired_json = serde_json::to_value(desired)?;
    let mut current_json = serde_json::to_value(current)?;

    let mut changed = false;
    if let Some(current_fields) = current_json.as_object_mut() {
        for field in fields {
            let desired_field = desired_json.get(*field).unwrap_or(&Value::Null);
            let current_field = current_fields.get(*field).unwrap_or(&Value::Null);
            if !is_subset(desired_field, current_field) {
                current_fields.insert(field.to_string(), desired_field.clone());
                changed = true;
            }
        }
    }

    if !changed {
        return Ok(None);
    }

    let mut updated: K = serde_json::from_value(current_json)?;
    // keep the owner reference current even if the object predates it
    if updated.owner_references().is_empty() {
        updated.meta_mut().owner_references = desired.meta().owner_references.clone();
    }
    Ok(Some(updated))
}
