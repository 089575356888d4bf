use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ResourceSpec {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl ResourceSpec {
    fn quantities(&self) -> Option<BTreeMap<String, Quantity>> {
        let mut quantities = BTreeMap::new();
        if let Some(ref cpu) = self.cpu {
            quantities.insert("cpu".to_string(), Quantity(cpu.clone()));
        }
        if let Some(ref memory) = self.memory {
            quantities.insert("memory".to_string(), Quantity(memory.clone()));
        }
        (!quantities.is_empty()).then_some(quantities)
    }
}

/// Compute resources for the containers of a deployment
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ResourceRequirementsSpec {
    pub requests: Option<ResourceSpec>,
    pub limits: Option<ResourceSpec>,
}

impl ResourceRequirementsSpec {
    pub fn to_requirements(&self) -> ResourceRequirements {
        ResourceRequirements {
            requests: self.requests.as_ref().and_then(ResourceSpec::quantities),
            limits: self.limits.as_ref().and_then(ResourceSpec::quantities),
            ..Default::default()
        }
    }
}

/// Overrides for the data volume of a stateful component
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    pub storage_class_name: Option<String>,
    /// Requested capacity, defaults to `128Mi`
    pub size: Option<String>,
    /// Defaults to `[ReadWriteOnce]`
    pub access_modes: Option<Vec<String>>,
}

/// Shared accessors for the Redis, MariaDB and Minio resources.
pub trait ComponentResource {
    /// Value of `app.kubernetes.io/name` on everything the component owns
    const APP: &'static str;

    fn resources(&self) -> Option<&ResourceRequirementsSpec>;
    fn persistent_volume_claim(&self) -> Option<&PersistentVolumeClaimSpec>;
    fn ready(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_resource_spec_maps_to_none() {
        let spec = ResourceRequirementsSpec {
            requests: Some(ResourceSpec::default()),
            limits: Some(ResourceSpec {
                cpu: Some("500m".into()),
                memory: None,
            }),
        };
        let requirements = spec.to_requirements();
        assert!(requirements.requests.is_none());
        let limits = requirements.limits.unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("500m".into())));
        assert!(!limits.contains_key("memory"));
    }
}
