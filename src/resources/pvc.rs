use super::child_meta;
use crate::{crds::ComponentResource, diff::UpdatePolicy, error::Result};
use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements},
    apimachinery::pkg::api::resource::Quantity,
};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

pub const UPDATE_POLICY: UpdatePolicy = UpdatePolicy::Fields(&["spec"]);

const DEFAULT_SIZE: &str = "128Mi";
const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

/// Data volume of a stateful component, named after it.
pub fn persistent_volume_claim<K>(component: &K) -> Result<PersistentVolumeClaim>
where
    K: ComponentResource + Resource<DynamicType = ()>,
{
    let overrides = component.persistent_volume_claim().cloned().unwrap_or_default();

    let mut requests = BTreeMap::new();
    requests.insert(
        "storage".to_string(),
        Quantity(overrides.size.unwrap_or_else(|| DEFAULT_SIZE.to_string())),
    );

    Ok(PersistentVolumeClaim {
        metadata: child_meta(component, component.name_any(), K::APP)?,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(
                overrides
                    .access_modes
                    .unwrap_or_else(|| vec![DEFAULT_ACCESS_MODE.to_string()]),
            ),
            storage_class_name: overrides.storage_class_name,
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{PersistentVolumeClaimSpec as Overrides, Redis, RedisSpec};

    fn redis(overrides: Option<Overrides>) -> Redis {
        let mut redis = Redis::new(
            "demo-redis",
            RedisSpec {
                persistent_volume_claim: overrides,
                ..Default::default()
            },
        );
        redis.metadata.namespace = Some("ctf".into());
        redis.metadata.uid = Some("uid".into());
        redis
    }

    #[test]
    fn defaults_to_small_rwo_volume() {
        let pvc = persistent_volume_claim(&redis(None)).unwrap();
        let spec = pvc.spec.unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("demo-redis"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(spec.storage_class_name, None);
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("128Mi".into())
        );
    }

    #[test]
    fn overrides_are_applied() {
        let pvc = persistent_volume_claim(&redis(Some(Overrides {
            storage_class_name: Some("fast".into()),
            size: Some("1Gi".into()),
            access_modes: None,
        })))
        .unwrap();
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"],
            Quantity("1Gi".into())
        );
    }
}
