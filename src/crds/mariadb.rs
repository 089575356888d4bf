use super::component::{ComponentResource, PersistentVolumeClaimSpec, ResourceRequirementsSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// MariaDB database backing a CTFd instance
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "ui.ctf.backbone81",
    version = "v1alpha1",
    kind = "MariaDB",
    plural = "mariadbs",
    namespaced,
    status = "MariaDBStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBSpec {
    pub resources: Option<ResourceRequirementsSpec>,
    pub persistent_volume_claim: Option<PersistentVolumeClaimSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct MariaDBStatus {
    #[serde(default)]
    pub ready: bool,
}

impl ComponentResource for MariaDB {
    const APP: &'static str = "mariadb";

    fn resources(&self) -> Option<&ResourceRequirementsSpec> {
        self.spec.resources.as_ref()
    }

    fn persistent_volume_claim(&self) -> Option<&PersistentVolumeClaimSpec> {
        self.spec.persistent_volume_claim.as_ref()
    }

    fn ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }
}
