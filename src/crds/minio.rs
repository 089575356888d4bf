use super::component::{ComponentResource, PersistentVolumeClaimSpec, ResourceRequirementsSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Minio object store holding uploads of a CTFd instance
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "ui.ctf.backbone81",
    version = "v1alpha1",
    kind = "Minio",
    plural = "minios",
    namespaced,
    status = "MinioStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MinioSpec {
    pub resources: Option<ResourceRequirementsSpec>,
    pub persistent_volume_claim: Option<PersistentVolumeClaimSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct MinioStatus {
    #[serde(default)]
    pub ready: bool,
}

impl ComponentResource for Minio {
    const APP: &'static str = "minio";

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
