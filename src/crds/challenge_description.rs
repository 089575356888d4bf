use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declarative definition of a CTFd challenge. The operator owns the remote
/// challenge, its hints and its flag; edits made in CTFd are reverted.
///
/// The CRD is installed by the challenge operator, this crate only reads it.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    group = "core.ctf.backbone81",
    version = "v1alpha1",
    kind = "ChallengeDescription",
    plural = "challengedescriptions",
    shortname = "chall",
    namespaced,
    printcolumn = r#"{"name":"Title", "type":"string", "jsonPath":".spec.title"}"#,
    printcolumn = r#"{"name":"Category", "type":"string", "jsonPath":".spec.category"}"#,
    printcolumn = r#"{"name":"Value", "type":"integer", "jsonPath":".spec.value"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDescriptionSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[schemars(range(min = 0))]
    pub value: i64,
    pub flag: String,
    /// Order matters: hints are tracked by their position
    #[serde(default)]
    pub hints: Vec<ChallengeHint>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ChallengeHint {
    pub description: String,
    #[serde(default)]
    pub cost: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn read_from_the_challenge_operator_group() {
        assert_eq!(ChallengeDescription::group(&()), "core.ctf.backbone81");
        assert_eq!(ChallengeDescription::version(&()), "v1alpha1");
        assert_eq!(ChallengeDescription::plural(&()), "challengedescriptions");
    }
}
