use super::{
    component::ResourceRequirementsSpec, mariadb::MariaDBSpec, minio::MinioSpec, redis::RedisSpec,
};
use crate::date_time::DateTime;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CTFd is the top-level resource: one deployed CTFd instance together with its
/// cache, database and object store.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "ui.ctf.backbone81",
    version = "v1alpha1",
    kind = "CTFd",
    plural = "ctfds",
    singular = "ctfd",
    shortname = "ctfd",
    namespaced,
    status = "CTFdStatus",
    printcolumn = r#"{"name":"Title", "type":"string", "jsonPath":".spec.title"}"#,
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CTFdSpec {
    #[schemars(length(min = 1))]
    pub title: String,
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub user_mode: UserMode,
    #[serde(default)]
    pub challenge_visibility: ChallengeVisibility,
    #[serde(default)]
    pub account_visibility: AccountVisibility,
    #[serde(default)]
    pub score_visibility: ScoreVisibility,
    #[serde(default)]
    pub registration_visibility: RegistrationVisibility,

    #[serde(default = "default_verify_emails")]
    pub verify_emails: bool,

    /// Maximum team size, only meaningful in team mode
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub team_size: Option<u32>,

    #[serde(default)]
    pub theme: Theme,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^#[0-9a-fA-F]{6}$"))]
    pub theme_color: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime>,

    #[serde(default = "default_replicas")]
    #[schemars(range(min = 0))]
    pub replicas: i32,

    pub resources: Option<ResourceRequirementsSpec>,

    #[serde(default)]
    pub redis: RedisSpec,
    #[serde(default)]
    pub maria_db: MariaDBSpec,
    #[serde(default)]
    pub minio: MinioSpec,

    /// Namespace to read ChallengeDescriptions from. Unset disables challenge
    /// synchronization, an empty string means the namespace of this resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_namespace: Option<String>,
}

fn default_verify_emails() -> bool {
    true
}

fn default_replicas() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserMode {
    #[default]
    Teams,
    Users,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeVisibility {
    Public,
    #[default]
    Private,
    Admins,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountVisibility {
    Public,
    #[default]
    Private,
    Admins,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScoreVisibility {
    Public,
    #[default]
    Private,
    Hidden,
    Admins,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationVisibility {
    Public,
    #[default]
    Private,
    /// MajorLeagueCyber accounts only
    Mlc,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    #[default]
    CoreBeta,
    Core,
}

impl UserMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserMode::Teams => "teams",
            UserMode::Users => "users",
        }
    }
}

impl ChallengeVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeVisibility::Public => "public",
            ChallengeVisibility::Private => "private",
            ChallengeVisibility::Admins => "admins",
        }
    }
}

impl AccountVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountVisibility::Public => "public",
            AccountVisibility::Private => "private",
            AccountVisibility::Admins => "admins",
        }
    }
}

impl ScoreVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreVisibility::Public => "public",
            ScoreVisibility::Private => "private",
            ScoreVisibility::Hidden => "hidden",
            ScoreVisibility::Admins => "admins",
        }
    }
}

impl RegistrationVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationVisibility::Public => "public",
            RegistrationVisibility::Private => "private",
            RegistrationVisibility::Mlc => "mlc",
        }
    }
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::CoreBeta => "core-beta",
            Theme::Core => "core",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CTFdStatus {
    #[serde(default)]
    pub ready: bool,

    /// Maps every ChallengeDescription to the CTFd challenge created for it
    #[serde(default)]
    pub challenge_descriptions: Vec<ChallengeLedgerEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ChallengeLedgerEntry {
    /// Remote challenge id
    pub id: i64,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub hints: Vec<HintLedgerEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct HintLedgerEntry {
    /// Remote hint id
    pub id: i64,
    /// Position of the hint in the ChallengeDescription
    pub index: usize,
}

impl CTFd {
    pub fn ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    pub fn ledger(&self) -> Vec<ChallengeLedgerEntry> {
        self.status
            .as_ref()
            .map(|s| s.challenge_descriptions.clone())
            .unwrap_or_default()
    }

    /// Namespace challenges are read from, `None` if synchronization is disabled.
    pub fn challenge_namespace(&self) -> Option<&str> {
        match self.spec.challenge_namespace.as_deref() {
            None => None,
            Some("") => self.metadata.namespace.as_deref(),
            Some(ns) => Some(ns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctfd(challenge_namespace: Option<&str>) -> CTFd {
        let spec: CTFdSpec = serde_json::from_value(json!({ "title": "Demo CTF" })).unwrap();
        let mut ctfd = CTFd::new("demo", CTFdSpec {
            challenge_namespace: challenge_namespace.map(str::to_string),
            ..spec
        });
        ctfd.metadata.namespace = Some("ctf".to_string());
        ctfd
    }

    #[test]
    fn spec_defaults() {
        let ctfd = ctfd(None);
        assert_eq!(ctfd.spec.user_mode, UserMode::Teams);
        assert_eq!(ctfd.spec.score_visibility, ScoreVisibility::Private);
        assert_eq!(ctfd.spec.theme, Theme::CoreBeta);
        assert!(ctfd.spec.verify_emails);
        assert_eq!(ctfd.spec.replicas, 1);
        assert!(!ctfd.ready());
        assert!(ctfd.ledger().is_empty());
    }

    #[test]
    fn wire_names_match_form_values() {
        assert_eq!(serde_json::to_value(Theme::CoreBeta).unwrap(), json!("core-beta"));
        assert_eq!(Theme::CoreBeta.as_str(), "core-beta");
        assert_eq!(serde_json::to_value(RegistrationVisibility::Mlc).unwrap(), json!("mlc"));
        assert_eq!(RegistrationVisibility::Mlc.as_str(), "mlc");
    }

    #[test]
    fn served_under_the_operator_group() {
        use kube::Resource;
        assert_eq!(CTFd::group(&()), "ui.ctf.backbone81");
        assert_eq!(CTFd::api_version(&()), "ui.ctf.backbone81/v1alpha1");
    }

    #[test]
    fn challenge_namespace_resolution() {
        assert_eq!(ctfd(None).challenge_namespace(), None);
        assert_eq!(ctfd(Some("")).challenge_namespace(), Some("ctf"));
        assert_eq!(ctfd(Some("challenges")).challenge_namespace(), Some("challenges"));
    }
}
