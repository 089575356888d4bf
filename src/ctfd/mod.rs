//! Client for the CTFd REST API and its HTML setup/login forms.

mod client;
mod setup;

pub use client::CtfdClient;
pub use setup::SetupRequest;

use crate::{date_time::DateOnly, error::Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

#[cfg(test)]
use mockall::automock;

/// CTFd returns `null` for many optional columns.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn is_unset(id: &i64) -> bool {
    *id == 0
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Challenge {
    /// Assigned by CTFd. Never sent on create, it would break database constraints.
    #[serde(skip_serializing_if = "is_unset")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(deserialize_with = "null_as_default")]
    pub value: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub challenge_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Hint {
    #[serde(skip_serializing_if = "is_unset")]
    pub id: i64,
    pub challenge_id: i64,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub hint_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub cost: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Flag {
    #[serde(skip_serializing_if = "is_unset")]
    pub id: i64,
    pub challenge_id: i64,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub flag_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub data: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct CreateTokenRequest {
    pub description: String,
    pub expiration: DateOnly,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Token {
    pub id: i64,
    pub description: String,
    pub value: String,
}

/// Challenge, hint and flag CRUD. Every call is one round trip; failures are
/// returned as is and never retried.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChallengeApi: Send + Sync {
    async fn list_challenges(&self) -> Result<Vec<Challenge>>;
    async fn get_challenge(&self, id: i64) -> Result<Challenge>;
    async fn create_challenge(&self, challenge: &Challenge) -> Result<Challenge>;
    async fn update_challenge(&self, challenge: &Challenge) -> Result<Challenge>;
    async fn delete_challenge(&self, id: i64) -> Result<()>;

    async fn list_hints(&self, challenge_id: i64) -> Result<Vec<Hint>>;
    async fn create_hint(&self, hint: &Hint) -> Result<Hint>;
    async fn update_hint(&self, hint: &Hint) -> Result<Hint>;
    async fn delete_hint(&self, id: i64) -> Result<()>;

    async fn list_flags(&self, challenge_id: i64) -> Result<Vec<Flag>>;
    async fn create_flag(&self, flag: &Flag) -> Result<Flag>;
    async fn update_flag(&self, flag: &Flag) -> Result<Flag>;
    async fn delete_flag(&self, id: i64) -> Result<()>;
}
