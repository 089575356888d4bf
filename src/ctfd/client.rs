use super::{
    setup::SetupRequest, Challenge, ChallengeApi, CreateTokenRequest, Flag, Hint, Token,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{
    header::AUTHORIZATION, multipart::Form, redirect, Method, RequestBuilder, StatusCode, Url,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{sync::OnceLock, time::Duration};
use tracing::{debug, instrument};

const CHALLENGES_PATH: &str = "/api/v1/challenges";
const HINTS_PATH: &str = "/api/v1/hints";
const FLAGS_PATH: &str = "/api/v1/flags";
const TOKENS_PATH: &str = "/api/v1/tokens";
const LOGIN_PATH: &str = "/login";
const SETUP_PATH: &str = "/setup";
const SETTINGS_PATH: &str = "/settings";

fn nonce_regex() -> &'static Regex {
    static NONCE: OnceLock<Regex> = OnceLock::new();
    NONCE.get_or_init(|| {
        Regex::new(r#"<input id="nonce" name="nonce" type="hidden" value="([^"]+)">"#)
            .expect("nonce pattern is valid")
    })
}

fn csrf_nonce_regex() -> &'static Regex {
    static CSRF_NONCE: OnceLock<Regex> = OnceLock::new();
    CSRF_NONCE.get_or_init(|| {
        Regex::new(r#"'csrfNonce': "([^"]+)","#).expect("csrf nonce pattern is valid")
    })
}

fn capture(page: &str, regex: &Regex) -> Option<String> {
    regex
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
}

fn remote_error(operation: &str, reason: impl Into<String>) -> Error {
    Error::RemoteApiError {
        operation: operation.to_string(),
        reason: reason.into(),
    }
}

/// HTTP client for one CTFd instance.
///
/// Holds a cookie store, so the session from [`CtfdClient::login`] is reused
/// by later calls. Redirects are not followed: several form endpoints signal
/// success with a 302.
pub struct CtfdClient {
    base_url: Url,
    http: reqwest::Client,
    access_token: Option<String>,
}

impl CtfdClient {
    pub fn new(base_url: &str, access_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidEndpoint(format!("{}: {}", base_url, e)))?;
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url,
            http,
            access_token: access_token.filter(|t| !t.is_empty()),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::InvalidEndpoint(format!("{}: {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let mut builder = self.http.request(method, self.url(path)?);
        if let Some(ref token) = self.access_token {
            builder = builder.header(AUTHORIZATION, format!("Token {}", token));
        }
        Ok(builder)
    }

    async fn send<T: DeserializeOwned>(&self, operation: &str, builder: RequestBuilder) -> Result<T> {
        let envelope: Envelope<T> = self.send_envelope(operation, builder).await?;
        envelope
            .data
            .ok_or_else(|| remote_error(operation, "response carried no data"))
    }

    async fn send_envelope<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<Envelope<T>> {
        let response = builder.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(remote_error(
                operation,
                format!("unexpected status code {}", status),
            ));
        }
        let envelope: Envelope<T> = response.json().await?;
        if !envelope.success {
            return Err(remote_error(operation, "the API request did not succeed"));
        }
        Ok(envelope)
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str, path: &str, query: &[(&str, String)]) -> Result<T> {
        let builder = self.request(Method::GET, path)?.query(query);
        self.send(operation, builder).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, operation: &str, path: &str, body: &B) -> Result<T> {
        let builder = self.request(Method::POST, path)?.json(body);
        self.send(operation, builder).await
    }

    async fn patch<B: Serialize + Sync, T: DeserializeOwned>(&self, operation: &str, path: &str, body: &B) -> Result<T> {
        let builder = self.request(Method::PATCH, path)?.json(body);
        self.send(operation, builder).await
    }

    async fn delete(&self, operation: &str, path: &str) -> Result<()> {
        let builder = self.request(Method::DELETE, path)?;
        self.send_envelope::<serde_json::Value>(operation, builder)
            .await
            .map(|_| ())
    }

    /// GET an HTML page and extract the first capture group of `regex`.
    async fn scrape(&self, operation: &str, path: &str, regex: &Regex) -> Result<String> {
        let response = self.http.get(self.url(path)?).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(remote_error(
                operation,
                format!("unexpected status code {} for {}", status, path),
            ));
        }
        let page = response.text().await?;
        capture(&page, regex).ok_or_else(|| remote_error(operation, format!("nonce not found on {}", path)))
    }

    /// POST a form and expect the redirect CTFd answers successful submissions with.
    async fn submit_form(&self, operation: &str, path: &str, form: Form) -> Result<()> {
        let response = self.http.post(self.url(path)?).multipart(form).send().await?;
        let status = response.status();
        if status != StatusCode::FOUND {
            return Err(remote_error(
                operation,
                format!("unexpected status code {}", status),
            ));
        }
        Ok(())
    }

    /// Log in through the web form. The session cookie authenticates later calls.
    #[instrument(skip(self, password))]
    pub async fn login(&self, name: &str, password: &str) -> Result<()> {
        let nonce = self.scrape("login", LOGIN_PATH, nonce_regex()).await?;
        let form = Form::new()
            .text("name", name.to_string())
            .text("password", password.to_string())
            .text("_submit", "Submit")
            .text("nonce", nonce);
        self.submit_form("login", LOGIN_PATH, form).await
    }

    /// Create an API token for the current user. Without an access token this
    /// relies on a logged-in session and the CSRF nonce of the settings page.
    #[instrument(skip(self, request), fields(description = %request.description))]
    pub async fn create_token(&self, request: &CreateTokenRequest) -> Result<Token> {
        let mut builder = self.request(Method::POST, TOKENS_PATH)?.json(request);
        if self.access_token.is_none() {
            let csrf_nonce = self
                .scrape("create token", SETTINGS_PATH, csrf_nonce_regex())
                .await?;
            builder = builder.header("Csrf-Token", csrf_nonce);
        }
        self.send("create token", builder).await
    }

    /// `GET /setup` answers 200 while setup is pending and redirects afterwards.
    pub async fn setup_required(&self) -> Result<bool> {
        let response = self.http.get(self.url(SETUP_PATH)?).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::FOUND => Ok(false),
            status => Err(remote_error(
                "setup check",
                format!("unexpected status code {}", status),
            )),
        }
    }

    #[instrument(skip(self, request), fields(ctf_name = %request.ctf_name))]
    pub async fn setup(&self, request: &SetupRequest) -> Result<()> {
        let nonce = self.scrape("setup", SETUP_PATH, nonce_regex()).await?;
        let form = request
            .form_fields()
            .into_iter()
            .fold(Form::new(), |form, (key, value)| form.text(key, value))
            .text("_submit", "Finish")
            .text("nonce", nonce);
        self.submit_form("setup", SETUP_PATH, form).await?;
        debug!("Setup form submitted");
        Ok(())
    }
}

#[async_trait]
impl ChallengeApi for CtfdClient {
    async fn list_challenges(&self) -> Result<Vec<Challenge>> {
        self.get("list challenges", CHALLENGES_PATH, &[("view", "admin".to_string())])
            .await
    }

    async fn get_challenge(&self, id: i64) -> Result<Challenge> {
        self.get("get challenge", &format!("{}/{}", CHALLENGES_PATH, id), &[])
            .await
    }

    async fn create_challenge(&self, challenge: &Challenge) -> Result<Challenge> {
        let mut challenge = challenge.clone();
        challenge.id = 0;
        if challenge.challenge_type.is_empty() {
            // CTFd answers 500 without a type
            challenge.challenge_type = "standard".to_string();
        }
        self.post("create challenge", CHALLENGES_PATH, &challenge).await
    }

    async fn update_challenge(&self, challenge: &Challenge) -> Result<Challenge> {
        let path = format!("{}/{}", CHALLENGES_PATH, challenge.id);
        self.patch("update challenge", &path, challenge).await
    }

    async fn delete_challenge(&self, id: i64) -> Result<()> {
        self.delete("delete challenge", &format!("{}/{}", CHALLENGES_PATH, id))
            .await
    }

    async fn list_hints(&self, challenge_id: i64) -> Result<Vec<Hint>> {
        self.get("list hints", HINTS_PATH, &[("challenge_id", challenge_id.to_string())])
            .await
    }

    async fn create_hint(&self, hint: &Hint) -> Result<Hint> {
        let mut hint = hint.clone();
        hint.id = 0;
        if hint.hint_type.is_empty() {
            hint.hint_type = "standard".to_string();
        }
        self.post("create hint", HINTS_PATH, &hint).await
    }

    async fn update_hint(&self, hint: &Hint) -> Result<Hint> {
        let path = format!("{}/{}", HINTS_PATH, hint.id);
        self.patch("update hint", &path, hint).await
    }

    async fn delete_hint(&self, id: i64) -> Result<()> {
        self.delete("delete hint", &format!("{}/{}", HINTS_PATH, id)).await
    }

    async fn list_flags(&self, challenge_id: i64) -> Result<Vec<Flag>> {
        self.get("list flags", FLAGS_PATH, &[("challenge_id", challenge_id.to_string())])
            .await
    }

    async fn create_flag(&self, flag: &Flag) -> Result<Flag> {
        let mut flag = flag.clone();
        flag.id = 0;
        if flag.flag_type.is_empty() {
            flag.flag_type = "static".to_string();
        }
        self.post("create flag", FLAGS_PATH, &flag).await
    }

    async fn update_flag(&self, flag: &Flag) -> Result<Flag> {
        let path = format!("{}/{}", FLAGS_PATH, flag.id);
        self.patch("update flag", &path, flag).await
    }

    async fn delete_flag(&self, id: i64) -> Result<()> {
        self.delete("delete flag", &format!("{}/{}", FLAGS_PATH, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date_time::DateOnly;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client(server: &MockServer, token: Option<&str>) -> CtfdClient {
        CtfdClient::new(&server.uri(), token.map(str::to_string), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn lists_challenges_with_admin_view() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/challenges"))
            .and(query_param("view", "admin"))
            .and(header("Authorization", "Token secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [{"id": 1, "name": "warmup", "value": 100, "category": "misc", "type": "standard"}]
            })))
            .mount(&server)
            .await;

        let challenges = client(&server, Some("secret")).list_challenges().await.unwrap();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].name, "warmup");
        assert_eq!(challenges[0].value, 100);
    }

    #[tokio::test]
    async fn create_sends_default_type_and_no_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/challenges"))
            .and(body_partial_json(json!({"name": "warmup", "type": "standard"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"id": 7, "name": "warmup", "value": 100, "type": "standard"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server, Some("secret"))
            .create_challenge(&Challenge {
                id: 42,
                name: "warmup".into(),
                value: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(created.id, 7);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("id").is_none());
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/hints/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
            .mount(&server)
            .await;

        let err = client(&server, Some("secret")).delete_hint(3).await.unwrap_err();
        assert!(matches!(err, Error::RemoteApiError { .. }));
    }

    #[tokio::test]
    async fn non_ok_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/challenges/9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server, Some("secret")).get_challenge(9).await.unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn setup_required_follows_redirect_semantics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/setup"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/"))
            .mount(&server)
            .await;

        assert!(!client(&server, None).setup_required().await.unwrap());
    }

    #[tokio::test]
    async fn login_posts_scraped_nonce() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<form><input id="nonce" name="nonce" type="hidden" value="abc123"></form>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/challenges"))
            .expect(1)
            .mount(&server)
            .await;

        client(&server, None).login("admin", "hunter2").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let form = String::from_utf8_lossy(&requests[1].body).to_string();
        assert!(form.contains("abc123"));
        assert!(form.contains("hunter2"));
    }

    #[tokio::test]
    async fn token_creation_without_token_uses_csrf_nonce() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<script>var init = { 'csrfNonce': \"n0nce\", 'userMode': \"teams\" }</script>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tokens"))
            .and(header("Csrf-Token", "n0nce"))
            .and(body_partial_json(json!({"expiration": "2025-01-31"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {"id": 1, "value": "ctfd_abc", "description": "demo"}
            })))
            .mount(&server)
            .await;

        let token = client(&server, None)
            .create_token(&CreateTokenRequest {
                description: "demo".into(),
                expiration: DateOnly(NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()),
            })
            .await
            .unwrap();
        assert_eq!(token.value, "ctfd_abc");
    }

    #[test]
    fn nonce_extraction() {
        let page = r#"<input id="nonce" name="nonce" type="hidden" value="f00">"#;
        assert_eq!(capture(page, nonce_regex()), Some("f00".to_string()));
        assert_eq!(capture("<html></html>", nonce_regex()), None);
    }
}
