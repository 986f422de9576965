//! External event providers
//!
//! A provider reads the current state of an external source and reduces it
//! to a cursor. The engine compares cursors between checks; a changed
//! cursor means new qualifying state and fires the trigger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::domain::trigger::{
    GithubCommitPayload, HttpPollPayload, TriggerSpec, TriggerType,
};
use reqwest::Client;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use thiserror::Error;

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("conduit/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider could not be reached or answered with an error;
    /// retried on the next pass
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("no provider for {0} triggers")]
    Unsupported(TriggerType),
}

/// State of an external source at one check
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Compared between checks
    pub cursor: String,
    /// Initial input of the execution started when the cursor moved
    pub payload: Value,
}

#[async_trait]
pub trait EventProvider: Send + Sync {
    async fn observe(&self, spec: &TriggerSpec) -> Result<Observation, ProviderError>;
}

/// Providers keyed by trigger kind
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<TriggerType, Arc<dyn EventProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTTP polling and GitHub commit providers sharing one client
    pub fn builtin(timeout: Duration, github_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self::new()
            .with(TriggerType::HttpPoll, HttpPollProvider::new(client.clone()))
            .with(
                TriggerType::GithubCommit,
                GithubCommitProvider::new(client, github_token),
            )
    }

    pub fn with(mut self, kind: TriggerType, provider: impl EventProvider + 'static) -> Self {
        self.providers.insert(kind, Arc::new(provider));
        self
    }

    pub fn get(&self, kind: TriggerType) -> Result<Arc<dyn EventProvider>, ProviderError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or(ProviderError::Unsupported(kind))
    }
}

fn unavailable(err: reqwest::Error) -> ProviderError {
    ProviderError::Unavailable(err.to_string())
}

// =============================================================================
// HTTP polling
// =============================================================================

/// Polls a JSON endpoint
pub struct HttpPollProvider {
    client: Client,
}

impl HttpPollProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventProvider for HttpPollProvider {
    async fn observe(&self, spec: &TriggerSpec) -> Result<Observation, ProviderError> {
        let TriggerSpec::HttpPoll(payload) = spec else {
            return Err(ProviderError::Unsupported(spec.trigger_type()));
        };

        let response = self
            .client
            .get(&payload.url)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "{} responded with {}",
                payload.url, status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        http_observation(payload, body)
    }
}

fn http_observation(payload: &HttpPollPayload, body: Value) -> Result<Observation, ProviderError> {
    let cursor = match payload.cursor_pointer.as_deref() {
        Some(pointer) => body
            .pointer(pointer)
            .map(Value::to_string)
            .ok_or_else(|| {
                ProviderError::InvalidResponse(format!("{} has no value at {}", payload.url, pointer))
            })?,
        None => {
            let mut hasher = Sha256::new();
            hasher.update(body.to_string().as_bytes());
            format!("{:x}", hasher.finalize())
        }
    };

    Ok(Observation {
        cursor,
        payload: json!({ "url": payload.url, "body": body }),
    })
}

// =============================================================================
// GitHub commits
// =============================================================================

/// Reads the head commit of a GitHub branch
pub struct GithubCommitProvider {
    client: Client,
    token: Option<String>,
    api_base: String,
}

impl GithubCommitProvider {
    pub fn new(client: Client, token: Option<String>) -> Self {
        Self {
            client,
            token,
            api_base: GITHUB_API.to_string(),
        }
    }

    /// Points the provider at another API root (GitHub Enterprise)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn commit_url(&self, payload: &GithubCommitPayload) -> String {
        format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, payload.owner, payload.repo, payload.branch
        )
    }
}

#[async_trait]
impl EventProvider for GithubCommitProvider {
    async fn observe(&self, spec: &TriggerSpec) -> Result<Observation, ProviderError> {
        let TriggerSpec::GithubCommit(payload) = spec else {
            return Err(ProviderError::Unsupported(spec.trigger_type()));
        };

        let mut request = self
            .client
            .get(self.commit_url(payload))
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(unavailable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!(
                "GitHub responded with {} for {}/{}@{}",
                status, payload.owner, payload.repo, payload.branch
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        github_observation(payload, &body)
    }
}

fn github_observation(
    payload: &GithubCommitPayload,
    body: &Value,
) -> Result<Observation, ProviderError> {
    let sha = body
        .get("sha")
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::InvalidResponse("commit without sha".into()))?;

    Ok(Observation {
        cursor: sha.to_string(),
        payload: json!({
            "owner": payload.owner,
            "repo": payload.repo,
            "branch": payload.branch,
            "sha": sha,
            "message": body.pointer("/commit/message").cloned().unwrap_or(Value::Null),
            "author": body.pointer("/commit/author/name").cloned().unwrap_or(Value::Null),
            "url": body.get("html_url").cloned().unwrap_or(Value::Null),
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(pointer: Option<&str>) -> HttpPollPayload {
        HttpPollPayload {
            url: "https://example.com/feed".to_string(),
            cursor_pointer: pointer.map(str::to_string),
        }
    }

    #[test]
    fn test_http_cursor_from_pointer() {
        let body = json!({"items": [{"id": 42}], "fetched": "now"});
        let observation = http_observation(&poll(Some("/items/0/id")), body).unwrap();
        assert_eq!(observation.cursor, "42");
        assert_eq!(observation.payload["body"]["fetched"], "now");
    }

    #[test]
    fn test_http_cursor_missing_pointer_is_invalid() {
        let result = http_observation(&poll(Some("/nope")), json!({"items": []}));
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_http_digest_tracks_body() {
        let a = http_observation(&poll(None), json!({"v": 1})).unwrap();
        let b = http_observation(&poll(None), json!({"v": 1})).unwrap();
        let c = http_observation(&poll(None), json!({"v": 2})).unwrap();
        assert_eq!(a.cursor, b.cursor);
        assert_ne!(a.cursor, c.cursor);
        assert_eq!(a.cursor.len(), 64);
    }

    #[test]
    fn test_github_observation() {
        let payload = GithubCommitPayload {
            owner: "acme".to_string(),
            repo: "app".to_string(),
            branch: "main".to_string(),
        };
        let body = json!({
            "sha": "abc123",
            "html_url": "https://github.com/acme/app/commit/abc123",
            "commit": {"message": "fix", "author": {"name": "dev"}}
        });

        let observation = github_observation(&payload, &body).unwrap();
        assert_eq!(observation.cursor, "abc123");
        assert_eq!(observation.payload["message"], "fix");

        assert!(github_observation(&payload, &json!({})).is_err());
    }

    #[test]
    fn test_github_commit_url() {
        let provider = GithubCommitProvider::new(Client::new(), None)
            .with_api_base("https://ghe.example.com/api/v3/");
        let payload = GithubCommitPayload {
            owner: "acme".to_string(),
            repo: "app".to_string(),
            branch: "release".to_string(),
        };
        assert_eq!(
            provider.commit_url(&payload),
            "https://ghe.example.com/api/v3/repos/acme/app/commits/release"
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let provider = HttpPollProvider::new(Client::new());
        let spec = TriggerSpec::HttpPoll(HttpPollPayload {
            url: "http://127.0.0.1:9/feed".to_string(),
            cursor_pointer: None,
        });
        assert!(matches!(
            provider.observe(&spec).await,
            Err(ProviderError::Unavailable(_))
        ));
    }

    #[test]
    fn test_builtin_set() {
        let providers = ProviderSet::builtin(Duration::from_secs(1), None);
        assert!(providers.get(TriggerType::HttpPoll).is_ok());
        assert!(providers.get(TriggerType::GithubCommit).is_ok());
        assert!(matches!(
            providers.get(TriggerType::Webhook),
            Err(ProviderError::Unsupported(TriggerType::Webhook))
        ));
    }
}
