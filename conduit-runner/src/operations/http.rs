//! `http_request` operation: calls an HTTP endpoint

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use conduit_core::domain::task::{TaskBody, TaskContext};
use reqwest::{Client, Method};
use serde::Deserialize;

use super::{Operation, decode};
use crate::log_buffer::TaskLog;

/// Response bodies longer than this are cut in the task log
const MAX_LOGGED_BODY: usize = 4096;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpRequestInput {
    fn method(&self) -> Result<Method, String> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid HTTP method '{}'", self.method))
    }

    fn check(&self) -> Result<(), String> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("url must start with http:// or https://".into());
        }
        self.method().map(|_| ())
    }
}

pub struct HttpRequestOperation {
    client: Client,
}

impl HttpRequestOperation {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Operation for HttpRequestOperation {
    fn name(&self) -> &'static str {
        "http_request"
    }

    fn validate(&self, body: &TaskBody) -> Result<(), String> {
        decode::<HttpRequestInput>(body)?.check()
    }

    async fn invoke(&self, _ctx: &TaskContext, body: &TaskBody, log: &TaskLog) -> Result<()> {
        let input: HttpRequestInput = decode(body).map_err(anyhow::Error::msg)?;
        let method = input.method().map_err(anyhow::Error::msg)?;

        log.info(format!("{} {}", method, input.url));

        let mut request = self.client.request(method, &input.url);
        for (name, value) in &input.headers {
            request = request.header(name, value);
        }
        if let Some(payload) = &input.body {
            request = request.json(payload);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", input.url))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        log.info(format!("Response status: {}", status));
        if !text.is_empty() {
            let shown: String = text.chars().take(MAX_LOGGED_BODY).collect();
            log.info(format!("Response body: {}", shown));
        }

        if !status.is_success() {
            anyhow::bail!("{} responded with {}", input.url, status);
        }

        Ok(())
    }
}
