//! Trigger domain types
//!
//! A trigger is a per-account rule that starts a pipeline: on a schedule,
//! when a polled external provider changes state, or when a webhook signal
//! arrives. The trigger kind is an enum and every kind carries its own typed
//! payload, decoded and validated once at registration.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Available trigger kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TriggerType {
    Schedule,
    HttpPoll,
    GithubCommit,
    Webhook,
}

impl TriggerType {
    pub const ALL: [TriggerType; 4] = [
        TriggerType::Schedule,
        TriggerType::HttpPoll,
        TriggerType::GithubCommit,
        TriggerType::Webhook,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Schedule => "Schedule",
            TriggerType::HttpPoll => "HttpPoll",
            TriggerType::GithubCommit => "GithubCommit",
            TriggerType::Webhook => "Webhook",
        }
    }

    /// Kinds checked by polling an external provider
    pub fn is_event_sourced(self) -> bool {
        match self {
            TriggerType::HttpPoll | TriggerType::GithubCommit => true,
            TriggerType::Schedule | TriggerType::Webhook => false,
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown trigger type '{s}'"))
    }
}

/// Identity of a trigger: unique per account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub account_id: String,
    pub name: String,
}

impl TriggerKey {
    pub fn new(account_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.account_id, self.name)
    }
}

/// A registered trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub account_id: String,
    pub name: String,
    /// Target pipeline, owned by the same account
    pub pipeline: String,
    pub spec: TriggerSpec,
    pub created_at: DateTime<Utc>,
}

impl Trigger {
    pub fn key(&self) -> TriggerKey {
        TriggerKey::new(&self.account_id, &self.name)
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.spec.trigger_type()
    }
}

/// Kind-specific trigger payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TriggerSpec {
    Schedule(SchedulePayload),
    HttpPoll(HttpPollPayload),
    GithubCommit(GithubCommitPayload),
    Webhook(WebhookPayload),
}

impl TriggerSpec {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerSpec::Schedule(_) => TriggerType::Schedule,
            TriggerSpec::HttpPoll(_) => TriggerType::HttpPoll,
            TriggerSpec::GithubCommit(_) => TriggerType::GithubCommit,
            TriggerSpec::Webhook(_) => TriggerType::Webhook,
        }
    }

    /// Decodes a raw payload for the given kind and validates it
    pub fn decode(kind: TriggerType, payload: Value) -> Result<Self, String> {
        let payload = match payload {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let spec = match kind {
            TriggerType::Schedule => TriggerSpec::Schedule(decode_payload(kind, payload)?),
            TriggerType::HttpPoll => TriggerSpec::HttpPoll(decode_payload(kind, payload)?),
            TriggerType::GithubCommit => {
                TriggerSpec::GithubCommit(decode_payload(kind, payload)?)
            }
            TriggerType::Webhook => TriggerSpec::Webhook(decode_payload(kind, payload)?),
        };

        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            TriggerSpec::Schedule(p) => p.cadence().map(|_| ()),
            TriggerSpec::HttpPoll(p) => p.validate(),
            TriggerSpec::GithubCommit(p) => p.validate(),
            TriggerSpec::Webhook(_) => Ok(()),
        }
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    kind: TriggerType,
    payload: Value,
) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|e| format!("invalid {kind} payload: {e}"))
}

/// Schedule payload: a fixed interval or a cron expression, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchedulePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl SchedulePayload {
    pub fn every(seconds: u64) -> Self {
        Self {
            interval_seconds: Some(seconds),
            cron: None,
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            interval_seconds: None,
            cron: Some(expression.into()),
        }
    }

    /// Parses the payload into a cadence
    pub fn cadence(&self) -> Result<Cadence, String> {
        match (self.interval_seconds, self.cron.as_deref()) {
            (Some(_), Some(_)) => {
                Err("schedule takes either intervalSeconds or cron, not both".into())
            }
            (None, None) => Err("schedule requires intervalSeconds or cron".into()),
            (Some(0), None) => Err("intervalSeconds must be greater than 0".into()),
            (Some(secs), None) => Ok(Cadence::Every(Duration::from_secs(secs))),
            (None, Some(expr)) => {
                let normalized = normalize_cron_expression(expr);
                let schedule: cron::Schedule = normalized
                    .parse()
                    .map_err(|e| format!("invalid cron expression '{expr}': {e}"))?;
                Ok(Cadence::Cron(Box::new(schedule)))
            }
        }
    }
}

/// Convert a 5-field cron expression to the 7-field format the `cron` crate expects.
///
/// Standard cron: `min hour day month weekday`
/// Cron crate:    `sec min hour day month weekday year`
pub fn normalize_cron_expression(expr: &str) -> String {
    let expr = expr.trim();
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.len() {
        5 => format!("0 {expr} *"),
        6 => format!("{expr} *"),
        _ => expr.to_string(),
    }
}

/// When a schedule trigger fires
#[derive(Debug, Clone)]
pub enum Cadence {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl Cadence {
    /// Next fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Every(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.checked_add_signed(period)
            }
            Cadence::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

/// Polls an HTTP endpoint returning JSON and fires when the cursor changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpPollPayload {
    pub url: String,
    /// JSON pointer (RFC 6901) selecting the value compared between checks.
    /// The whole body is compared when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_pointer: Option<String>,
}

impl HttpPollPayload {
    fn validate(&self) -> Result<(), String> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("url must start with http:// or https://".into());
        }
        if let Some(pointer) = &self.cursor_pointer {
            if !pointer.is_empty() && !pointer.starts_with('/') {
                return Err(format!("cursorPointer '{pointer}' must start with '/'"));
            }
        }
        Ok(())
    }
}

/// Fires when a new commit lands on a GitHub branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GithubCommitPayload {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl GithubCommitPayload {
    fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("branch", &self.branch),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} cannot be empty"));
            }
            if value.contains('/') && field != "branch" {
                return Err(format!("{field} cannot contain '/'"));
            }
        }
        Ok(())
    }
}

/// Webhook triggers carry no configuration; they fire on signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookPayload {}
