//! Event checking loop of one account
//!
//! Each pass re-reads the account's event triggers and checks all of them
//! concurrently, every provider call bounded by the provider timeout. A
//! failing trigger is recorded and retried on the next pass; it never holds
//! back its siblings or other accounts.

use std::sync::Arc;

use conduit_core::domain::trigger::Trigger;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::provider::ProviderError;
use super::{EngineInner, TriggerState};

pub(super) async fn run(inner: Arc<EngineInner>, account_id: String, token: CancellationToken) {
    let mut ticker = time::interval(inner.settings.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first pass one interval after start
    ticker.reset();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = check_account(&inner, &account_id, &token).await {
            error!("Error during check cycle of account {}: {:#}", account_id, e);
        }
    }

    info!("Event checking for account {} stopped", account_id);
}

/// One pass over the event triggers of an account
async fn check_account(
    inner: &Arc<EngineInner>,
    account_id: &str,
    token: &CancellationToken,
) -> anyhow::Result<()> {
    let triggers: Vec<Trigger> = inner
        .triggers
        .list_for_account(account_id)
        .await?
        .into_iter()
        .filter(|t| t.trigger_type().is_event_sourced())
        .collect();

    if triggers.is_empty() {
        return Ok(());
    }

    debug!(
        "Checking {} event trigger(s) of account {}",
        triggers.len(),
        account_id
    );

    let mut checks = JoinSet::new();
    for trigger in triggers {
        let inner = Arc::clone(inner);
        let token = token.clone();
        checks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = check_trigger(&inner, &trigger) => {}
            }
        });
    }

    while let Some(joined) = checks.join_next().await {
        if let Err(e) = joined {
            error!("Trigger check of account {} panicked: {}", account_id, e);
        }
    }

    Ok(())
}

/// Queries the provider of one trigger and fires it when its cursor moved
pub(super) async fn check_trigger(inner: &EngineInner, trigger: &Trigger) {
    let key = trigger.key();
    inner.status.set_state(&key, TriggerState::Checking);

    let observed = match inner.providers.get(trigger.trigger_type()) {
        Ok(provider) => {
            match time::timeout(inner.settings.provider_timeout, provider.observe(&trigger.spec))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Unavailable(format!(
                    "no answer within {}s",
                    inner.settings.provider_timeout.as_secs()
                ))),
            }
        }
        Err(e) => Err(e),
    };

    let observation = match observed {
        Ok(observation) => observation,
        Err(e) => {
            warn!("Check of trigger {} failed: {}", key, e);
            inner.status.failed(&key, e.to_string());
            return;
        }
    };

    match inner.cursor(trigger) {
        None => {
            debug!("Trigger {} seeded at cursor {}", key, observation.cursor);
            inner.remember_cursor(trigger, observation.cursor);
            inner.status.not_due(&key);
        }
        Some(previous) if previous == observation.cursor => {
            inner.status.not_due(&key);
        }
        Some(_) => {
            // the cursor only advances once the run is started, so a failed
            // dispatch fires again on the next pass
            if inner.fire(trigger, observation.payload).await.is_ok() {
                inner.remember_cursor(trigger, observation.cursor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::locked;
    use crate::engine::provider::{EventProvider, Observation, ProviderSet};
    use crate::engine::testing::RecordingDispatcher;
    use crate::engine::{EngineSettings, TriggerEngine};
    use crate::repository::{MemoryTriggerStore, TriggerStore};
    use async_trait::async_trait;
    use conduit_core::domain::trigger::{
        GithubCommitPayload, HttpPollPayload, TriggerSpec, TriggerType,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Provider answering from a script keyed by url / repo
    #[derive(Default)]
    struct ScriptedProvider {
        cursors: Mutex<HashMap<String, Result<String, ProviderError>>>,
        hang: Mutex<Vec<String>>,
        /// Sources answering only after a pause
        slow: Mutex<HashMap<String, Duration>>,
    }

    impl ScriptedProvider {
        fn set(&self, source: &str, cursor: Result<&str, ProviderError>) {
            self.cursors
                .lock()
                .unwrap()
                .insert(source.to_string(), cursor.map(str::to_string));
        }
    }

    fn source(spec: &TriggerSpec) -> String {
        match spec {
            TriggerSpec::HttpPoll(p) => p.url.clone(),
            TriggerSpec::GithubCommit(p) => format!("{}/{}", p.owner, p.repo),
            _ => String::new(),
        }
    }

    #[async_trait]
    impl EventProvider for ScriptedProvider {
        async fn observe(&self, spec: &TriggerSpec) -> Result<Observation, ProviderError> {
            let source = source(spec);
            if self.hang.lock().unwrap().contains(&source) {
                std::future::pending::<()>().await;
            }
            let pause = self.slow.lock().unwrap().get(&source).copied();
            if let Some(pause) = pause {
                tokio::time::sleep(pause).await;
            }
            let cursor = self
                .cursors
                .lock()
                .unwrap()
                .get(&source)
                .cloned()
                .unwrap_or_else(|| Err(ProviderError::Unavailable("unknown source".into())))?;
            Ok(Observation {
                payload: json!({"source": source, "cursor": cursor}),
                cursor,
            })
        }
    }

    #[derive(Clone)]
    struct Shared(Arc<ScriptedProvider>);

    #[async_trait]
    impl EventProvider for Shared {
        async fn observe(&self, spec: &TriggerSpec) -> Result<Observation, ProviderError> {
            self.0.observe(spec).await
        }
    }

    fn poll_trigger(account: &str, name: &str, url: &str) -> Trigger {
        Trigger {
            account_id: account.to_string(),
            name: name.to_string(),
            pipeline: format!("{name}-pipeline"),
            spec: TriggerSpec::HttpPoll(HttpPollPayload {
                url: url.to_string(),
                cursor_pointer: None,
            }),
            created_at: chrono::Utc::now(),
        }
    }

    fn commit_trigger(account: &str, name: &str, repo: &str) -> Trigger {
        Trigger {
            account_id: account.to_string(),
            name: name.to_string(),
            pipeline: format!("{name}-pipeline"),
            spec: TriggerSpec::GithubCommit(GithubCommitPayload {
                owner: "acme".to_string(),
                repo: repo.to_string(),
                branch: "main".to_string(),
            }),
            created_at: chrono::Utc::now(),
        }
    }

    struct Fixture {
        engine: TriggerEngine,
        store: Arc<MemoryTriggerStore>,
        provider: Arc<ScriptedProvider>,
        dispatcher: Arc<RecordingDispatcher>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryTriggerStore::new());
        let provider = Arc::new(ScriptedProvider::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let providers = ProviderSet::new()
            .with(TriggerType::HttpPoll, Shared(provider.clone()))
            .with(TriggerType::GithubCommit, Shared(provider.clone()));
        let engine = TriggerEngine::new(
            dispatcher.clone(),
            store.clone(),
            providers,
            EngineSettings {
                check_interval: Duration::from_secs(30),
                provider_timeout: Duration::from_secs(5),
            },
        );
        Fixture {
            engine,
            store,
            provider,
            dispatcher,
        }
    }

    impl Fixture {
        async fn add(&self, trigger: &Trigger) {
            self.store.add(trigger).await.unwrap();
            self.engine.track(trigger);
        }

        fn pipelines(&self) -> Vec<String> {
            self.dispatcher
                .calls()
                .into_iter()
                .map(|(_, pipeline, _)| pipeline)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_changed_cursor_dispatches_once() {
        tokio::time::pause();
        let fx = fixture();
        fx.provider.set("https://feed/a", Ok("1"));
        fx.add(&poll_trigger("u1", "feed", "https://feed/a")).await;
        assert!(fx.engine.is_checking("u1"));

        // first pass only seeds the cursor
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fx.dispatcher.count(), 0);

        fx.provider.set("https://feed/a", Ok("2"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fx.dispatcher.count(), 1);
        assert_eq!(fx.dispatcher.calls()[0].2["cursor"], "2");

        // unchanged cursor stays quiet
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fx.dispatcher.count(), 1);
        fx.engine.shutdown();
    }

    #[tokio::test]
    async fn test_provider_failure_is_isolated() {
        tokio::time::pause();
        let fx = fixture();
        fx.provider.set("https://feed/ok", Ok("a"));
        fx.provider
            .set("https://feed/down", Err(ProviderError::Unavailable("503".into())));
        fx.provider.hang.lock().unwrap().push("acme/slow".to_string());

        let down = poll_trigger("u1", "down", "https://feed/down");
        let slow = commit_trigger("u1", "slow", "slow");
        fx.add(&down).await;
        fx.add(&slow).await;
        fx.add(&poll_trigger("u1", "ok", "https://feed/ok")).await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        fx.provider.set("https://feed/ok", Ok("b"));
        tokio::time::sleep(Duration::from_secs(40)).await;

        assert_eq!(fx.pipelines(), vec!["ok-pipeline".to_string()]);

        let status = fx.engine.status(&down.key()).unwrap();
        assert!(status.last_error.unwrap().contains("503"));
        let status = fx.engine.status(&slow.key()).unwrap();
        assert!(status.last_error.unwrap().contains("no answer within 5s"));

        // the failing source recovers and is checked again
        fx.provider.set("https://feed/down", Ok("x"));
        tokio::time::sleep(Duration::from_secs(40)).await;
        let status = fx.engine.status(&down.key()).unwrap();
        assert!(status.last_error.is_none());
        fx.engine.shutdown();
    }

    #[tokio::test]
    async fn test_accounts_are_checked_independently() {
        tokio::time::pause();
        let fx = fixture();
        fx.provider.hang.lock().unwrap().push("https://feed/hung".to_string());
        fx.provider.set("https://feed/u2", Ok("1"));

        fx.add(&poll_trigger("u1", "hung", "https://feed/hung")).await;
        fx.add(&poll_trigger("u2", "feed", "https://feed/u2")).await;
        assert!(fx.engine.is_checking("u2"));

        tokio::time::sleep(Duration::from_secs(31)).await;
        fx.provider.set("https://feed/u2", Ok("2"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        let calls = fx.dispatcher.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "u2");
        fx.engine.shutdown();
    }

    #[tokio::test]
    async fn test_deleted_trigger_is_no_longer_checked() {
        tokio::time::pause();
        let fx = fixture();
        let trigger = poll_trigger("u1", "feed", "https://feed/a");
        fx.provider.set("https://feed/a", Ok("1"));
        fx.add(&trigger).await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        fx.store.delete("u1", &trigger.pipeline, "feed").await.unwrap();
        fx.engine.stop(&trigger.key());

        fx.provider.set("https://feed/a", Ok("2"));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.dispatcher.count(), 0);
        fx.engine.shutdown();
    }

    #[tokio::test]
    async fn test_check_in_flight_during_stop_leaves_no_cursor() {
        tokio::time::pause();
        let fx = fixture();
        let trigger = poll_trigger("u1", "feed", "https://feed/a");
        fx.provider.set("https://feed/a", Ok("1"));
        fx.provider
            .slow
            .lock()
            .unwrap()
            .insert("https://feed/a".to_string(), Duration::from_secs(3));
        fx.add(&trigger).await;

        // the pass at 30s answers at 33s, after the trigger is gone
        tokio::time::sleep(Duration::from_secs(31)).await;
        fx.store.delete("u1", &trigger.pipeline, "feed").await.unwrap();
        fx.engine.stop(&trigger.key());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!locked(&fx.engine.inner.cursors).contains_key(&trigger.key()));
        fx.engine.shutdown();
    }

    #[tokio::test]
    async fn test_recreated_trigger_starts_from_fresh_seed() {
        tokio::time::pause();
        let fx = fixture();
        let old = poll_trigger("u1", "feed", "https://feed/a");
        fx.provider.set("https://feed/a", Ok("1"));
        fx.provider
            .slow
            .lock()
            .unwrap()
            .insert("https://feed/a".to_string(), Duration::from_secs(3));
        fx.add(&old).await;

        // delete and re-create while the check of the old row is in flight
        tokio::time::sleep(Duration::from_secs(31)).await;
        fx.store.delete("u1", &old.pipeline, "feed").await.unwrap();
        fx.engine.stop(&old.key());
        let new = Trigger {
            created_at: old.created_at + chrono::Duration::seconds(1),
            ..old.clone()
        };
        fx.add(&new).await;

        // the old row's check lands at 33s with cursor 1
        tokio::time::sleep(Duration::from_secs(3)).await;
        fx.provider.set("https://feed/a", Ok("2"));

        // the first pass over the new row only seeds it
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fx.dispatcher.count(), 0);

        fx.provider.set("https://feed/a", Ok("3"));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fx.dispatcher.count(), 1);
        assert_eq!(fx.dispatcher.calls()[0].2["cursor"], "3");
        fx.engine.shutdown();
    }
}
