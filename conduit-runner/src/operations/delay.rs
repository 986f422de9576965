//! `delay` operation: waits for a number of seconds

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use conduit_core::domain::task::{TaskBody, TaskContext};
use serde::Deserialize;

use super::{Operation, decode};
use crate::log_buffer::TaskLog;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DelayInput {
    seconds: u64,
}

pub struct DelayOperation;

#[async_trait]
impl Operation for DelayOperation {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn validate(&self, body: &TaskBody) -> Result<(), String> {
        decode::<DelayInput>(body).map(|_| ())
    }

    async fn invoke(&self, _ctx: &TaskContext, body: &TaskBody, log: &TaskLog) -> Result<()> {
        let input: DelayInput = decode(body).map_err(anyhow::Error::msg)?;
        log.info(format!("Waiting {} second(s)", input.seconds));
        tokio::time::sleep(Duration::from_secs(input.seconds)).await;
        log.info("Done waiting");
        Ok(())
    }
}
