//! `echo` operation: writes a message to the task log

use anyhow::Result;
use async_trait::async_trait;
use conduit_core::domain::task::{TaskBody, TaskContext};
use serde::Deserialize;

use super::{Operation, decode};
use crate::log_buffer::TaskLog;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EchoInput {
    message: String,
}

pub struct EchoOperation;

#[async_trait]
impl Operation for EchoOperation {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn validate(&self, body: &TaskBody) -> Result<(), String> {
        decode::<EchoInput>(body).map(|_| ())
    }

    async fn invoke(&self, ctx: &TaskContext, body: &TaskBody, log: &TaskLog) -> Result<()> {
        let input: EchoInput = decode(body).map_err(anyhow::Error::msg)?;
        log.info(input.message);
        if !ctx.input.is_null() {
            log.info(format!("input: {}", ctx.input));
        }
        Ok(())
    }
}
