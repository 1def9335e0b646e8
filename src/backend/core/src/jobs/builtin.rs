//! Built-in handlers.

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::definition::HandlerRef;
use super::{Job, JobContext, JobError, JobResult};

/// Handler name of [`ShellCommandJob`].
pub const SHELL_HANDLER: &str = "shell";
/// Handler name of [`LogJob`].
pub const LOG_HANDLER: &str = "log";

/// Parameter accepted by [`ShellCommandJob`]: a bare command string, or an
/// object with a timeout.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ShellParameter {
    Command(String),
    Detailed {
        command: String,
        #[serde(default, with = "humantime_serde")]
        timeout: Option<Duration>,
    },
}

impl ShellParameter {
    fn command(&self) -> &str {
        match self {
            Self::Command(command) | Self::Detailed { command, .. } => command,
        }
    }

    fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Command(_) => None,
            Self::Detailed { timeout, .. } => *timeout,
        }
    }
}

/// Job: run the parameter through `sh -c`.
///
/// A non-zero exit status is a retryable failure. Cancellation kills the
/// child process.
#[derive(Debug, Default, Clone)]
pub struct ShellCommandJob;

#[async_trait]
impl Job for ShellCommandJob {
    async fn run(&self, ctx: &JobContext) -> JobResult {
        let parameter: ShellParameter = ctx
            .parameter()
            .ok_or_else(|| JobError::fatal("shell job requires a command parameter"))?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(parameter.command())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let wait = child.wait_with_output();
        let output = match parameter.timeout() {
            Some(limit) => match ctx.cancellable(tokio::time::timeout(limit, wait)).await {
                Some(Ok(output)) => output?,
                Some(Err(_)) => {
                    return Err(
                        JobError::retryable(format!("command timed out after {:?}", limit))
                            .with_code("TIMEOUT"),
                    )
                }
                None => return Err(JobError::retryable("command cancelled")),
            },
            None => match ctx.cancellable(wait).await {
                Some(output) => output?,
                None => return Err(JobError::retryable("command cancelled")),
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(last) = stdout.lines().last() {
            ctx.log_info(last);
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(JobError::retryable(format!("command exited with {}", output.status))
                .with_code("EXIT_STATUS")
                .with_context(serde_json::json!({
                    "exit_code": output.status.code(),
                    "stderr": stderr.trim(),
                })))
        }
    }
}

/// Job: log the parameter.
#[derive(Debug, Default, Clone)]
pub struct LogJob;

#[async_trait]
impl Job for LogJob {
    async fn run(&self, ctx: &JobContext) -> JobResult {
        let message = match ctx.parameter_value() {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => format!("{} fired", ctx.job_name()),
        };
        ctx.log_info(&message);
        Ok(())
    }
}

/// Handler references for every built-in handler, named for use in
/// configuration.
pub fn builtin_handlers() -> Vec<HandlerRef> {
    vec![
        HandlerRef::named(SHELL_HANDLER, || std::sync::Arc::new(ShellCommandJob)),
        HandlerRef::named(LOG_HANDLER, || std::sync::Arc::new(LogJob)),
    ]
}
