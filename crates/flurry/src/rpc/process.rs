//! Worker child processes.

use snafu::prelude::*;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::channel::ChannelContext;
use super::transport::framed;
use crate::config::WorkerConfig;
use crate::error::{HostError, WorkerSpawnSnafu};

/// A running worker, speaking the protocol over its stdin and stdout.
#[derive(Debug)]
pub struct WorkerProcess {
    worker_id: String,
    child: Child,
}

impl WorkerProcess {
    /// Start the configured command and connect a channel to its stdio.
    ///
    /// Stderr lines are forwarded to the log.
    pub fn spawn(config: &WorkerConfig) -> Result<(Self, ChannelContext), HostError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context(WorkerSpawnSnafu {
                command: config.command.as_str(),
            })?;

        let worker_id = match child.id() {
            Some(pid) => format!("{}-{pid}", config.command),
            None => config.command.clone(),
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(HostError::WorkerSpawn {
                command: config.command.clone(),
                source: std::io::Error::other("worker stdio was not captured"),
            });
        };

        if let Some(stderr) = child.stderr.take() {
            let id = worker_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => info!(worker = %id, "{line}"),
                        Ok(None) => break,
                        Err(e) => {
                            debug!(worker = %id, error = %e, "Worker stderr closed");
                            break;
                        }
                    }
                }
            });
        }

        info!(worker = %worker_id, command = %config.command, "Started worker process");
        let context = framed(worker_id.clone(), stdout, stdin);
        Ok((Self { worker_id, child }, context))
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Kill the worker and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(worker = %self.worker_id, error = %e, "Worker already exited");
        }
        match self.child.wait().await {
            Ok(status) => info!(worker = %self.worker_id, %status, "Worker exited"),
            Err(e) => warn!(worker = %self.worker_id, error = %e, "Failed to wait for worker"),
        }
    }
}
