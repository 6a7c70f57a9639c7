//! Command engine: one command/response cycle at a time.
//!
//! The write half of the transport sits behind an async mutex. Holding the
//! lock is the right to have a command outstanding, so a second caller is
//! serialized behind the first and can never see its replies.

use super::line::{Line, LineKind};
use super::receiver::Shared;
use crate::error::{Error, Result};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// Boxed write half of the transport.
pub(crate) type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Value lines captured while a command was outstanding.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    values: Vec<String>,
}

impl Reply {
    /// First captured value, echo prefix removed.
    pub fn value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    /// All captured values in arrival order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_value(self) -> Option<String> {
        self.values.into_iter().next()
    }
}

/// Serializes commands to the module and collects their replies.
pub struct CommandEngine {
    writer: Mutex<Writer>,
    shared: Arc<Shared>,
    timeout: Duration,
}

impl CommandEngine {
    pub(crate) fn new(writer: Writer, shared: Arc<Shared>, timeout: Duration) -> Self {
        Self {
            writer: Mutex::new(writer),
            shared,
            timeout,
        }
    }

    /// Send a command and wait for `OK` or a failure status.
    ///
    /// Waits for any command already in flight to finish first.
    pub async fn execute(&self, command: &str) -> Result<Reply> {
        let mut writer = self.writer.lock().await;
        self.exchange(&mut writer, command, &[], self.timeout).await
    }

    /// Like [`execute`](Self::execute) but fails with `Busy` instead of
    /// waiting for another command.
    pub async fn try_execute(&self, command: &str) -> Result<Reply> {
        let mut writer = self.writer.try_lock().map_err(|_| Error::Busy)?;
        self.exchange(&mut writer, command, &[], self.timeout).await
    }

    /// Send a `<KEY>=?` query and return its value.
    pub async fn query(&self, command: &str) -> Result<String> {
        self.execute(command)
            .await?
            .into_value()
            .ok_or_else(|| Error::InvalidResponse(format!("no value for {}", command)))
    }

    /// Send a command that may end with one of `markers` instead of `OK`.
    ///
    /// Used for commands that reboot the module, which prints a splash
    /// screen rather than a status.
    pub(crate) async fn execute_until(
        &self,
        command: &str,
        markers: &[&str],
        within: Duration,
    ) -> Result<Reply> {
        let mut writer = self.writer.lock().await;
        self.exchange(&mut writer, command, markers, within).await
    }

    async fn exchange(
        &self,
        writer: &mut Writer,
        command: &str,
        markers: &[&str],
        within: Duration,
    ) -> Result<Reply> {
        if command.contains(['\r', '\n']) {
            return Err(Error::InvalidArgument("command contains a line break"));
        }
        if self.shared.is_closed() {
            return Err(Error::Closed);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Line>();
        let _slot = self.shared.install(tx);

        debug!("> {}", command);
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;

        let mut reply = Reply::default();
        let outcome = timeout(within, async {
            loop {
                let line = rx.recv().await.ok_or(Error::Closed)?;
                match line.kind() {
                    LineKind::Ok => return Ok(()),
                    LineKind::Failure => return Err(Error::InvalidResponse(line.into_string())),
                    LineKind::Event | LineKind::Value => {
                        let text = line.into_string();
                        if text == command {
                            // Local echo of the command itself.
                            continue;
                        }
                        let done = markers.iter().any(|m| text.contains(m));
                        reply.values.push(strip_echo(command, &text).to_string());
                        if done {
                            return Ok(());
                        }
                    }
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(reply),
            Ok(Err(e)) => {
                debug!("{} failed: {}", command, e);
                Err(e)
            }
            Err(_) => {
                warn!("No response to {}", command);
                Err(Error::Timeout)
            }
        }
    }
}

/// Strip the `AT+KEY=` echo some firmware puts in front of query values.
fn strip_echo<'a>(command: &str, value: &'a str) -> &'a str {
    match command.strip_suffix('?') {
        Some(prefix) => value.strip_prefix(prefix).unwrap_or(value),
        None => value,
    }
}
