//! Scripted stand-in for the module on the far end of the UART.
//!
//! Tests talk to the driver through a `tokio::io::duplex` pair. The module
//! side either runs step by step from the test body ([`MockModule`]) or
//! answers every command from a handler closure on its own task
//! ([`MockModule::serve`]).

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Generous bound so a broken test fails instead of hanging.
const STEP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) struct MockModule {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockModule {
    /// Create a module and the host end of its link.
    pub(crate) fn pair() -> (Self, DuplexStream) {
        let (module, host) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(module);
        (
            Self {
                reader: BufReader::new(reader),
                writer,
            },
            host,
        )
    }

    /// Read the next command line written by the driver.
    pub(crate) async fn expect_command(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(STEP_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("driver wrote no command")
            .expect("link read failed");
        assert!(n > 0, "driver closed the link");
        assert!(line.ends_with("\r\n"), "command not CRLF terminated: {:?}", line);
        line.truncate(line.len() - 2);
        line
    }

    /// True if the driver writes nothing for `window`.
    pub(crate) async fn no_command_within(&mut self, window: Duration) -> bool {
        let mut line = String::new();
        timeout(window, self.reader.read_line(&mut line))
            .await
            .is_err()
    }

    /// Write lines back to the driver, each CRLF terminated.
    pub(crate) async fn send_lines(&mut self, lines: &[&str]) {
        for line in lines {
            self.writer.write_all(line.as_bytes()).await.expect("link write");
            self.writer.write_all(b"\r\n").await.expect("link write");
        }
        self.writer.flush().await.expect("link flush");
    }

    /// Answer every command with the lines returned by `handler`.
    ///
    /// Commands are recorded in the returned log in the order received.
    pub(crate) fn serve<F>(mut self, mut handler: F) -> CommandLog
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let seen = commands.clone();
        let task = tokio::spawn(async move {
            loop {
                let mut line = String::new();
                match self.reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let command = line.trim_end_matches(['\r', '\n']).to_string();
                let replies = handler(&command);
                seen.lock().unwrap().push(command);
                for reply in replies {
                    if self.writer.write_all(reply.as_bytes()).await.is_err()
                        || self.writer.write_all(b"\r\n").await.is_err()
                    {
                        return;
                    }
                }
                if self.writer.flush().await.is_err() {
                    return;
                }
            }
        });
        CommandLog {
            commands,
            task: Some(Arc::new(task)),
        }
    }
}

/// Commands seen by a serving mock module.
#[derive(Clone)]
pub(crate) struct CommandLog {
    commands: Arc<Mutex<Vec<String>>>,
    task: Option<Arc<JoinHandle<()>>>,
}

impl CommandLog {
    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn contains(&self, command: &str) -> bool {
        self.commands.lock().unwrap().iter().any(|c| c == command)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.lock().unwrap().is_empty()
    }
}

impl Drop for CommandLog {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if Arc::strong_count(&task) == 1 {
                task.abort();
            }
        }
    }
}

/// Reply helper: the lines for a plain `OK`.
pub(crate) fn ok() -> Vec<String> {
    vec!["OK".to_string()]
}

/// Reply helper: a query value followed by `OK`.
pub(crate) fn value(v: &str) -> Vec<String> {
    vec![v.to_string(), String::new(), "OK".to_string()]
}

/// Initialize logging for a test, once per process.
pub(crate) fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init()
        .ok();
}
