//! Device handle for one attached module.
//!
//! Creating a [`Device`] splits the transport, spawns the line receiver on
//! the read half and puts the write half behind the command engine. The
//! LoRaWAN and P2P operations live in [`crate::lorawan`] and [`crate::p2p`]
//! as further `impl Device` blocks.
//!
//! # Example
//!
//! ```ignore
//! let port = tokio_serial::new("/dev/ttyUSB0", 9600).open_native_async()?;
//! let device = Device::new(port, DriverConfig::default());
//! device.init_lorawan(&config).await?;
//! device.start_join(JoinOptions::default(), None).await?;
//! device.transmit(1, b"hello", true, Duration::from_secs(15), None).await?;
//! device.deinit().await;
//! ```

use crate::at::receiver::{self, EventQueue, Shared};
use crate::at::{CommandEngine, Line, Reply};
use crate::config::{DriverConfig, MODE_SWITCH_TIMEOUT};
use crate::error::{Error, Result};
use crate::lorawan::JoinMode;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Splash text printed by the module after a reboot.
const SPLASH_MARKERS: &[&str] = &["LoRaWAN.", "LoRa P2P."];

/// Radio work mode (`AT+NWM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Point-to-point LoRa.
    P2p = 0,
    /// LoRaWAN end device.
    LoRaWan = 1,
}

impl TryFrom<u8> for Mode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Mode::P2p),
            1 => Ok(Mode::LoRaWan),
            _ => Err(Error::InvalidResponse(format!("unknown work mode {}", value))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::P2p => f.write_str("LoRa P2P"),
            Mode::LoRaWan => f.write_str("LoRaWAN"),
        }
    }
}

/// Settings cached from the last successful command.
#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) mode: Option<Mode>,
    pub(crate) join_mode: Option<JoinMode>,
}

/// One attached module.
pub struct Device {
    pub(crate) engine: CommandEngine,
    pub(crate) events: Arc<EventQueue>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) config: DriverConfig,
    state: Mutex<State>,
    confirm_failed: AtomicBool,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Device {
    /// Attach to a module over `transport`.
    ///
    /// Must be called from within a tokio runtime; the line receiver runs as
    /// a spawned task until [`deinit`](Self::deinit) or drop.
    pub fn new<T>(transport: T, config: DriverConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let shared = Arc::new(Shared::default());
        let events = Arc::new(EventQueue::new(config.event_queue_depth));
        let cancel = CancellationToken::new();

        let task = receiver::spawn(
            reader,
            shared.clone(),
            events.clone(),
            config.max_line_len,
            cancel.clone(),
        );

        Self {
            engine: CommandEngine::new(Box::new(writer), shared.clone(), config.command_timeout),
            events,
            shared,
            config,
            state: Mutex::new(State::default()),
            confirm_failed: AtomicBool::new(false),
            cancel,
            task: Some(task),
        }
    }

    /// Stop the line receiver and release any undelivered lines.
    pub async fn deinit(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Line receiver ended abnormally: {}", e);
            }
        }
        self.events.close();
        debug!("Device deinitialized");
    }

    /// Send a raw command and wait for its reply.
    pub async fn command(&self, command: &str) -> Result<Reply> {
        self.engine.execute(command).await
    }

    /// Like [`command`](Self::command) but fails with `Busy` while another
    /// command is outstanding.
    pub async fn try_command(&self, command: &str) -> Result<Reply> {
        self.engine.try_execute(command).await
    }

    /// Send a raw `<KEY>=?` query and return its value.
    pub async fn query(&self, command: &str) -> Result<String> {
        self.engine.query(command).await
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Cached work mode, if known.
    pub fn mode(&self) -> Option<Mode> {
        self.state().mode
    }

    /// Whether the last confirmed uplink was reported as not acknowledged.
    pub fn last_confirm_failed(&self) -> bool {
        self.confirm_failed.load(Ordering::Acquire)
    }

    pub(crate) fn set_confirm_failed(&self, failed: bool) {
        self.confirm_failed.store(failed, Ordering::Release);
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait up to `within` for the next unsolicited line.
    pub(crate) async fn next_event(&self, within: Duration) -> Result<Option<Line>> {
        self.events.next(within).await
    }

    /// Switch the work mode, rebooting the module if it changes.
    pub async fn set_mode(&self, mode: Mode) -> Result<()> {
        self.set_mode_within(mode, MODE_SWITCH_TIMEOUT).await
    }

    pub(crate) async fn set_mode_within(&self, mode: Mode, within: Duration) -> Result<()> {
        if self.mode() == Some(mode) {
            return Ok(());
        }

        let command = format!("AT+NWM={}", mode as u8);
        let reply = self
            .engine
            .execute_until(&command, SPLASH_MARKERS, within)
            .await?;

        if reply.values().is_empty() {
            debug!("Work mode already {}", mode);
        } else {
            info!("Module rebooted into {} mode", mode);
            self.shared.set_joined(false);
        }

        // Reboot output may trail the reply; drop it until the line goes quiet.
        let mut dropped = 0;
        loop {
            tokio::time::sleep(self.config.mode_settle_time).await;
            match self.events.drain() {
                0 => break,
                n => dropped += n,
            }
        }
        if dropped > 0 {
            debug!("Discarded {} lines after mode switch", dropped);
        }

        self.state().mode = Some(mode);
        Ok(())
    }

    /// Query the work mode and update the cache.
    pub async fn refresh_mode(&self) -> Result<Mode> {
        let value = self.engine.query("AT+NWM=?").await?;
        let mode = Mode::try_from(crate::error::parse_value::<u8>(&value)?)?;
        self.state().mode = Some(mode);
        Ok(mode)
    }

    /// Reboot the module with `ATZ` and wait for its splash screen.
    pub async fn soft_reset(&self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(Error::InvalidArgument("reset timeout must be non-zero"));
        }

        let reply = self
            .engine
            .execute_until("ATZ", SPLASH_MARKERS, timeout)
            .await?;

        let mode = reply.values().iter().rev().find_map(|line| {
            if line.contains("LoRa P2P.") {
                Some(Mode::P2p)
            } else if line.contains("LoRaWAN.") {
                Some(Mode::LoRaWan)
            } else {
                None
            }
        });

        self.shared.set_joined(false);
        self.state().mode = mode;
        info!("Module reset, mode {:?}", mode);
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
