//! LoRaWAN session operations.
//!
//! Connection lifecycle: configure with [`Device::init_lorawan`], join with
//! [`Device::start_join`], then transmit and receive while joined. Every
//! accessor is a single command round trip.

use super::downlink::{Downlink, DownlinkParser};
use super::keys::{Activation, AppKey, AppSKey, DevAddr, Eui64, NwkSKey};
use super::region::{
    sub_band_from_mask, sub_band_mask, tx_power_index, Band, DeviceClass, JoinMode, SubBand,
    MAX_DATA_RATE, MAX_RETRIES,
};
use crate::config::MODE_SWITCH_TIMEOUT;
use crate::device::{Device, Mode};
use crate::encoding::to_hex_lower;
use crate::error::{parse_value, Error, Result};
use crate::wait::{run_hook, Deadline, WaitHook};
use log::{debug, error, info, warn};
use std::time::Duration;

/// Largest payload the module accepts in one `AT+SEND`.
pub const MAX_PAYLOAD_LEN: usize = 242;

/// Command that cancels an ongoing join.
const STOP_JOIN: &str = "AT+JOIN=0:0:7:0";

/// Session parameters applied by [`Device::init_lorawan`].
#[derive(Debug, Clone)]
pub struct LoRaWanConfig {
    /// Requested output power in dBm.
    pub tx_power: u8,
    /// Confirmed-uplink retransmissions (0..=7); 0 disables confirmation.
    pub retries: u8,
    pub activation: Activation,
    pub class: DeviceClass,
    pub band: Band,
    pub sub_band: SubBand,
    pub adr: bool,
    /// Bound for the reboot when the module has to change work mode.
    pub timeout: Duration,
}

impl LoRaWanConfig {
    /// Defaults: class A, ADR on, no retries, 16 dBm, default band.
    pub fn new(activation: Activation) -> Self {
        Self {
            tx_power: 16,
            retries: 0,
            activation,
            class: DeviceClass::A,
            band: Band::default(),
            sub_band: SubBand::None,
            adr: true,
            timeout: MODE_SWITCH_TIMEOUT,
        }
    }

    pub fn with_band(mut self, band: Band, sub_band: SubBand) -> Self {
        self.band = band;
        self.sub_band = sub_band;
        self
    }
}

/// Join request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOptions {
    /// Overall wait; `Duration::ZERO` waits forever.
    pub timeout: Duration,
    /// Join attempts made by the module (at least 1).
    pub attempts: u8,
    /// Let the module rejoin by itself after a reboot.
    pub auto_join: bool,
    /// Seconds between attempts.
    pub interval: u8,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            attempts: 5,
            auto_join: false,
            interval: 15,
        }
    }
}

/// Outcome of a confirmed uplink, if `line` reports one.
fn confirmation(line: &str) -> Option<bool> {
    let normalized = line.replace('_', " ");
    if normalized.contains("SEND CONFIRMED OK") {
        Some(true)
    } else if normalized.contains("SEND CONFIRMED FAILED") {
        Some(false)
    } else {
        None
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(Error::InvalidResponse(other.to_string())),
    }
}

impl Device {
    /// Configure the module for LoRaWAN and provision keys.
    ///
    /// A failure part way leaves the module partly configured; retry the
    /// whole call.
    pub async fn init_lorawan(&self, config: &LoRaWanConfig) -> Result<()> {
        if config.retries > MAX_RETRIES {
            return Err(Error::InvalidArgument("retries must be 0..=7"));
        }

        info!("Initialize module in LoRaWAN mode...");
        self.set_mode_within(Mode::LoRaWan, config.timeout).await?;

        self.stop_join().await?;
        self.refresh_join_status().await?;

        self.set_class(config.class).await?;
        self.set_adr(config.adr).await?;
        self.set_band(config.band).await?;
        if config.sub_band != SubBand::None {
            self.set_sub_band(config.sub_band).await?;
        }
        self.set_retries(config.retries).await?;
        self.set_tx_power(config.tx_power).await?;
        self.set_join_mode(config.activation.join_mode()).await?;

        match &config.activation {
            Activation::Otaa {
                dev_eui,
                app_eui,
                app_key,
            } => {
                info!("Using OTAA mode");
                self.set_otaa_keys(dev_eui, app_eui, app_key).await
            }
            Activation::Abp {
                app_skey,
                nwk_skey,
                dev_addr,
            } => {
                info!("Using ABP mode");
                self.set_abp_keys(app_skey, nwk_skey, dev_addr).await
            }
        }
    }

    fn require_join_mode(&self, mode: JoinMode) -> Result<()> {
        if self.state().join_mode == Some(mode) {
            Ok(())
        } else {
            Err(Error::InvalidState("keys do not match the configured join mode"))
        }
    }

    /// Provision OTAA identity and root key.
    pub async fn set_otaa_keys(&self, dev_eui: &Eui64, app_eui: &Eui64, app_key: &AppKey) -> Result<()> {
        self.require_join_mode(JoinMode::Otaa)?;

        debug!("DEVEUI: {}", dev_eui.to_hex());
        debug!("APPEUI: {}", app_eui.to_hex());
        self.engine.execute(&format!("AT+DEVEUI={}", dev_eui.to_hex())).await?;
        self.engine.execute(&format!("AT+APPEUI={}", app_eui.to_hex())).await?;
        self.engine.execute(&format!("AT+APPKEY={}", app_key.to_hex())).await?;
        Ok(())
    }

    /// Provision ABP session keys and device address.
    pub async fn set_abp_keys(&self, app_skey: &AppSKey, nwk_skey: &NwkSKey, dev_addr: &DevAddr) -> Result<()> {
        self.require_join_mode(JoinMode::Abp)?;

        debug!("DEVADDR: {}", dev_addr.to_hex());
        self.engine.execute(&format!("AT+APPSKEY={}", app_skey.to_hex())).await?;
        self.engine.execute(&format!("AT+NWKSKEY={}", nwk_skey.to_hex())).await?;
        self.engine.execute(&format!("AT+DEVADDR={}", dev_addr.to_hex())).await?;
        Ok(())
    }

    /// Start joining and wait until the network accepts the device.
    ///
    /// Returns immediately if already joined. On timeout the join is
    /// cancelled before `Timeout` is returned.
    pub async fn start_join(&self, options: JoinOptions, mut hook: Option<WaitHook<'_>>) -> Result<()> {
        if options.attempts == 0 {
            return Err(Error::InvalidArgument("join needs at least one attempt"));
        }
        if self.is_joined() {
            return Ok(());
        }

        self.engine
            .execute(&format!(
                "AT+JOIN=1:{}:{}:{}",
                u8::from(options.auto_join),
                options.interval,
                options.attempts
            ))
            .await?;
        info!("Joining ({} attempts)...", options.attempts);

        let deadline = Deadline::after(options.timeout);
        loop {
            run_hook(&mut hook);

            if self.is_joined() {
                info!("Joined");
                return Ok(());
            }

            if deadline.is_expired() {
                error!("Join timeout!");
                if let Err(e) = self.stop_join().await {
                    warn!("Failed to cancel join: {}", e);
                }
                self.events.drain();
                return Err(Error::Timeout);
            }

            tokio::time::sleep(deadline.step(self.config.poll_interval)).await;
        }
    }

    /// Cancel any join in progress.
    pub async fn stop_join(&self) -> Result<()> {
        self.engine.execute(STOP_JOIN).await.map(|_| ())
    }

    /// Cached join state, updated by `+EVT:JOINED` and status refreshes.
    pub fn is_joined(&self) -> bool {
        self.shared.is_joined()
    }

    /// Ask the module for its join state and update the cache.
    pub async fn refresh_join_status(&self) -> Result<bool> {
        self.shared.set_joined(false);
        let joined = self.engine.query("AT+NJS=?").await?.trim() == "1";
        self.shared.set_joined(joined);
        Ok(joined)
    }

    /// Send an uplink on `port`.
    ///
    /// A confirmed uplink waits for the network acknowledgement;
    /// `Duration::ZERO` waits forever. An empty payload sends nothing.
    pub async fn transmit(
        &self,
        port: u8,
        payload: &[u8],
        confirmed: bool,
        timeout: Duration,
        mut hook: Option<WaitHook<'_>>,
    ) -> Result<()> {
        if port == 0 {
            return Err(Error::InvalidArgument("port 0 is reserved"));
        }
        if !self.is_joined() {
            return Err(Error::NotConnected);
        }
        if payload.is_empty() {
            return Ok(());
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidArgument("payload longer than 242 bytes"));
        }

        self.set_confirmation(confirmed).await?;

        // Lines left from earlier operations say nothing about this uplink.
        let stale = self.events.drain();
        if stale > 0 {
            debug!("Discarded {} stale events before uplink", stale);
        }

        self.set_confirm_failed(false);
        let command = format!("AT+SEND={}:{}", port, to_hex_lower(payload));
        if let Err(e) = self.engine.execute(&command).await {
            if let Error::InvalidResponse(status) = &e {
                if status.contains("BUSY") {
                    warn!("Module busy, uplink not sent");
                }
            }
            return Err(e);
        }

        if !confirmed {
            return Ok(());
        }

        let deadline = Deadline::after(timeout);
        loop {
            run_hook(&mut hook);

            match self.next_event(deadline.step(self.config.poll_interval)).await? {
                Some(line) => match confirmation(line.as_str()) {
                    Some(true) => {
                        info!("Uplink confirmed");
                        return Ok(());
                    }
                    Some(false) => {
                        warn!("Uplink not acknowledged");
                        self.set_confirm_failed(true);
                        return Err(Error::InvalidResponse(line.into_string()));
                    }
                    None => debug!("Discarding event: {}", line),
                },
                None => debug!("Wait for Tx..."),
            }

            if deadline.is_expired() {
                error!("Transmit timeout!");
                self.events.drain();
                return Err(Error::Timeout);
            }
        }
    }

    /// Wait for a downlink.
    ///
    /// `timeout` must exceed one second. Events that are not part of a
    /// downlink are discarded.
    pub async fn receive(&self, timeout: Duration) -> Result<Downlink> {
        if timeout <= Duration::from_secs(1) {
            return Err(Error::InvalidArgument("receive timeout must exceed 1 s"));
        }
        if !self.is_joined() {
            return Err(Error::NotConnected);
        }

        let deadline = Deadline::after(timeout);
        let mut parser = DownlinkParser::default();
        loop {
            if let Some(line) = self.next_event(deadline.step(self.config.poll_interval)).await? {
                debug!("Receive event: {}", line);
                if let Some(downlink) = parser.feed(line.as_str())? {
                    info!("Downlink received: {} bytes", downlink.payload.len());
                    return Ok(downlink);
                }
            }

            if deadline.is_expired() {
                error!("Receive timeout!");
                self.events.drain();
                return Err(Error::Timeout);
            }
        }
    }

    pub async fn set_class(&self, class: DeviceClass) -> Result<()> {
        self.engine
            .execute(&format!("AT+CLASS={}", class.as_char()))
            .await
            .map(|_| ())
    }

    pub async fn class(&self) -> Result<DeviceClass> {
        self.engine.query("AT+CLASS=?").await?.parse()
    }

    /// Set retransmissions for confirmed uplinks; also toggles confirmation.
    pub async fn set_retries(&self, retries: u8) -> Result<()> {
        if retries > MAX_RETRIES {
            return Err(Error::InvalidArgument("retries must be 0..=7"));
        }
        self.set_confirmation(retries > 0).await?;
        self.engine
            .execute(&format!("AT+RETY={}", retries))
            .await
            .map(|_| ())
    }

    pub async fn retries(&self) -> Result<u8> {
        parse_value(&self.engine.query("AT+RETY=?").await?)
    }

    /// Public (1) or private (0) network sync word.
    pub async fn set_public_network(&self, enable: bool) -> Result<()> {
        self.set_flag("AT+PNM", enable).await
    }

    pub async fn public_network(&self) -> Result<bool> {
        parse_flag(&self.engine.query("AT+PNM=?").await?)
    }

    pub async fn set_confirmation(&self, enable: bool) -> Result<()> {
        self.set_flag("AT+CFM", enable).await
    }

    pub async fn confirmation(&self) -> Result<bool> {
        parse_flag(&self.engine.query("AT+CFM=?").await?)
    }

    pub async fn set_band(&self, band: Band) -> Result<()> {
        self.engine
            .execute(&format!("AT+BAND={}", band as u8))
            .await
            .map(|_| ())
    }

    pub async fn band(&self) -> Result<Band> {
        Band::try_from(parse_value::<u8>(&self.engine.query("AT+BAND=?").await?)?)
    }

    /// Restrict the channel plan to one sub-band (US915, AU915, CN470).
    pub async fn set_sub_band(&self, sub_band: SubBand) -> Result<()> {
        if sub_band == SubBand::None {
            return Ok(());
        }

        let band = self.band().await?;
        match sub_band_mask(band, sub_band)? {
            Some(mask) => self
                .engine
                .execute(&format!("AT+MASK={}", mask))
                .await
                .map(|_| ()),
            None => Ok(()),
        }
    }

    pub async fn sub_band(&self) -> Result<SubBand> {
        let band = self.band().await?;
        if !band.has_sub_bands() {
            return Ok(SubBand::None);
        }
        sub_band_from_mask(band, &self.engine.query("AT+MASK=?").await?)
    }

    /// Set output power in dBm, mapped to the module's power index.
    ///
    /// Bands without a power table get index 0 (regional maximum).
    pub async fn set_tx_power(&self, dbm: u8) -> Result<()> {
        let band = self.band().await?;
        let index = tx_power_index(band, dbm).unwrap_or_else(|| {
            warn!("No Tx power table for {}, using index 0", band);
            0
        });
        debug!("Tx power {} dBm -> index {}", dbm, index);
        self.engine
            .execute(&format!("AT+TXP={}", index))
            .await
            .map(|_| ())
    }

    /// Current power index (0 = regional maximum).
    pub async fn tx_power_index(&self) -> Result<u8> {
        parse_value(&self.engine.query("AT+TXP=?").await?)
    }

    /// RX1 window delay in milliseconds.
    pub async fn set_rx1_delay(&self, delay_ms: u16) -> Result<()> {
        self.engine
            .execute(&format!("AT+RX1DL={}", delay_ms))
            .await
            .map(|_| ())
    }

    pub async fn rx1_delay(&self) -> Result<u16> {
        parse_value(&self.engine.query("AT+RX1DL=?").await?)
    }

    /// RX2 window delay in milliseconds.
    pub async fn set_rx2_delay(&self, delay_ms: u16) -> Result<()> {
        self.engine
            .execute(&format!("AT+RX2DL={}", delay_ms))
            .await
            .map(|_| ())
    }

    pub async fn rx2_delay(&self) -> Result<u16> {
        parse_value(&self.engine.query("AT+RX2DL=?").await?)
    }

    /// SNR of the last received packet.
    pub async fn snr(&self) -> Result<i16> {
        parse_value(&self.engine.query("AT+SNR=?").await?)
    }

    /// RSSI of the last received packet.
    pub async fn rssi(&self) -> Result<i16> {
        parse_value(&self.engine.query("AT+RSSI=?").await?)
    }

    /// Remaining duty-cycle time; only EU868, RU864 and EU433 report one.
    pub async fn duty_time(&self) -> Result<u32> {
        let band = self.band().await?;
        if !band.has_duty_cycle() {
            return Err(Error::InvalidArgument("band has no duty-cycle limit"));
        }
        parse_value(&self.engine.query("AT+DUTYTIME=?").await?)
    }

    pub async fn set_data_rate(&self, data_rate: u8) -> Result<()> {
        if data_rate > MAX_DATA_RATE {
            return Err(Error::InvalidArgument("data rate must be 0..=7"));
        }
        self.engine
            .execute(&format!("AT+DR={}", data_rate))
            .await
            .map(|_| ())
    }

    pub async fn data_rate(&self) -> Result<u8> {
        parse_value(&self.engine.query("AT+DR=?").await?)
    }

    pub async fn set_adr(&self, enable: bool) -> Result<()> {
        self.set_flag("AT+ADR", enable).await
    }

    pub async fn adr(&self) -> Result<bool> {
        parse_flag(&self.engine.query("AT+ADR=?").await?)
    }

    pub async fn set_join_mode(&self, mode: JoinMode) -> Result<()> {
        self.engine
            .execute(&format!("AT+NJM={}", mode as u8))
            .await?;
        self.state().join_mode = Some(mode);
        Ok(())
    }

    pub async fn join_mode(&self) -> Result<JoinMode> {
        let mode = JoinMode::try_from(parse_value::<u8>(&self.engine.query("AT+NJM=?").await?)?)?;
        self.state().join_mode = Some(mode);
        Ok(mode)
    }

    /// Network ID assigned at join.
    pub async fn network_id(&self) -> Result<String> {
        if !self.is_joined() {
            return Err(Error::NotConnected);
        }
        self.engine.query("AT+NETID=?").await
    }

    async fn set_flag(&self, key: &str, enable: bool) -> Result<()> {
        self.engine
            .execute(&format!("{}={}", key, u8::from(enable)))
            .await
            .map(|_| ())
    }
}
