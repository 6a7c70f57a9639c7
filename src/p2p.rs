//! LoRa P2P operations.
//!
//! Covers the encryption toggle, raw sends and single-packet receive. Radio
//! parameters (spreading factor, bandwidth, coding rate) are left to raw
//! commands.
//!
//! A received packet is reported in one of two forms:
//!
//! ```text
//! +EVT:RXP2P, RSSI -45, SNR 9         metadata
//! +EVT:48656C6C6F                     data on the next line
//!
//! +EVT:RXP2P:-45:9:48656C6C6F
//! ```

use crate::at::EVENT_PREFIX;
use crate::device::{Device, Mode};
use crate::encoding::{from_hex, to_hex_lower, to_hex_upper};
use crate::error::{Error, Result};
use crate::lorawan::number_after;
use crate::wait::Deadline;
use log::{debug, error, info, warn};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Longest single receive window in milliseconds; 65535 selects
/// continuous listening.
pub const MAX_RECEIVE_WINDOW_MS: u16 = 65534;

const RX_MARKER: &str = "RXP2P";
const TIMEOUT_MARKER: &str = "RECEIVE TIMEOUT";

/// A received P2P packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pPacket {
    pub payload: Vec<u8>,
    /// RSSI in dBm.
    pub rssi: Option<i16>,
    /// SNR in dB.
    pub snr: Option<i16>,
}

/// Collects the metadata and data lines of a P2P packet.
#[derive(Debug, Default)]
struct P2pParser {
    pending: Option<(Option<i16>, Option<i16>)>,
}

impl P2pParser {
    /// Consume one event line. A module-side receive timeout is `Timeout`.
    fn feed(&mut self, line: &str) -> Result<Option<P2pPacket>> {
        if line.contains(TIMEOUT_MARKER) {
            return Err(Error::Timeout);
        }

        let body = line.strip_prefix(EVENT_PREFIX).unwrap_or(line);

        if let Some((rssi, snr)) = self.pending.take() {
            let payload = from_hex(body.trim())
                .ok_or_else(|| Error::InvalidResponse(format!("bad P2P payload {}", body)))?;
            return Ok(Some(P2pPacket { payload, rssi, snr }));
        }

        if !body.starts_with(RX_MARKER) {
            debug!("Ignoring event while listening: {}", line);
            return Ok(None);
        }

        let rssi = number_after(body, "RSSI");
        let snr = number_after(body, "SNR");
        if rssi.is_some() || snr.is_some() {
            self.pending = Some((rssi, snr));
            return Ok(None);
        }

        // Colon form: RXP2P:<rssi>:<snr>:<hex>
        let mut fields = body.splitn(4, ':').skip(1);
        let rssi = fields.next().and_then(|f| f.trim().parse().ok());
        let snr = fields.next().and_then(|f| f.trim().parse().ok());
        match fields.next() {
            Some(hex) => {
                let payload = from_hex(hex.trim())
                    .ok_or_else(|| Error::InvalidResponse(format!("bad P2P payload {}", hex)))?;
                Ok(Some(P2pPacket { payload, rssi, snr }))
            }
            None => {
                self.pending = Some((rssi, snr));
                Ok(None)
            }
        }
    }
}

/// 128-bit P2P payload encryption key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 16]);

impl EncryptionKey {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

impl FromStr for EncryptionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = from_hex(s.trim()).ok_or(Error::InvalidArgument("key must be 32 hex characters"))?;
        let key = <[u8; 16]>::try_from(bytes.as_slice())
            .map(Self)
            .map_err(|_| Error::InvalidArgument("key must be 32 hex characters"));
        bytes.zeroize();
        key
    }
}

impl Device {
    /// Turn on P2P payload encryption with `key`.
    pub async fn enable_encryption(&self, key: &EncryptionKey) -> Result<()> {
        self.engine.execute("AT+ENCRY=1").await?;

        let mut hex = to_hex_upper(key.as_bytes());
        let result = self.engine.execute(&format!("AT+ENCKEY={}", hex)).await;
        hex.zeroize();
        result?;

        info!("P2P encryption enabled");
        Ok(())
    }

    pub async fn disable_encryption(&self) -> Result<()> {
        self.engine.execute("AT+ENCRY=0").await?;
        info!("P2P encryption disabled");
        Ok(())
    }

    pub async fn is_encryption_enabled(&self) -> Result<bool> {
        Ok(self.engine.query("AT+ENCRY=?").await?.trim() == "1")
    }

    /// Send a raw P2P packet. An empty payload sends nothing.
    pub async fn p2p_transmit(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        if self.mode() == Some(Mode::LoRaWan) {
            return Err(Error::InvalidState("module is in LoRaWAN mode"));
        }

        debug!("P2P send {} bytes", payload.len());
        self.engine
            .execute(&format!("AT+PSEND={}", to_hex_lower(payload)))
            .await
            .map(|_| ())
    }

    /// Listen for one P2P packet for up to `timeout`.
    ///
    /// The window must be 1..=65534 ms. When the module does not report
    /// within the window plus the command timeout, listening is stopped with
    /// `AT+PRECV=0`.
    pub async fn p2p_receive(&self, timeout: Duration) -> Result<P2pPacket> {
        let window = u16::try_from(timeout.as_millis())
            .ok()
            .filter(|ms| (1..=MAX_RECEIVE_WINDOW_MS).contains(ms))
            .ok_or(Error::InvalidArgument("receive window must be 1..=65534 ms"))?;
        if self.mode() == Some(Mode::LoRaWan) {
            return Err(Error::InvalidState("module is in LoRaWAN mode"));
        }

        self.events.drain();
        self.engine
            .execute(&format!("AT+PRECV={}", window))
            .await?;
        debug!("P2P listening for {} ms", window);

        let deadline = Deadline::after(timeout + self.config.command_timeout);
        let mut parser = P2pParser::default();
        loop {
            if let Some(line) = self.next_event(deadline.step(self.config.poll_interval)).await? {
                match parser.feed(line.as_str()) {
                    Ok(Some(packet)) => {
                        info!("P2P packet received: {} bytes", packet.payload.len());
                        return Ok(packet);
                    }
                    Ok(None) => {}
                    Err(Error::Timeout) => {
                        debug!("P2P receive window closed");
                        return Err(Error::Timeout);
                    }
                    Err(e) => return Err(e),
                }
            }

            if deadline.is_expired() {
                error!("P2P receive timeout!");
                if let Err(e) = self.engine.execute("AT+PRECV=0").await {
                    warn!("Failed to stop listening: {}", e);
                }
                self.events.drain();
                return Err(Error::Timeout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use crate::testing::{self, MockModule};

    #[tokio::test]
    async fn test_enable_encryption_sends_full_key() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|_| testing::ok());
        let device = Device::new(host, DriverConfig::default());

        let key: EncryptionKey = "00112233445566778899aabbccddeeff".parse().unwrap();
        device.enable_encryption(&key).await.unwrap();

        assert_eq!(
            log.commands(),
            vec!["AT+ENCRY=1", "AT+ENCKEY=00112233445566778899AABBCCDDEEFF"]
        );
    }

    #[tokio::test]
    async fn test_encryption_toggle_and_query() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|cmd| match cmd {
            "AT+ENCRY=?" => testing::value("AT+ENCRY=0"),
            _ => testing::ok(),
        });
        let device = Device::new(host, DriverConfig::default());

        device.disable_encryption().await.unwrap();
        assert!(!device.is_encryption_enabled().await.unwrap());
        assert_eq!(log.commands(), vec!["AT+ENCRY=0", "AT+ENCRY=?"]);
    }

    #[tokio::test]
    async fn test_enable_encryption_rejected() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|_| vec!["AT_PARAM_ERROR".into()]);
        let device = Device::new(host, DriverConfig::default());

        assert!(matches!(
            device.enable_encryption(&EncryptionKey::new([7; 16])).await,
            Err(Error::InvalidResponse(_))
        ));
        // Key is not sent once the flag command fails.
        assert_eq!(log.commands(), vec!["AT+ENCRY=1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_p2p_transmit() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|_| testing::ok());
        let device = Device::new(host, DriverConfig::default());

        device.p2p_transmit(&[]).await.unwrap();
        assert!(log.is_empty());

        device.set_mode(Mode::P2p).await.unwrap();
        device.p2p_transmit(&[0xAB, 0x01]).await.unwrap();
        assert_eq!(log.commands(), vec!["AT+NWM=0", "AT+PSEND=ab01"]);

        device.set_mode(Mode::LoRaWan).await.unwrap();
        assert!(matches!(
            device.p2p_transmit(&[1]).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_p2p_receive_two_line_form() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|cmd| match cmd {
            "AT+PRECV=3000" => vec![
                "OK".into(),
                "+EVT:RXP2P, RSSI -45, SNR 9".into(),
                "+EVT:48656C6C6F".into(),
            ],
            _ => testing::ok(),
        });
        let device = Device::new(host, DriverConfig::default());

        let packet = device.p2p_receive(Duration::from_secs(3)).await.unwrap();
        assert_eq!(packet.payload, b"Hello");
        assert_eq!(packet.rssi, Some(-45));
        assert_eq!(packet.snr, Some(9));
        assert_eq!(log.commands(), vec!["AT+PRECV=3000"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_p2p_receive_single_line_form() {
        let (module, host) = MockModule::pair();
        let _log = module.serve(|cmd| {
            if cmd.starts_with("AT+PRECV=") {
                vec!["OK".into(), "+EVT:RXP2P:-112:-3:c0ffee".into()]
            } else {
                testing::ok()
            }
        });
        let device = Device::new(host, DriverConfig::default());

        let packet = device.p2p_receive(Duration::from_millis(500)).await.unwrap();
        assert_eq!(packet.payload, vec![0xC0, 0xFF, 0xEE]);
        assert_eq!(packet.rssi, Some(-112));
        assert_eq!(packet.snr, Some(-3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_p2p_receive_module_timeout() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|cmd| {
            if cmd.starts_with("AT+PRECV=") {
                vec!["OK".into(), "+EVT:RXP2P RECEIVE TIMEOUT".into()]
            } else {
                testing::ok()
            }
        });
        let device = Device::new(host, DriverConfig::default());

        assert!(matches!(
            device.p2p_receive(Duration::from_secs(2)).await,
            Err(Error::Timeout)
        ));
        // The module already stopped listening on its own.
        assert_eq!(log.commands(), vec!["AT+PRECV=2000"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_p2p_receive_silence_stops_listening() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|_| testing::ok());
        let device = Device::new(host, DriverConfig::default());

        assert!(matches!(
            device.p2p_receive(Duration::from_secs(2)).await,
            Err(Error::Timeout)
        ));
        assert_eq!(log.commands(), vec!["AT+PRECV=2000", "AT+PRECV=0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_p2p_receive_arguments() {
        let (module, host) = MockModule::pair();
        let log = module.serve(|_| testing::ok());
        let device = Device::new(host, DriverConfig::default());

        for window in [Duration::ZERO, Duration::from_millis(65535), Duration::from_secs(120)] {
            assert!(matches!(
                device.p2p_receive(window).await,
                Err(Error::InvalidArgument(_))
            ));
        }
        assert!(log.is_empty());

        device.set_mode(Mode::LoRaWan).await.unwrap();
        assert!(matches!(
            device.p2p_receive(Duration::from_secs(1)).await,
            Err(Error::InvalidState(_))
        ));
        assert_eq!(log.commands(), vec!["AT+NWM=1"]);
    }

    #[test]
    fn test_parser_ignores_unrelated_events() {
        let mut parser = P2pParser::default();
        assert_eq!(parser.feed("+EVT:TXP2P DONE").unwrap(), None);
        assert_eq!(parser.feed("+EVT:RXP2P, RSSI -70, SNR 5").unwrap(), None);
        let packet = parser.feed("+EVT:0102").unwrap().unwrap();
        assert_eq!(packet.payload, vec![1, 2]);
        assert!(matches!(
            parser.feed("+EVT:RXP2P, RSSI -70, SNR 5").and_then(|_| parser.feed("+EVT:xyz")),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_key_parse_and_debug() {
        let key: EncryptionKey = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        assert_eq!(key.as_bytes()[1], 1);
        assert_eq!(format!("{:?}", key), "EncryptionKey(<redacted>)");
        assert!("0001020304050607".parse::<EncryptionKey>().is_err());
    }
}
