//! Downlink event parsing.
//!
//! A downlink shows up as one or more `+EVT:` lines. Depending on firmware:
//!
//! ```text
//! +EVT:RX_1, RSSI -60, SNR 7          metadata
//! +EVT:UNICAST:48656C6C6F             data (port not reported)
//!
//! +EVT:RX_1, RSSI -60, SNR 7
//! +EVT:UNICAST                        data follows on the next line
//! +EVT:2:48656C6C6F
//!
//! +EVT:RX_1:-60:7:UNICAST:2:48656C6C6F
//! ```

use crate::at::EVENT_PREFIX;
use crate::encoding::from_hex;
use crate::error::{Error, Result};
use log::debug;

const RX_MARKER: &str = "RX";
const UNICAST_MARKER: &str = "UNICAST";

/// A received downlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    /// Application port, when the firmware reports it.
    pub port: Option<u8>,
    /// Decoded payload bytes.
    pub payload: Vec<u8>,
    /// RSSI of the downlink in dBm.
    pub rssi: Option<i16>,
    /// SNR of the downlink in dB.
    pub snr: Option<i16>,
}

/// Collects metadata and data lines into a [`Downlink`].
#[derive(Debug, Default)]
pub(crate) struct DownlinkParser {
    rssi: Option<i16>,
    snr: Option<i16>,
    data_follows: bool,
}

impl DownlinkParser {
    /// Consume one event line; returns the downlink once its data arrived.
    ///
    /// Lines that are neither metadata nor data are ignored.
    pub(crate) fn feed(&mut self, line: &str) -> Result<Option<Downlink>> {
        if let Some(at) = line.find(UNICAST_MARKER) {
            let head = &line[..at];
            if head.contains(RX_MARKER) {
                self.read_metadata(head);
            }

            let tail = line[at + UNICAST_MARKER.len()..].trim_start_matches(':');
            if tail.is_empty() {
                self.data_follows = true;
                return Ok(None);
            }
            return self.finish(tail).map(Some);
        }

        if line.contains(RX_MARKER) {
            self.read_metadata(line);
            return Ok(None);
        }

        if self.data_follows {
            if let Some(body) = line.strip_prefix(EVENT_PREFIX) {
                if let Some((port, _)) = body.split_once(':') {
                    if port.parse::<u8>().is_ok() {
                        return self.finish(body).map(Some);
                    }
                }
            }
        }

        debug!("Ignoring event while waiting for downlink: {}", line);
        Ok(None)
    }

    /// Pick RSSI and SNR out of a metadata line.
    fn read_metadata(&mut self, line: &str) {
        let rssi = number_after(line, "RSSI");
        let snr = number_after(line, "SNR");
        if rssi.is_some() || snr.is_some() {
            self.rssi = rssi;
            self.snr = snr;
            return;
        }

        // Colon form: +EVT:RX_1:<rssi>:<snr>:...
        let body = line.strip_prefix(EVENT_PREFIX).unwrap_or(line);
        let mut fields = body.split(':').skip(1);
        self.rssi = fields.next().and_then(|f| f.trim().parse().ok());
        self.snr = fields.next().and_then(|f| f.trim().parse().ok());
    }

    /// Build the downlink from `[<port>:]<hex>`.
    fn finish(&mut self, data: &str) -> Result<Downlink> {
        let (port, hex) = match data.rsplit_once(':') {
            Some((port, hex)) => (port.trim().parse::<u8>().ok(), hex),
            None => (None, data),
        };

        let payload = from_hex(hex.trim())
            .ok_or_else(|| Error::InvalidResponse(format!("bad downlink payload {}", hex)))?;

        let downlink = Downlink {
            port,
            payload,
            rssi: self.rssi.take(),
            snr: self.snr.take(),
        };
        self.data_follows = false;
        Ok(downlink)
    }
}

/// Signed integer following `key`, skipping separators.
pub(crate) fn number_after(line: &str, key: &str) -> Option<i16> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start_matches([' ', ':', '=']);
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(rest.len(), |(i, _)| i);
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(lines: &[&str]) -> Option<Downlink> {
        let mut parser = DownlinkParser::default();
        let mut result = None;
        for line in lines {
            if let Some(downlink) = parser.feed(line).unwrap() {
                result = Some(downlink);
            }
        }
        result
    }

    #[test]
    fn test_metadata_then_unicast() {
        let downlink = feed_all(&["+EVT:RX_1, RSSI -60, SNR 7", "+EVT:UNICAST:48656C6C6F"]).unwrap();
        assert_eq!(downlink.payload, b"Hello");
        assert_eq!(downlink.rssi, Some(-60));
        assert_eq!(downlink.snr, Some(7));
        assert_eq!(downlink.port, None);
    }

    #[test]
    fn test_metadata_with_extra_fields() {
        let downlink =
            feed_all(&["+EVT:RX:-42,10,RSSI -60,SNR 7", "+EVT:UNICAST:48656C6C6F"]).unwrap();
        assert_eq!(downlink.payload, b"Hello");
        assert_eq!(downlink.rssi, Some(-60));
        assert_eq!(downlink.snr, Some(7));
    }

    #[test]
    fn test_data_on_following_line() {
        let downlink = feed_all(&[
            "+EVT:RX_2, RSSI -101, SNR -3",
            "+EVT:UNICAST",
            "+EVT:2:0102ff",
        ])
        .unwrap();
        assert_eq!(downlink.port, Some(2));
        assert_eq!(downlink.payload, vec![0x01, 0x02, 0xFF]);
        assert_eq!(downlink.rssi, Some(-101));
        assert_eq!(downlink.snr, Some(-3));
    }

    #[test]
    fn test_single_line_form() {
        let downlink = feed_all(&["+EVT:RX_1:-70:8:UNICAST:1:48656C6C6F"]).unwrap();
        assert_eq!(downlink.port, Some(1));
        assert_eq!(downlink.payload, b"Hello");
        assert_eq!(downlink.rssi, Some(-70));
        assert_eq!(downlink.snr, Some(8));
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        let mut parser = DownlinkParser::default();
        assert!(parser.feed("+EVT:JOINED").unwrap().is_none());
        assert!(parser.feed("+EVT:SEND CONFIRMED OK").unwrap().is_none());
        // Port-shaped line without a preceding UNICAST marker is not data.
        assert!(parser.feed("+EVT:2:0102").unwrap().is_none());
    }

    #[test]
    fn test_bad_payload() {
        let mut parser = DownlinkParser::default();
        assert!(matches!(
            parser.feed("+EVT:UNICAST:4865Z"),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_number_after() {
        assert_eq!(number_after("RSSI -60, SNR 7", "RSSI"), Some(-60));
        assert_eq!(number_after("RSSI -60, SNR 7", "SNR"), Some(7));
        assert_eq!(number_after("SNR:12", "SNR"), Some(12));
        assert_eq!(number_after("RSSI n/a", "RSSI"), None);
        assert_eq!(number_after("nothing", "RSSI"), None);
    }
}
