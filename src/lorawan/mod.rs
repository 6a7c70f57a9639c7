//! LoRaWAN end-device support.
//!
//! This module contains:
//! - [`region`]: Bands, sub-band masks, power indices and device classes
//! - [`keys`]: EUIs, device address and zeroizing AES keys
//! - [`downlink`]: Parsing of downlink event lines
//! - session operations on [`Device`](crate::Device): init, join, transmit,
//!   receive and the per-setting accessors

mod downlink;
mod keys;
mod region;
mod session;

pub use downlink::Downlink;
pub(crate) use downlink::number_after;
pub use keys::{Activation, AppKey, AppSKey, DevAddr, Eui64, NwkSKey};
pub use region::{
    sub_band_from_mask, sub_band_mask, tx_power_index, Band, DeviceClass, JoinMode, SubBand,
    MAX_DATA_RATE, MAX_RETRIES, MIN_POWER_INDEX,
};
pub use session::{JoinOptions, LoRaWanConfig, MAX_PAYLOAD_LEN};
