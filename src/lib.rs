//! Async driver for the RAK3172 LoRaWAN module.
//!
//! The module is driven over a UART with text AT commands. This library
//! contains the transport-independent driver: any `AsyncRead + AsyncWrite`
//! byte stream works, so everything can be tested on the host against a
//! scripted module.
//!
//! - [`at`]: line splitting, the background line receiver and the
//!   single-flight command engine
//! - [`device`]: the [`Device`] handle, work mode and reset
//! - [`lorawan`]: regional helpers, keys and the LoRaWAN session
//! - [`p2p`]: P2P encryption and raw sends

pub mod at;
pub mod config;
pub mod device;
pub mod encoding;
pub mod error;
pub mod lorawan;
pub mod p2p;
pub mod wait;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use config::DriverConfig;
pub use device::{Device, Mode};
pub use error::{Error, Result};
pub use lorawan::{
    Activation, AppKey, AppSKey, Band, DevAddr, DeviceClass, Downlink, Eui64, JoinMode,
    JoinOptions, LoRaWanConfig, NwkSKey, SubBand,
};
pub use p2p::{EncryptionKey, P2pPacket};
pub use wait::{Deadline, WaitHook};
