//! LoRaWAN identities and key material.
//!
//! Keys are zeroed on drop and never printed by `Debug`.

use super::region::JoinMode;
use crate::encoding::{from_hex, to_hex_upper};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

fn parse_fixed<const N: usize>(text: &str, what: &'static str) -> Result<[u8; N]> {
    let mut bytes = from_hex(text.trim()).ok_or(Error::InvalidArgument(what))?;
    let out = <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| Error::InvalidArgument(what));
    bytes.zeroize();
    out
}

/// 64-bit extended unique identifier (DevEUI, AppEUI/JoinEUI).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub fn to_hex(&self) -> String {
        to_hex_upper(&self.0)
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eui64({})", self.to_hex())
    }
}

impl FromStr for Eui64 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_fixed(s, "EUI must be 16 hex characters").map(Eui64)
    }
}

/// 32-bit device address used with ABP.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevAddr(pub [u8; 4]);

impl DevAddr {
    pub fn to_hex(&self) -> String {
        to_hex_upper(&self.0)
    }
}

impl fmt::Debug for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevAddr({})", self.to_hex())
    }
}

impl FromStr for DevAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_fixed(s, "device address must be 8 hex characters").map(DevAddr)
    }
}

macro_rules! aes_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
        pub struct $name([u8; 16]);

        impl $name {
            pub fn new(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Uppercase hex as the module expects it.
            pub(crate) fn to_hex(&self) -> String {
                to_hex_upper(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(<redacted>)"))
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                parse_fixed(s, "key must be 32 hex characters").map(Self)
            }
        }
    };
}

aes_key!(
    /// OTAA root key.
    AppKey
);
aes_key!(
    /// ABP application session key.
    AppSKey
);
aes_key!(
    /// ABP network session key.
    NwkSKey
);

/// Key material for one activation method.
#[derive(Debug, Clone)]
pub enum Activation {
    Otaa {
        dev_eui: Eui64,
        app_eui: Eui64,
        app_key: AppKey,
    },
    Abp {
        app_skey: AppSKey,
        nwk_skey: NwkSKey,
        dev_addr: DevAddr,
    },
}

impl Activation {
    pub fn join_mode(&self) -> JoinMode {
        match self {
            Activation::Otaa { .. } => JoinMode::Otaa,
            Activation::Abp { .. } => JoinMode::Abp,
        }
    }
}
