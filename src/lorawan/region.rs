//! Regional parameters and their wire encodings.
//!
//! Pure helpers: nothing here talks to the module. The session layer uses
//! them to turn typed settings into command arguments and back.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Highest data rate index accepted by `AT+DR`.
pub const MAX_DATA_RATE: u8 = 7;

/// Highest retry count accepted by `AT+RETY`.
pub const MAX_RETRIES: u8 = 7;

/// Power index sent for the lowest supported output power.
pub const MIN_POWER_INDEX: u8 = 10;

/// Frequency plan, numbered as the module numbers them in `AT+BAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Band {
    /// Europe 433 MHz
    Eu433 = 0,
    /// China 470-510 MHz
    Cn470 = 1,
    /// Russia 864-870 MHz
    Ru864 = 2,
    /// India 865-867 MHz
    In865 = 3,
    /// Europe 863-870 MHz
    Eu868 = 4,
    /// US 902-928 MHz
    Us915 = 5,
    /// Australia 915-928 MHz
    Au915 = 6,
    /// Korea 920-923 MHz
    Kr920 = 7,
    /// Asia 920-923 MHz
    As923 = 8,
}

impl Band {
    pub const ALL: [Band; 9] = [
        Band::Eu433,
        Band::Cn470,
        Band::Ru864,
        Band::In865,
        Band::Eu868,
        Band::Us915,
        Band::Au915,
        Band::Kr920,
        Band::As923,
    ];

    /// Whether the plan is split into selectable sub-bands.
    pub fn has_sub_bands(self) -> bool {
        matches!(self, Band::Us915 | Band::Au915 | Band::Cn470)
    }

    /// Number of 8-channel sub-bands in the plan.
    pub fn sub_band_count(self) -> u8 {
        match self {
            Band::Cn470 => 12,
            Band::Us915 | Band::Au915 => 9,
            _ => 0,
        }
    }

    /// Whether the module reports duty-cycle time for this plan.
    pub fn has_duty_cycle(self) -> bool {
        matches!(self, Band::Eu868 | Band::Ru864 | Band::Eu433)
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::Eu433 => "EU433",
            Band::Cn470 => "CN470",
            Band::Ru864 => "RU864",
            Band::In865 => "IN865",
            Band::Eu868 => "EU868",
            Band::Us915 => "US915",
            Band::Au915 => "AU915",
            Band::Kr920 => "KR920",
            Band::As923 => "AS923",
        }
    }
}

impl Default for Band {
    fn default() -> Self {
        #[cfg(feature = "region-us915")]
        return Self::Us915;
        #[cfg(feature = "region-au915")]
        return Self::Au915;
        #[cfg(feature = "region-as923")]
        return Self::As923;
        #[cfg(not(any(
            feature = "region-us915",
            feature = "region-au915",
            feature = "region-as923"
        )))]
        Self::Eu868
    }
}

impl TryFrom<u8> for Band {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Band::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| Error::InvalidResponse(format!("unknown band {}", value)))
    }
}

impl FromStr for Band {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Band::ALL
            .iter()
            .copied()
            .find(|b| b.name().eq_ignore_ascii_case(s.trim()))
            .ok_or(Error::InvalidArgument("unknown band name"))
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel group selection for US915, AU915 and CN470.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubBand {
    /// Leave the channel mask alone.
    None,
    /// Enable every channel.
    All,
    /// Enable one 8-channel group, numbered from 1.
    Channels(u8),
}

impl SubBand {
    /// Single sub-band `n` (1..=12).
    pub fn channels(n: u8) -> Result<Self> {
        if (1..=12).contains(&n) {
            Ok(SubBand::Channels(n))
        } else {
            Err(Error::InvalidArgument("sub-band must be 1..=12"))
        }
    }
}

impl FromStr for SubBand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "none" | "NONE" => Ok(SubBand::None),
            "all" | "ALL" => Ok(SubBand::All),
            n => SubBand::channels(
                n.parse()
                    .map_err(|_| Error::InvalidArgument("sub-band must be a number"))?,
            ),
        }
    }
}

/// Channel mask text for `AT+MASK`.
///
/// Returns `None` for [`SubBand::None`] on any band, meaning no command is
/// needed. Other values fail on bands without sub-bands.
pub fn sub_band_mask(band: Band, sub_band: SubBand) -> Result<Option<String>> {
    if sub_band == SubBand::None {
        return Ok(None);
    }
    if !band.has_sub_bands() {
        return Err(Error::Fail);
    }

    match sub_band {
        SubBand::None => Ok(None),
        SubBand::All => Ok(Some("0000".to_string())),
        SubBand::Channels(n) => {
            if n == 0 || n > band.sub_band_count() {
                return Err(Error::InvalidArgument("sub-band not available in this band"));
            }
            Ok(Some(format!("{:04X}", 1u16 << (n - 1))))
        }
    }
}

/// Recover the sub-band from the mask text returned by `AT+MASK=?`.
///
/// Bands without sub-bands report [`SubBand::None`].
pub fn sub_band_from_mask(band: Band, mask: &str) -> Result<SubBand> {
    if !band.has_sub_bands() {
        return Ok(SubBand::None);
    }

    let bits = u16::from_str_radix(mask.trim(), 16)
        .map_err(|_| Error::InvalidResponse(format!("bad channel mask {}", mask)))?;
    if bits == 0 {
        return Ok(SubBand::All);
    }
    if bits.count_ones() != 1 {
        return Err(Error::InvalidResponse(format!(
            "channel mask {} selects more than one sub-band",
            mask
        )));
    }

    let n = bits.trailing_zeros() as u8 + 1;
    if n > band.sub_band_count() {
        return Err(Error::InvalidResponse(format!("channel mask {} out of range", mask)));
    }
    Ok(SubBand::Channels(n))
}

/// `AT+TXP` index for a requested output power.
///
/// Index 0 is the regional maximum and every step lowers power by 2 dB.
/// Returns `None` for plans without a known table.
pub fn tx_power_index(band: Band, dbm: u8) -> Option<u8> {
    // EU868 is limited to +16 dBm EIRP, US915 to +30 dBm conducted.
    let (max, min) = match band {
        Band::Eu868 => (16, 2),
        Band::Us915 => (30, 10),
        _ => return None,
    };

    Some(if dbm >= max {
        0
    } else if dbm < min {
        MIN_POWER_INDEX
    } else {
        (max - dbm) / 2
    })
}

/// LoRaWAN device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceClass {
    #[default]
    A,
    B,
    C,
}

impl DeviceClass {
    pub fn as_char(self) -> char {
        match self {
            DeviceClass::A => 'A',
            DeviceClass::B => 'B',
            DeviceClass::C => 'C',
        }
    }
}

impl TryFrom<char> for DeviceClass {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        match c {
            'A' => Ok(DeviceClass::A),
            'B' => Ok(DeviceClass::B),
            'C' => Ok(DeviceClass::C),
            _ => Err(Error::InvalidArgument("device class must be A, B or C")),
        }
    }
}

impl FromStr for DeviceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => DeviceClass::try_from(c),
            _ => Err(Error::InvalidArgument("device class must be A, B or C")),
        }
    }
}

/// Network activation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JoinMode {
    /// Activation by personalization: session keys provisioned up front.
    Abp = 0,
    /// Over-the-air activation: join request with DevEUI/AppEUI/AppKey.
    Otaa = 1,
}

impl TryFrom<u8> for JoinMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(JoinMode::Abp),
            1 => Ok(JoinMode::Otaa),
            _ => Err(Error::InvalidResponse(format!("unknown join mode {}", value))),
        }
    }
}
