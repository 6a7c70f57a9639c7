//! LoRaWAN node talking to a RAK3172 on a serial port.
//!
//! Joins with OTAA, then sends a confirmed uplink every 10 seconds and
//! listens for a downlink after each one.
//!
//! # Usage
//!
//! ```bash
//! RAK3172_PORT=/dev/ttyUSB0 \
//! LORAWAN_DEVEUI=70B3D57ED0000001 LORAWAN_APPEUI=0000000000000000 \
//! LORAWAN_APPKEY=000102030405060708090A0B0C0D0E0F \
//! cargo run --bin lorawan-node --features serial
//! ```
//!
//! Optional: `RAK3172_BAUD` (default 115200), `LORAWAN_BAND` (e.g. `US915`),
//! `LORAWAN_SUBBAND` (`all` or 1..=12).

use log::{error, info, warn};
use rak3172::{
    Activation, AppKey, Band, Device, DriverConfig, Eui64, JoinOptions, LoRaWanConfig, SubBand,
};
use std::str::FromStr;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;

const DEFAULT_BAUD: u32 = 115_200;
const UPLINK_PORT: u8 = 1;
const UPLINK_INTERVAL: Duration = Duration::from_secs(10);
const TX_TIMEOUT: Duration = Duration::from_secs(15);
const RX_TIMEOUT: Duration = Duration::from_secs(3);

/// Print error message and exit.
fn halt_with_error(msg: &str) -> ! {
    error!("{}", msg);
    std::process::exit(1);
}

fn required<T: FromStr>(name: &str) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .unwrap_or_else(|e| halt_with_error(&format!("Invalid {}: {}", name, e))),
        Err(_) => halt_with_error(&format!("{} environment variable not set", name)),
    }
}

fn optional<T: FromStr>(name: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .unwrap_or_else(|e| halt_with_error(&format!("Invalid {}: {}", name, e))),
        _ => default,
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== RAK3172 LoRaWAN node starting ===");

    let port: String = required("RAK3172_PORT");
    let baud: u32 = optional("RAK3172_BAUD", DEFAULT_BAUD);

    let activation = Activation::Otaa {
        dev_eui: required::<Eui64>("LORAWAN_DEVEUI"),
        app_eui: required::<Eui64>("LORAWAN_APPEUI"),
        app_key: required::<AppKey>("LORAWAN_APPKEY"),
    };
    let band: Band = optional("LORAWAN_BAND", Band::default());
    let sub_band: SubBand = optional("LORAWAN_SUBBAND", SubBand::None);

    let serial = match tokio_serial::new(&port, baud).open_native_async() {
        Ok(serial) => serial,
        Err(e) => halt_with_error(&format!("Failed to open {}: {}", port, e)),
    };
    info!("Opened {} at {} baud", port, baud);

    let device = Device::new(serial, DriverConfig::default());

    let config = LoRaWanConfig::new(activation).with_band(band, sub_band);
    if let Err(e) = device.init_lorawan(&config).await {
        halt_with_error(&format!("LoRaWAN initialization failed: {}", e));
    }

    tokio::select! {
        _ = run(&device) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
    }

    device.deinit().await;
}

async fn run(device: &Device) {
    if let Err(e) = device.start_join(JoinOptions::default(), None).await {
        error!("Join failed: {}", e);
        return;
    }

    let mut counter: u32 = 0;
    loop {
        counter = counter.wrapping_add(1);
        match device
            .transmit(UPLINK_PORT, &counter.to_be_bytes(), true, TX_TIMEOUT, None)
            .await
        {
            Ok(()) => info!("Uplink #{} sent", counter),
            Err(e) => warn!("Uplink #{} failed: {}", counter, e),
        }

        match device.receive(RX_TIMEOUT).await {
            Ok(downlink) => info!(
                "Downlink on port {:?}: {:02X?} (RSSI {:?}, SNR {:?})",
                downlink.port, downlink.payload, downlink.rssi, downlink.snr
            ),
            Err(rak3172::Error::Timeout) => info!("No downlink"),
            Err(e) => warn!("Receive failed: {}", e),
        }

        tokio::time::sleep(UPLINK_INTERVAL).await;
    }
}
