//! Compile-time provisioning for the LoRaWAN link.

use core::time::Duration;

use crate::payload::device_id_from_eui;

/// LoRaWAN data rate index.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataRate {
    Dr0,
    Dr1,
    Dr2,
    Dr3,
    Dr4,
    Dr5,
}

impl DataRate {
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            DataRate::Dr0 => 0,
            DataRate::Dr1 => 1,
            DataRate::Dr2 => 2,
            DataRate::Dr3 => 3,
            DataRate::Dr4 => 4,
            DataRate::Dr5 => 5,
        }
    }
}

/// Device identity, keys and regional defaults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RadioConfig {
    pub dev_eui: [u8; 8],
    pub app_eui: [u8; 8],
    pub app_key: [u8; 16],
    pub tx_port: u8,
    pub rx_port: u8,
    pub data_rate: DataRate,
    pub tx_power_dbm: u8,
    pub adaptive_data_rate: bool,
    pub duty_cycle: bool,
    /// Request network acknowledgements so completions report
    /// [`TxResult::SentAndAcknowledged`](crate::events::TxResult::SentAndAcknowledged).
    pub confirmed_uplinks: bool,
}

impl RadioConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dev_eui: [0x38, 0xb8, 0xeb, 0xe0, 0x00, 0x00, 0x00, 0xaa],
            app_eui: [0xef, 0xcd, 0xab, 0x89, 0x67, 0x45, 0x23, 0x01],
            app_key: [
                0xff, 0xee, 0xdd, 0xcc, 0xbb, 0xaa, 0x99, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22,
                0x11, 0x00,
            ],
            tx_port: 3,
            rx_port: 3,
            data_rate: DataRate::Dr0,
            tx_power_dbm: 14,
            adaptive_data_rate: false,
            duty_cycle: false,
            confirmed_uplinks: true,
        }
    }

    /// 16-bit identifier carried in every uplink.
    #[must_use]
    pub const fn device_id(&self) -> u16 {
        device_id_from_eui(&self.dev_eui)
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Endpoints and waits used by the transport bridge task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BridgeConfig {
    /// Open a transmit endpoint and accept transmit requests.
    pub transmit: bool,
    /// Open a receive endpoint and poll for downlinks.
    pub receive: bool,
    pub tx_port: u8,
    pub rx_port: u8,
    /// How long to listen after each uplink; covers the RX1/RX2 delays.
    pub receive_window: Duration,
    /// Sleep between loop iterations when no endpoint is open.
    pub idle_interval: Duration,
}

impl BridgeConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            transmit: true,
            receive: true,
            tx_port: 3,
            rx_port: 3,
            receive_window: Duration::from_secs(9),
            idle_interval: Duration::from_mins(1),
        }
    }

    /// Bridge defaults using the ports provisioned in `radio`.
    #[must_use]
    pub const fn for_radio(radio: &RadioConfig) -> Self {
        let mut config = Self::new();
        config.tx_port = radio.tx_port;
        config.rx_port = radio.rx_port;
        config
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_identity_maps_to_device_id() {
        let config = RadioConfig::default();
        assert_eq!(config.device_id(), 0x00aa);
        assert_eq!(config.tx_port, 3);
        assert!(config.confirmed_uplinks);
    }

    #[test]
    fn bridge_config_follows_radio_ports() {
        let mut radio = RadioConfig::new();
        radio.tx_port = 10;
        radio.rx_port = 11;
        let bridge = BridgeConfig::for_radio(&radio);
        assert_eq!((bridge.tx_port, bridge.rx_port), (10, 11));
        assert_eq!(bridge.receive_window, Duration::from_secs(9));
    }
}
