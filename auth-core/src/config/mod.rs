//! Board and link configuration consumed by the passthrough addon.

use core::time::Duration;

use crate::bridge::{DEFAULT_BAUD_RATE, DeviceIdentity};

/// Highest GPIO number a board may route to the bridge UART.
pub const MAX_GPIO_PIN: u8 = 29;

/// Vendor id of the accepted authentication device.
pub const AUTH_DEVICE_VENDOR_ID: u16 = 0x054c;

/// Product id of the accepted authentication device.
pub const AUTH_DEVICE_PRODUCT_ID: u16 = 0x05c4;

/// Device accepted by default during enumeration.
pub const DEFAULT_AUTH_DEVICE: DeviceIdentity =
    DeviceIdentity::new(AUTH_DEVICE_VENDOR_ID, AUTH_DEVICE_PRODUCT_ID);

/// Interval between connectivity polls.
pub const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// GPIO identifier supplied by the board configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinId(pub u8);

impl PinId {
    /// Returns `true` when the pin exists on the board.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 <= MAX_GPIO_PIN
    }
}

/// Settings for one passthrough instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PassthroughConfig {
    pub enabled: bool,
    pub tx_pin: Option<PinId>,
    pub rx_pin: Option<PinId>,
    /// Link rate; only [`DEFAULT_BAUD_RATE`] is validated against hardware.
    pub baud_rate: u32,
    pub accepted_device: DeviceIdentity,
    pub connection_check_interval: Duration,
    /// Seed for the existence-probe byte generator.
    pub probe_seed: u32,
}

impl PassthroughConfig {
    /// Enabled configuration on the given pins with default settings.
    #[must_use]
    pub const fn new(tx_pin: PinId, rx_pin: PinId) -> Self {
        Self {
            enabled: true,
            tx_pin: Some(tx_pin),
            rx_pin: Some(rx_pin),
            ..Self::disabled()
        }
    }

    /// Configuration that never reports the addon as available.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            tx_pin: None,
            rx_pin: None,
            baud_rate: DEFAULT_BAUD_RATE,
            accepted_device: DEFAULT_AUTH_DEVICE,
            connection_check_interval: CONNECTION_CHECK_INTERVAL,
            probe_seed: 0x2545_f491,
        }
    }

    /// Overrides the accepted device identity.
    #[must_use]
    pub const fn with_accepted_device(mut self, identity: DeviceIdentity) -> Self {
        self.accepted_device = identity;
        self
    }

    /// Overrides the probe seed.
    #[must_use]
    pub const fn with_probe_seed(mut self, seed: u32) -> Self {
        self.probe_seed = seed;
        self
    }

    /// Returns `true` when the addon is enabled and both pins are valid.
    #[must_use]
    pub const fn available(&self) -> bool {
        if !self.enabled {
            return false;
        }
        match (self.tx_pin, self.rx_pin) {
            (Some(tx), Some(rx)) => tx.is_valid() && rx.is_valid(),
            _ => false,
        }
    }

    /// Returns `true` when `identity` is the accepted authentication device.
    #[must_use]
    pub fn accepts(&self, identity: DeviceIdentity) -> bool {
        identity == self.accepted_device
    }
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_requires_enable_flag_and_valid_pins() {
        assert!(PassthroughConfig::new(PinId(0), PinId(1)).available());
        assert!(!PassthroughConfig::disabled().available());

        let mut config = PassthroughConfig::new(PinId(0), PinId(1));
        config.enabled = false;
        assert!(!config.available());

        let config = PassthroughConfig::new(PinId(0), PinId(MAX_GPIO_PIN + 1));
        assert!(!config.available());

        let mut config = PassthroughConfig::new(PinId(4), PinId(5));
        config.rx_pin = None;
        assert!(!config.available());
    }

    #[test]
    fn only_the_configured_identity_is_accepted() {
        let config = PassthroughConfig::new(PinId(0), PinId(1));
        assert!(config.accepts(DeviceIdentity::new(0x054c, 0x05c4)));
        assert!(!config.accepts(DeviceIdentity::new(0x054c, 0x0ba0)));
        assert!(!config.accepts(DeviceIdentity::new(0x1234, 0x05c4)));

        let config = config.with_accepted_device(DeviceIdentity::new(0x054c, 0x09cc));
        assert!(config.accepts(DeviceIdentity::new(0x054c, 0x09cc)));
        assert!(!config.accepts(DEFAULT_AUTH_DEVICE));
    }
}
