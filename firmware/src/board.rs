//! Pin assignment and tuning for the STM32G0 carrier board.

use core::time::Duration;

use auth_core::config::{PassthroughConfig, PinId};

/// USART5 TX, routed to the bridge's RXD (PB0).
pub const BRIDGE_TX: PinId = PinId(0);
/// USART5 RX, routed to the bridge's TXD (PB1).
pub const BRIDGE_RX: PinId = PinId(1);

/// Passthrough settings flashed into this board.
pub const PASSTHROUGH: PassthroughConfig =
    PassthroughConfig::new(BRIDGE_TX, BRIDGE_RX).with_probe_seed(0x6d2b_79f5);

/// Upper bound between scheduler ticks when no nonce wakes the loop early.
pub const TICK_PERIOD: Duration = Duration::from_millis(5);

#[cfg(test)]
mod tests {
    use super::*;
    use auth_core::config::DEFAULT_AUTH_DEVICE;

    #[test]
    fn board_enables_the_passthrough() {
        assert!(PASSTHROUGH.available());
        assert!(PASSTHROUGH.accepts(DEFAULT_AUTH_DEVICE));
        assert!(TICK_PERIOD < PASSTHROUGH.connection_check_interval);
    }
}
