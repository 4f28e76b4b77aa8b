//! Board-level wrapper that ticks the engine and mirrors its telemetry.

use auth_core::addon::Addon;
use auth_core::bridge::BridgeDelay;
use auth_core::config::PassthroughConfig;
use auth_core::engine::PassthroughEngine;
use auth_core::exchange::AuthExchange;
use auth_core::link::SerialLink;

use crate::telemetry::TelemetryMirror;
use crate::time::FirmwareInstant;

pub struct LoggedPassthrough<S, D, X>
where
    S: SerialLink,
    D: BridgeDelay,
    X: AuthExchange,
{
    engine: PassthroughEngine<S, D, X, FirmwareInstant>,
    mirror: TelemetryMirror,
}

impl<S, D, X> LoggedPassthrough<S, D, X>
where
    S: SerialLink,
    D: BridgeDelay,
    X: AuthExchange,
{
    pub fn new(config: PassthroughConfig, serial: S, delay: D, exchange: X) -> Self {
        Self {
            engine: PassthroughEngine::new(config, serial, delay, exchange),
            mirror: TelemetryMirror::new(),
        }
    }

    pub fn engine(&self) -> &PassthroughEngine<S, D, X, FirmwareInstant> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PassthroughEngine<S, D, X, FirmwareInstant> {
        &mut self.engine
    }

    pub fn mirror(&self) -> &TelemetryMirror {
        &self.mirror
    }
}

impl<S, D, X> Addon for LoggedPassthrough<S, D, X>
where
    S: SerialLink,
    D: BridgeDelay,
    X: AuthExchange,
{
    type Instant = FirmwareInstant;

    fn name(&self) -> &'static str {
        Addon::name(&self.engine)
    }

    fn available(&self) -> bool {
        self.engine.available()
    }

    fn setup(&mut self, now: FirmwareInstant) {
        self.engine.setup(now);
        self.mirror.drain(self.engine.telemetry());
    }

    fn tick(&mut self, now: FirmwareInstant) {
        self.engine.tick(now);
        self.mirror.drain(self.engine.telemetry());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board;
    use crate::exchange::SharedExchange;
    use auth_core::addon::AddonRegistry;
    use auth_core::config::DEFAULT_AUTH_DEVICE;
    use auth_core::engine::PassthroughState;
    use auth_core::report::NONCE_LEN;
    use auth_core::sim::{SimDelay, SimulatedAuthDevice, SimulatedBridge, expected_signature};

    #[test]
    fn board_passthrough_signs_a_posted_nonce() {
        let shared = SharedExchange::new();
        let mut bridge = SimulatedBridge::new();
        bridge.attach(SimulatedAuthDevice::new(DEFAULT_AUTH_DEVICE));
        let mut passthrough =
            LoggedPassthrough::new(board::PASSTHROUGH, bridge, SimDelay::default(), &shared);

        let nonce = [0x3c; NONCE_LEN];
        {
            let mut registry: AddonRegistry<'_, FirmwareInstant> = AddonRegistry::new();
            registry.register(&mut passthrough).unwrap();
            registry.setup_all(FirmwareInstant::from_micros(0));
            registry.tick_all(FirmwareInstant::from_micros(5_000));
            assert!(registry.active().eq(["ps4-auth-passthrough"]));

            shared.post_nonce(&nonce);
            let mut micros = 5_000;
            while shared.signature().is_none() && micros < 1_000_000 {
                micros += 5_000;
                registry.tick_all(FirmwareInstant::from_micros(micros));
            }
        }

        assert_eq!(shared.signature(), Some(expected_signature(&nonce, 1)));
        assert_eq!(passthrough.engine().state(), PassthroughState::ReadyIdle);
        assert_eq!(passthrough.mirror().dropped(), 0);
    }

    #[test]
    fn mirror_keeps_pace_with_the_engine() {
        let shared = SharedExchange::new();
        let mut passthrough = LoggedPassthrough::new(
            board::PASSTHROUGH,
            SimulatedBridge::new(),
            SimDelay::default(),
            &shared,
        );
        Addon::setup(&mut passthrough, FirmwareInstant::from_micros(0));
        passthrough
            .engine_mut()
            .serial_mut()
            .attach(SimulatedAuthDevice::new(DEFAULT_AUTH_DEVICE));
        Addon::tick(&mut passthrough, FirmwareInstant::from_micros(600_000));

        assert!(passthrough.engine().device().is_some());
        assert_eq!(passthrough.mirror().dropped(), 0);
    }
}
