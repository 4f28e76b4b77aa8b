use core::time::Duration;

use auth_core::bridge::DeviceIdentity;
use auth_core::config::{PassthroughConfig, PinId};
use auth_core::engine::{PassthroughEngine, PassthroughState};
use auth_core::exchange::{AuthExchange, AuthReadiness, LocalExchange};
use auth_core::report::NONCE_LEN;
use auth_core::sim::{SimDelay, SimInstant, SimulatedAuthDevice, SimulatedBridge};
use proptest::prelude::*;

type Engine = PassthroughEngine<SimulatedBridge, SimDelay, LocalExchange, SimInstant>;

#[derive(Clone, Debug)]
enum Step {
    Tick(u16),
    PostNonce(u8),
    Acknowledge,
    Attach { accepted: bool, latency: u8 },
    Detach,
    StallChallenge(u8),
    StallSignature(u8),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => (1u16..700).prop_map(Step::Tick),
        2 => any::<u8>().prop_map(Step::PostNonce),
        1 => Just(Step::Acknowledge),
        1 => (any::<bool>(), 0u8..4).prop_map(|(accepted, latency)| Step::Attach { accepted, latency }),
        1 => Just(Step::Detach),
        1 => (0u8..5).prop_map(Step::StallChallenge),
        1 => (0u8..19).prop_map(Step::StallSignature),
    ]
}

fn device_writes(engine: &Engine) -> Option<u32> {
    engine
        .serial()
        .device()
        .map(SimulatedAuthDevice::challenge_writes)
}

proptest! {
    #[test]
    fn rounds_only_restart_for_a_new_nonce_and_only_success_advances(steps in prop::collection::vec(step(), 1..120)) {
        let mut engine: Engine = PassthroughEngine::new(
            PassthroughConfig::new(PinId(0), PinId(1)),
            SimulatedBridge::new(),
            SimDelay::default(),
            LocalExchange::new(),
        );
        let mut now = SimInstant::ZERO;
        let mut posted: Option<u8> = None;
        let mut round_seed: Option<u8> = None;
        engine.setup(now);
        prop_assert_eq!(engine.state(), PassthroughState::Disconnected);

        for step in steps {
            match step {
                Step::Tick(millis) => {
                    let state_before = engine.state();
                    let writes_before = device_writes(&engine);
                    let sequence_before = engine.sequence();
                    let published_before = engine.exchange().published();

                    now = now + Duration::from_millis(u64::from(millis));
                    engine.tick(now);

                    let writes_after = device_writes(&engine);
                    if state_before == PassthroughState::AwaitingSignature
                        && writes_before.is_some()
                        && round_seed == posted
                    {
                        prop_assert_eq!(
                            writes_after,
                            writes_before,
                            "a challenge started while a signature was outstanding"
                        );
                    }
                    if writes_after.is_some() && writes_after != writes_before {
                        round_seed = posted;
                    }

                    let published = engine.exchange().published() - published_before;
                    prop_assert!(published <= 1);
                    prop_assert_eq!(
                        engine.sequence(),
                        sequence_before.wrapping_add(u8::try_from(published).unwrap_or(0)),
                        "sequence advances exactly once per published signature"
                    );
                    prop_assert!(!engine.state().round_in_flight() || engine.device().is_some());
                }
                Step::PostNonce(seed) => {
                    posted = Some(seed);
                    engine.exchange_mut().post_nonce(&[seed; NONCE_LEN]);
                }
                Step::Acknowledge => engine.exchange_mut().acknowledge(),
                Step::Attach { accepted, latency } => {
                    let product = if accepted { 0x05c4 } else { 0x0ba0 };
                    let device = SimulatedAuthDevice::new(DeviceIdentity::new(0x054c, product))
                        .with_signing_latency(latency);
                    engine.serial_mut().attach(device);
                }
                Step::Detach => {
                    engine.serial_mut().detach();
                }
                Step::StallChallenge(index) => {
                    if let Some(device) = engine.serial_mut().device_mut() {
                        device.faults_mut().stall_challenge_chunk = Some(index);
                    }
                }
                Step::StallSignature(after) => {
                    if let Some(device) = engine.serial_mut().device_mut() {
                        device.faults_mut().stall_signature_read = Some(after);
                    }
                }
            }

            if engine.exchange().readiness() == AuthReadiness::SignedNonceReady {
                prop_assert!(engine.exchange().published() > 0);
            }
        }
    }
}
