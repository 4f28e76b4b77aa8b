//! Uniform lifecycle for optional board features.
//!
//! The scheduler registers every addon once, calls [`AddonRegistry::setup_all`]
//! at boot, then [`AddonRegistry::tick_all`] from its main loop. Addons that
//! report themselves unavailable are never set up or ticked.

use heapless::Vec;

use crate::bridge::BridgeDelay;
use crate::engine::PassthroughEngine;
use crate::exchange::AuthExchange;
use crate::link::SerialLink;
use crate::telemetry::TelemetryInstant;

/// Default registry capacity.
pub const MAX_ADDONS: usize = 8;

/// Feature driven by the scheduler loop.
pub trait Addon {
    /// Monotonic time source passed to every call.
    type Instant: Copy;

    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Returns `true` when the board configuration enables this addon.
    fn available(&self) -> bool;

    /// One-time initialisation.
    fn setup(&mut self, now: Self::Instant);

    /// Periodic non-blocking work.
    fn tick(&mut self, now: Self::Instant);
}

/// Returned when the registry has no free slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegistryFull;

struct AddonSlot<'a, TInstant> {
    addon: &'a mut dyn Addon<Instant = TInstant>,
    active: bool,
}

/// Ordered, fixed-capacity set of addons.
pub struct AddonRegistry<'a, TInstant, const N: usize = MAX_ADDONS> {
    slots: Vec<AddonSlot<'a, TInstant>, N>,
}

impl<'a, TInstant, const N: usize> AddonRegistry<'a, TInstant, N>
where
    TInstant: Copy,
{
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Appends `addon`; addons run in registration order.
    pub fn register(
        &mut self,
        addon: &'a mut dyn Addon<Instant = TInstant>,
    ) -> Result<(), RegistryFull> {
        self.slots
            .push(AddonSlot {
                addon,
                active: false,
            })
            .map_err(|_| RegistryFull)
    }

    /// Runs `setup` on every available addon that has not been set up yet.
    pub fn setup_all(&mut self, now: TInstant) {
        for slot in self.slots.iter_mut().filter(|slot| !slot.active) {
            if slot.addon.available() {
                slot.addon.setup(now);
                slot.active = true;
            }
        }
    }

    /// Runs `tick` on every addon that was set up.
    pub fn tick_all(&mut self, now: TInstant) {
        for slot in self.slots.iter_mut().filter(|slot| slot.active) {
            slot.addon.tick(now);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of the addons that were set up, in registration order.
    pub fn active(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.active)
            .map(|slot| slot.addon.name())
    }
}

impl<TInstant, const N: usize> Default for AddonRegistry<'_, TInstant, N>
where
    TInstant: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, D, X, TInstant> Addon for PassthroughEngine<S, D, X, TInstant>
where
    S: SerialLink,
    D: BridgeDelay,
    X: AuthExchange,
    TInstant: TelemetryInstant,
{
    type Instant = TInstant;

    fn name(&self) -> &'static str {
        "ps4-auth-passthrough"
    }

    fn available(&self) -> bool {
        PassthroughEngine::available(self)
    }

    fn setup(&mut self, now: TInstant) {
        PassthroughEngine::setup(self, now);
    }

    fn tick(&mut self, now: TInstant) {
        PassthroughEngine::tick(self, now);
    }
}
