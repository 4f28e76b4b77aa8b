use auth_core::addon::AddonRegistry;
use embassy_futures::select::select;
use embassy_time::Timer;

use crate::board::TICK_PERIOD;
use crate::exchange::SharedExchange;
use crate::time::{FirmwareInstant, to_embassy};

use super::BoardPassthrough;

/// Sets up every available addon, then ticks them until reset.
///
/// A posted nonce wakes the loop before the tick period elapses.
pub async fn run(passthrough: &'static mut BoardPassthrough, exchange: &'static SharedExchange) -> ! {
    let mut registry: AddonRegistry<'static, FirmwareInstant> = AddonRegistry::new();
    if registry.register(passthrough).is_err() {
        defmt::error!("scheduler: addon registry full");
    }

    registry.setup_all(FirmwareInstant::now());
    for name in registry.active() {
        defmt::info!("scheduler: addon {} active", name);
    }

    loop {
        registry.tick_all(FirmwareInstant::now());
        select(Timer::after(to_embassy(TICK_PERIOD)), exchange.nonce_posted()).await;
    }
}

/// Idles forever after an unrecoverable bring-up error.
pub async fn park() -> ! {
    loop {
        core::future::pending::<()>().await;
    }
}
