use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use static_cell::StaticCell;

use crate::board;
use crate::exchange::{AUTH_EXCHANGE, SharedExchange};
use crate::passthrough::LoggedPassthrough;
use crate::time::FirmwareDelay;
use crate::uart::UartLink;

mod scheduler;

pub type BoardPassthrough = LoggedPassthrough<UartLink, FirmwareDelay, &'static SharedExchange>;

static PASSTHROUGH: StaticCell<BoardPassthrough> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(_spawner: Spawner) {
    let hal::Peripherals {
        PB0, PB1, USART5, ..
    } = hal::init(hal::Config::default());

    let config = board::PASSTHROUGH;
    let link = match UartLink::new(USART5, PB0, PB1, config.baud_rate) {
        Ok(link) => link,
        Err(error) => {
            defmt::error!(
                "passthrough: bridge UART init failed: {}",
                defmt::Debug2Format(&error)
            );
            scheduler::park().await
        }
    };

    let passthrough = PASSTHROUGH.init(LoggedPassthrough::new(
        config,
        link,
        FirmwareDelay,
        &AUTH_EXCHANGE,
    ));

    scheduler::run(passthrough, &AUTH_EXCHANGE).await
}
