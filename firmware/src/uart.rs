//! USART5 binding of the bridge link.
//!
//! The bridge expects 8 data bits plus a parity bit, which the USART emits
//! as a 9-bit word. Parity changes reconfigure the peripheral, so the
//! transmitter is drained first.

use auth_core::link::{Parity, SerialLink};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::mode::Blocking;
use embassy_stm32::usart::{
    Config as UartConfig, DataBits, Error as UsartError, Parity as UartParity, StopBits, Uart,
};
use embassy_time::{Duration, Instant};

use crate::rx::{RxPoll, RxTimeout, receive_byte};

/// Longest wait for a single response byte.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UartLinkError {
    /// The peripheral rejected the requested configuration.
    Config,
    /// Line error while transmitting.
    Write,
    /// No byte arrived within the read timeout.
    Timeout,
}

pub struct UartLink {
    uart: Uart<'static, Blocking>,
    config: UartConfig,
}

impl UartLink {
    pub fn new(
        usart: Peri<'static, hal::peripherals::USART5>,
        tx_pin: Peri<'static, hal::peripherals::PB0>,
        rx_pin: Peri<'static, hal::peripherals::PB1>,
        baud_rate: u32,
    ) -> Result<Self, UartLinkError> {
        let mut config = UartConfig::default();
        config.baudrate = baud_rate;
        config.data_bits = DataBits::DataBits8;
        config.stop_bits = StopBits::STOP1;
        config.parity = UartParity::ParityEven;

        let uart = Uart::new_blocking(usart, rx_pin, tx_pin, config)
            .map_err(|_| UartLinkError::Config)?;
        Ok(Self { uart, config })
    }

    fn apply(&mut self) -> Result<(), UartLinkError> {
        self.uart
            .blocking_flush()
            .map_err(|_| UartLinkError::Write)?;
        self.uart
            .set_config(&self.config)
            .map_err(|_| UartLinkError::Config)
    }
}

impl SerialLink for UartLink {
    type Error = UartLinkError;

    fn set_parity(&mut self, parity: Parity) -> Result<(), UartLinkError> {
        let parity = match parity {
            Parity::Even => UartParity::ParityEven,
            Parity::Odd => UartParity::ParityOdd,
        };
        if self.config.parity == parity {
            return Ok(());
        }
        self.config.parity = parity;
        self.apply()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), UartLinkError> {
        self.config.baudrate = baud_rate;
        self.apply()
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), UartLinkError> {
        self.uart
            .blocking_write(&[byte])
            .map_err(|_| UartLinkError::Write)
    }

    fn flush(&mut self) -> Result<(), UartLinkError> {
        self.uart
            .blocking_flush()
            .map_err(|_| UartLinkError::Write)
    }

    fn read_byte(&mut self) -> Result<u8, UartLinkError> {
        let deadline = Instant::now() + READ_TIMEOUT;
        let uart = &mut self.uart;
        receive_byte(|| poll(uart), || Instant::now() >= deadline)
            .map_err(|RxTimeout| UartLinkError::Timeout)
    }
}

fn poll(uart: &mut Uart<'static, Blocking>) -> RxPoll {
    match uart.nb_read() {
        Ok(byte) => RxPoll::Byte(byte),
        Err(nb::Error::WouldBlock) => RxPoll::Empty,
        Err(nb::Error::Other(UsartError::Parity)) => RxPoll::ParityFlagged,
        Err(nb::Error::Other(_)) => RxPoll::LineError,
    }
}
