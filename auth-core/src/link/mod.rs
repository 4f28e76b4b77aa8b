//! Byte-level framing for the bridge chip's serial link.
//!
//! The bridge runs its UART in 8-data-bit, 1-parity-bit mode and uses the
//! parity slot as a ninth data bit: set for command bytes, clear for data
//! bytes. Standard UARTs cannot emit a raw ninth bit, so the framer switches
//! between even and odd parity per byte so the generated parity bit lands on
//! the value the bridge expects.

/// Role of a byte written to the bridge link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameKind {
    /// Opcode byte; the bridge sees the ninth bit set.
    Command,
    /// Argument or payload byte; the bridge sees the ninth bit clear.
    Data,
}

/// UART parity mode applied to a single outgoing byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    /// Parity bit the UART will emit for `byte` under this mode.
    #[must_use]
    pub const fn bit_for(self, byte: u8) -> bool {
        let odd_ones = byte.count_ones() % 2 == 1;
        match self {
            Parity::Even => odd_ones,
            Parity::Odd => !odd_ones,
        }
    }
}

/// Selects the parity mode that frames `byte` as `kind`.
///
/// Command bytes get odd parity when their population count is even and even
/// parity otherwise; data bytes get the inverse.
#[must_use]
pub const fn parity_for(byte: u8, kind: FrameKind) -> Parity {
    let even_ones = byte.count_ones() % 2 == 0;
    match (kind, even_ones) {
        (FrameKind::Command, true) | (FrameKind::Data, false) => Parity::Odd,
        (FrameKind::Command, false) | (FrameKind::Data, true) => Parity::Even,
    }
}

/// Recovers the frame kind from a byte and the parity it was sent with.
#[must_use]
pub const fn frame_kind_of(byte: u8, parity: Parity) -> FrameKind {
    if parity.bit_for(byte) {
        FrameKind::Command
    } else {
        FrameKind::Data
    }
}

/// Minimal blocking UART surface required by the framer.
///
/// Firmware binds this to a HAL USART; tests and the emulator bind it to a
/// simulated bridge.
pub trait SerialLink {
    /// Transport-specific error type.
    type Error;

    /// Reconfigures the parity used for subsequent writes.
    fn set_parity(&mut self, parity: Parity) -> Result<(), Self::Error>;

    /// Reconfigures the link baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error>;

    /// Writes a single byte without buffering.
    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Blocks until every written byte has left the transmitter.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Blocks until a byte arrives.
    fn read_byte(&mut self) -> Result<u8, Self::Error>;
}

/// Command/data framer wrapped around a [`SerialLink`].
pub struct LinkFramer<S> {
    serial: S,
}

impl<S> LinkFramer<S>
where
    S: SerialLink,
{
    /// Wraps the supplied serial link.
    pub const fn new(serial: S) -> Self {
        Self { serial }
    }

    /// Sends an opcode byte.
    pub fn send_command(&mut self, byte: u8) -> Result<(), S::Error> {
        self.send(byte, FrameKind::Command)
    }

    /// Sends an argument or payload byte.
    pub fn send_data(&mut self, byte: u8) -> Result<(), S::Error> {
        self.send(byte, FrameKind::Data)
    }

    /// Sends every byte of `bytes` as data.
    pub fn send_data_slice(&mut self, bytes: &[u8]) -> Result<(), S::Error> {
        bytes.iter().try_for_each(|byte| self.send_data(*byte))
    }

    /// Reads a single response byte.
    pub fn read_byte(&mut self) -> Result<u8, S::Error> {
        self.serial.read_byte()
    }

    /// Fills `buf` with consecutive response bytes.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), S::Error> {
        for slot in buf.iter_mut() {
            *slot = self.serial.read_byte()?;
        }
        Ok(())
    }

    /// Reads and drops `count` response bytes.
    pub fn discard(&mut self, count: usize) -> Result<(), S::Error> {
        for _ in 0..count {
            self.serial.read_byte()?;
        }
        Ok(())
    }

    /// Waits for the transmitter to drain.
    pub fn flush(&mut self) -> Result<(), S::Error> {
        self.serial.flush()
    }

    /// Drains pending output, then switches the link baud rate.
    pub fn switch_baud_rate(&mut self, baud_rate: u32) -> Result<(), S::Error> {
        self.serial.flush()?;
        self.serial.set_baud_rate(baud_rate)
    }

    /// Borrows the underlying serial link.
    pub fn serial(&self) -> &S {
        &self.serial
    }

    /// Mutably borrows the underlying serial link.
    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    /// Consumes the framer and returns the serial link.
    pub fn into_inner(self) -> S {
        self.serial
    }

    fn send(&mut self, byte: u8, kind: FrameKind) -> Result<(), S::Error> {
        self.serial.set_parity(parity_for(byte, kind))?;
        self.serial.write_byte(byte)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use heapless::{Deque, Vec};

    use super::{FrameKind, Parity, SerialLink, frame_kind_of};

    /// Byte observed on the fake link's transmit side.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Written {
        pub byte: u8,
        pub parity: Parity,
    }

    impl Written {
        pub const fn kind(self) -> FrameKind {
            frame_kind_of(self.byte, self.parity)
        }
    }

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct Exhausted;

    /// Scripted link: records writes, replays queued responses.
    pub struct ScriptedLink {
        pub written: Vec<Written, 512>,
        pub responses: Deque<u8, 256>,
        pub parity: Parity,
        pub baud_rate: u32,
        pub flushes: usize,
    }

    impl ScriptedLink {
        pub fn new() -> Self {
            Self {
                written: Vec::new(),
                responses: Deque::new(),
                parity: Parity::Even,
                baud_rate: 9_600,
                flushes: 0,
            }
        }

        pub fn respond(&mut self, bytes: &[u8]) {
            for byte in bytes {
                self.responses
                    .push_back(*byte)
                    .expect("scripted response queue full");
            }
        }

        pub fn commands(&self) -> impl Iterator<Item = u8> + '_ {
            self.written
                .iter()
                .filter(|written| written.kind() == FrameKind::Command)
                .map(|written| written.byte)
        }

        pub fn bytes(&self) -> impl Iterator<Item = (FrameKind, u8)> + '_ {
            self.written
                .iter()
                .map(|written| (written.kind(), written.byte))
        }
    }

    impl SerialLink for ScriptedLink {
        type Error = Exhausted;

        fn set_parity(&mut self, parity: Parity) -> Result<(), Self::Error> {
            self.parity = parity;
            Ok(())
        }

        fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), Self::Error> {
            self.baud_rate = baud_rate;
            Ok(())
        }

        fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
            self.written
                .push(Written {
                    byte,
                    parity: self.parity,
                })
                .map_err(|_| Exhausted)
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            self.flushes += 1;
            Ok(())
        }

        fn read_byte(&mut self) -> Result<u8, Self::Error> {
            self.responses.pop_front().ok_or(Exhausted)
        }
    }
}
