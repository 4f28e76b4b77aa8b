/// Xorshift generator for existence-probe bytes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProbeGenerator {
    state: u32,
}

impl ProbeGenerator {
    const FALLBACK_SEED: u32 = 0x9e37_79b9;

    /// Seeds the generator; a zero seed is replaced since xorshift never leaves zero.
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { Self::FALLBACK_SEED } else { seed },
        }
    }

    /// Returns the next probe byte.
    pub fn next_byte(&mut self) -> u8 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x.to_be_bytes()[0]
    }
}
