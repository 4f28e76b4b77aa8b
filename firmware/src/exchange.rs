//! Interrupt-safe hand-off between the USB HID stack and the passthrough.
//!
//! The console side posts nonces and collects signatures; the passthrough
//! side implements [`AuthExchange`]. Buffers sit behind a critical-section
//! mutex and the readiness flag is published with release ordering after the
//! buffer it guards has been written.

use core::cell::RefCell;

use auth_core::exchange::{AuthExchange, AuthReadiness};
use auth_core::report::{NONCE_LEN, SIGNATURE_LEN};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicU8, Ordering};

/// Exchange shared by every task on the board.
pub static AUTH_EXCHANGE: SharedExchange = SharedExchange::new();

const IDLE: u8 = 0;
const NONCE_READY: u8 = 1;
const SIGNED_NONCE_READY: u8 = 2;

const fn encode(readiness: AuthReadiness) -> u8 {
    match readiness {
        AuthReadiness::Idle => IDLE,
        AuthReadiness::NonceReady => NONCE_READY,
        AuthReadiness::SignedNonceReady => SIGNED_NONCE_READY,
    }
}

const fn decode(raw: u8) -> AuthReadiness {
    match raw {
        NONCE_READY => AuthReadiness::NonceReady,
        SIGNED_NONCE_READY => AuthReadiness::SignedNonceReady,
        _ => AuthReadiness::Idle,
    }
}

struct Buffers {
    nonce: [u8; NONCE_LEN],
    signature: [u8; SIGNATURE_LEN],
}

pub struct SharedExchange {
    readiness: AtomicU8,
    buffers: Mutex<CriticalSectionRawMutex, RefCell<Buffers>>,
    nonce_posted: Signal<CriticalSectionRawMutex, ()>,
}

impl SharedExchange {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            readiness: AtomicU8::new(IDLE),
            buffers: Mutex::new(RefCell::new(Buffers {
                nonce: [0; NONCE_LEN],
                signature: [0; SIGNATURE_LEN],
            })),
            nonce_posted: Signal::new(),
        }
    }

    /// Stores the console's nonce and wakes the scheduler.
    pub fn post_nonce(&self, nonce: &[u8; NONCE_LEN]) {
        self.buffers.lock(|buffers| buffers.borrow_mut().nonce = *nonce);
        self.store(AuthReadiness::NonceReady);
        self.nonce_posted.signal(());
    }

    /// Returns the signature once it has been published for the current round.
    pub fn signature(&self) -> Option<[u8; SIGNATURE_LEN]> {
        if self.load() != AuthReadiness::SignedNonceReady {
            return None;
        }
        Some(self.buffers.lock(|buffers| buffers.borrow().signature))
    }

    /// Marks the signature as consumed by the console.
    pub fn acknowledge(&self) {
        self.store(AuthReadiness::Idle);
    }

    /// Resolves on the next [`post_nonce`](Self::post_nonce).
    pub async fn nonce_posted(&self) {
        self.nonce_posted.wait().await;
    }

    fn load(&self) -> AuthReadiness {
        decode(self.readiness.load(Ordering::Acquire))
    }

    fn store(&self, readiness: AuthReadiness) {
        self.readiness.store(encode(readiness), Ordering::Release);
    }
}

impl Default for SharedExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthExchange for &SharedExchange {
    fn readiness(&self) -> AuthReadiness {
        self.load()
    }

    fn read_nonce(&self, nonce: &mut [u8; NONCE_LEN]) {
        *nonce = self.buffers.lock(|buffers| buffers.borrow().nonce);
    }

    fn publish_signature(&mut self, signature: &[u8; SIGNATURE_LEN]) {
        self.buffers
            .lock(|buffers| buffers.borrow_mut().signature = *signature);
        self.store(AuthReadiness::SignedNonceReady);
    }
}
