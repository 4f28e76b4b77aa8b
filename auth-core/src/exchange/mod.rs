//! Handoff between the passthrough engine and the device-side USB stack.
//!
//! The device stack owns the nonce received from the console and the signed
//! response sent back to it. The engine only reads the nonce, and writes the
//! signature once per round before advancing the readiness flag.

use crate::report::{NONCE_LEN, SIGNATURE_LEN};

/// Progress of the console's authentication request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuthReadiness {
    /// No challenge outstanding.
    Idle,
    /// A nonce is waiting to be relayed.
    NonceReady,
    /// The signed response is ready for the console.
    SignedNonceReady,
}

/// Shared state consumed and advanced by the engine.
pub trait AuthExchange {
    /// Current readiness flag.
    fn readiness(&self) -> AuthReadiness;

    /// Copies the pending nonce into `nonce`.
    fn read_nonce(&self, nonce: &mut [u8; NONCE_LEN]);

    /// Stores the reassembled signature, then marks it ready.
    ///
    /// The signature buffer must be fully written before the flag moves to
    /// [`AuthReadiness::SignedNonceReady`].
    fn publish_signature(&mut self, signature: &[u8; SIGNATURE_LEN]);
}

impl<T> AuthExchange for &mut T
where
    T: AuthExchange + ?Sized,
{
    fn readiness(&self) -> AuthReadiness {
        (**self).readiness()
    }

    fn read_nonce(&self, nonce: &mut [u8; NONCE_LEN]) {
        (**self).read_nonce(nonce);
    }

    fn publish_signature(&mut self, signature: &[u8; SIGNATURE_LEN]) {
        (**self).publish_signature(signature);
    }
}

/// In-memory exchange for single-context targets and host tooling.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalExchange {
    readiness: AuthReadiness,
    nonce: [u8; NONCE_LEN],
    signature: [u8; SIGNATURE_LEN],
    published: u32,
}

impl LocalExchange {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            readiness: AuthReadiness::Idle,
            nonce: [0; NONCE_LEN],
            signature: [0; SIGNATURE_LEN],
            published: 0,
        }
    }

    /// Stores a nonce from the console and marks it pending.
    pub fn post_nonce(&mut self, nonce: &[u8; NONCE_LEN]) {
        self.nonce = *nonce;
        self.readiness = AuthReadiness::NonceReady;
    }

    /// Returns the flag to idle once the console has read the signature.
    pub fn acknowledge(&mut self) {
        self.readiness = AuthReadiness::Idle;
    }

    /// Last published signature.
    #[must_use]
    pub const fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// Number of signatures published so far.
    #[must_use]
    pub const fn published(&self) -> u32 {
        self.published
    }
}

impl Default for LocalExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthExchange for LocalExchange {
    fn readiness(&self) -> AuthReadiness {
        self.readiness
    }

    fn read_nonce(&self, nonce: &mut [u8; NONCE_LEN]) {
        *nonce = self.nonce;
    }

    fn publish_signature(&mut self, signature: &[u8; SIGNATURE_LEN]) {
        self.signature = *signature;
        self.published = self.published.wrapping_add(1);
        self.readiness = AuthReadiness::SignedNonceReady;
    }
}
