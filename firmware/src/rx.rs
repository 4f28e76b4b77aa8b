//! Receive polling for the bridge link.
//!
//! The USART checks the 9th bit of every reply against the parity of the last
//! byte it transmitted, which has nothing to do with the reply. A parity flag
//! is therefore ignored: reading the flag clears it while the byte stays in the
//! receive register, so the following poll returns it.

/// Outcome of one non-blocking receive attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RxPoll {
    Byte(u8),
    Empty,
    /// Parity mismatch on a byte the receiver still holds.
    ParityFlagged,
    /// Any other line error.
    LineError,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RxTimeout;

/// Polls until a byte arrives or `expired` reports the deadline has passed.
pub fn receive_byte(
    mut poll: impl FnMut() -> RxPoll,
    mut expired: impl FnMut() -> bool,
) -> Result<u8, RxTimeout> {
    loop {
        match poll() {
            RxPoll::Byte(byte) => return Ok(byte),
            RxPoll::ParityFlagged => {
                if let RxPoll::Byte(byte) = poll() {
                    return Ok(byte);
                }
            }
            RxPoll::Empty | RxPoll::LineError => {}
        }
        if expired() {
            return Err(RxTimeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(polls: &[RxPoll]) -> impl FnMut() -> RxPoll + '_ {
        let mut polls = polls.iter().copied();
        move || polls.next().unwrap_or(RxPoll::Empty)
    }

    #[test]
    fn parity_flagged_reply_is_still_delivered() {
        let polls = [RxPoll::ParityFlagged, RxPoll::Byte(0x15)];
        assert_eq!(receive_byte(scripted(&polls), || true), Ok(0x15));
    }

    #[test]
    fn waits_through_empty_polls_and_line_errors() {
        let polls = [
            RxPoll::Empty,
            RxPoll::LineError,
            RxPoll::Empty,
            RxPoll::Byte(0xa5),
        ];
        assert_eq!(receive_byte(scripted(&polls), || false), Ok(0xa5));
    }

    #[test]
    fn silent_line_times_out() {
        let mut checks = 0;
        let result = receive_byte(scripted(&[]), || {
            checks += 1;
            checks == 3
        });
        assert_eq!(result, Err(RxTimeout));
        assert_eq!(checks, 3);
    }

    #[test]
    fn stuck_parity_flag_does_not_outlive_the_deadline() {
        let mut checks = 0;
        let result = receive_byte(
            || RxPoll::ParityFlagged,
            || {
                checks += 1;
                checks == 2
            },
        );
        assert_eq!(result, Err(RxTimeout));
    }
}
