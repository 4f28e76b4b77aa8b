//! Shell grammar for the emulator.

use core::time::Duration;

use auth_core::bridge::DeviceIdentity;
use winnow::ascii::{Caseless, dec_uint, space0, space1};
use winnow::combinator::{alt, cut_err, eof, opt, preceded, terminated};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::take_while;

/// Parsed shell command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Plug a simulated device in; defaults to the accepted identity.
    Attach(Option<DeviceIdentity>),
    Detach,
    /// Post a nonce derived from the seed.
    Nonce(Option<u8>),
    /// Console consumed the signature.
    Ack,
    /// Post a nonce and tick until it is signed.
    Round(Option<u8>),
    Tick(u32),
    Advance(Duration),
    Status,
    Telemetry,
    Fault(FaultCommand),
    /// On-demand GET_STATUS and auth-timestamp queries.
    Diag,
    Help(Option<String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultCommand {
    CorruptProbe(bool),
    RejectMode(bool),
    FailDescriptor(bool),
    /// Stall the challenge write for this chunk index.
    StallChallenge(u8),
    /// Stall the signature read after this many chunks.
    StallSignature(u8),
    Clear,
}

/// Parses one shell line.
pub fn parse(line: &str) -> Result<Command, String> {
    terminated(command, (space0, eof))
        .parse(line.trim())
        .map_err(|err| err.to_string())
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((
        preceded(Caseless("attach"), opt(preceded(space1, identity))).map(Command::Attach),
        Caseless("detach").value(Command::Detach),
        preceded(Caseless("nonce"), opt(preceded(space1, byte))).map(Command::Nonce),
        Caseless("ack").value(Command::Ack),
        preceded(Caseless("round"), opt(preceded(space1, byte))).map(Command::Round),
        preceded(Caseless("tick"), opt(preceded(space1, count)))
            .map(|ticks| Command::Tick(ticks.unwrap_or(1))),
        preceded(Caseless("advance"), cut_err(preceded(space1, duration))).map(Command::Advance),
        Caseless("status").value(Command::Status),
        Caseless("telemetry").value(Command::Telemetry),
        preceded(Caseless("fault"), cut_err(preceded(space1, fault))).map(Command::Fault),
        Caseless("diag").value(Command::Diag),
        preceded(Caseless("help"), opt(preceded(space1, word)))
            .map(|topic| Command::Help(topic.map(str::to_ascii_lowercase))),
    ))
    .context(StrContext::Label("command"))
    .parse_next(input)
}

fn fault(input: &mut &str) -> ModalResult<FaultCommand> {
    alt((
        preceded((Caseless("probe"), space1), switch).map(FaultCommand::CorruptProbe),
        preceded((Caseless("mode"), space1), switch).map(FaultCommand::RejectMode),
        preceded((Caseless("descriptor"), space1), switch).map(FaultCommand::FailDescriptor),
        preceded((Caseless("challenge"), space1), byte).map(FaultCommand::StallChallenge),
        preceded((Caseless("signature"), space1), byte).map(FaultCommand::StallSignature),
        Caseless("clear").value(FaultCommand::Clear),
    ))
    .context(StrContext::Label("fault"))
    .parse_next(input)
}

fn switch(input: &mut &str) -> ModalResult<bool> {
    alt((Caseless("on").value(true), Caseless("off").value(false)))
        .context(StrContext::Expected(StrContextValue::Description("on or off")))
        .parse_next(input)
}

fn identity(input: &mut &str) -> ModalResult<DeviceIdentity> {
    (hex_u16, ':', hex_u16)
        .map(|(vendor, _, product)| DeviceIdentity::new(vendor, product))
        .context(StrContext::Expected(StrContextValue::Description(
            "vendor:product in hex",
        )))
        .parse_next(input)
}

fn hex_u16(input: &mut &str) -> ModalResult<u16> {
    take_while(1..=4, |c: char| c.is_ascii_hexdigit())
        .try_map(|digits| u16::from_str_radix(digits, 16))
        .parse_next(input)
}

fn byte(input: &mut &str) -> ModalResult<u8> {
    dec_uint
        .context(StrContext::Expected(StrContextValue::Description("0-255")))
        .parse_next(input)
}

fn count(input: &mut &str) -> ModalResult<u32> {
    dec_uint.parse_next(input)
}

fn duration(input: &mut &str) -> ModalResult<Duration> {
    (
        dec_uint::<_, u64, _>,
        alt((
            "ms".value(Duration::from_millis as fn(u64) -> Duration),
            "s".value(Duration::from_secs as fn(u64) -> Duration),
        )),
    )
        .map(|(amount, unit)| unit(amount))
        .context(StrContext::Expected(StrContextValue::Description(
            "duration such as 250ms or 2s",
        )))
        .parse_next(input)
}

fn word<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| c.is_ascii_alphabetic()).parse_next(input)
}
