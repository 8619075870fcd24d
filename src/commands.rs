//! SCPI vocabulary of the scope and parsers for its replies.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ScopeError};

pub mod cmds {
    pub const IDN: &str = "*IDN?";
    pub const ACQ_RUN: &str = "ACQ:STATE RUN";
    pub const ACQ_STOP: &str = "ACQ:STATE STOP";
    pub const HORIZONTAL_SCALE: &str = "HORizontal:SCAle";
    pub const RECORD_LENGTH: &str = "HORizontal:RECOrdlength";
    pub const SETUP: &str = "SET?";
    pub const DATA_SOURCE: &str = "DAT:SOUR";
    pub const DATA_START: &str = "DATA:START";
    pub const DATA_STOP: &str = "DATA:STOP";
    pub const ENCODING_RIB: &str = "DATA:ENCDG RIB";
    pub const BYTE_NR_2: &str = "WFMO:BYTE_NR 2";
    pub const X_INCREMENT: &str = "WFMO:XIN?";
    pub const X_ZERO: &str = "WFMO:XZERO?";
    pub const Y_MULTIPLIER: &str = "WFMO:YMUlt?";
    pub const Y_OFFSET: &str = "WFMO:YOFf?";
    pub const CURVE: &str = "CURVE?";
}

/// A channel that is known to exist on the scope. Displays as `CHn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    pub fn number(self) -> u8 {
        self.0
    }

    /// Canonicalize `reference` for a scope with `channel_count` channels.
    pub fn resolve(reference: &ChannelRef, channel_count: u8) -> Result<Self, ScopeError> {
        let invalid = || ScopeError::InvalidChannel {
            requested: reference.to_string(),
            channel_count,
        };

        let number = match reference {
            ChannelRef::Number(n) => *n,
            ChannelRef::Name(name) => {
                let name = name.trim();
                let digits = match name.get(..2) {
                    Some(prefix) if prefix.eq_ignore_ascii_case("CH") => &name[2..],
                    _ => name,
                };
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                digits.parse::<i64>().map_err(|_| invalid())?
            }
            ChannelRef::Channel(channel) => i64::from(channel.0),
        };

        if (1..=i64::from(channel_count)).contains(&number) {
            Ok(Self(number as u8))
        } else {
            Err(invalid())
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CH{}", self.0)
    }
}

/// Anything a caller may use to name a channel: `2`, `"2"`, `"CH2"` or a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Number(i64),
    Name(String),
    Channel(Channel),
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(name) => write!(f, "{name}"),
            Self::Channel(channel) => write!(f, "{channel}"),
        }
    }
}

macro_rules! channel_ref_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for ChannelRef {
            fn from(n: $t) -> Self {
                Self::Number(i64::from(n))
            }
        })*
    };
}

channel_ref_from_int!(u8, u16, u32, i8, i16, i32, i64);

impl From<usize> for ChannelRef {
    fn from(n: usize) -> Self {
        Self::Number(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<&str> for ChannelRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ChannelRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<Channel> for ChannelRef {
    fn from(channel: Channel) -> Self {
        Self::Channel(channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
    Gnd,
}

impl Coupling {
    const ALLOWED: &'static str = "AC, DC, GND";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ac => "AC",
            Self::Dc => "DC",
            Self::Gnd => "GND",
        }
    }
}

impl FromStr for Coupling {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AC" => Ok(Self::Ac),
            "DC" => Ok(Self::Dc),
            "GND" => Ok(Self::Gnd),
            _ => Err(ScopeError::InvalidArgument {
                setting: "Coupling",
                value: s.to_string(),
                allowed: Self::ALLOWED,
            }),
        }
    }
}

impl TryFrom<&str> for Coupling {
    type Error = ScopeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Input impedance of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impedance {
    Fifty,
    SeventyFive,
    OneMeg,
}

impl Impedance {
    const ALLOWED: &'static str =
        "FIF, FIFty, SEVENTYF, SEVENTYFive, MEG, 50, 75, 1.00E+06 (or the numbers 50, 75, 1e6)";

    /// The literal the scope expects: plain digits below 100 ohms, scientific notation above.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifty => "50",
            Self::SeventyFive => "75",
            Self::OneMeg => "1.00E+06",
        }
    }

    pub fn ohms(&self) -> f64 {
        match self {
            Self::Fifty => 50.0,
            Self::SeventyFive => 75.0,
            Self::OneMeg => 1.0e6,
        }
    }

    pub fn from_ohms(ohms: f64) -> Result<Self, ScopeError> {
        [Self::Fifty, Self::SeventyFive, Self::OneMeg]
            .into_iter()
            .find(|candidate| candidate.ohms() == ohms)
            .ok_or_else(|| ScopeError::InvalidArgument {
                setting: "Impedance",
                value: ohms.to_string(),
                allowed: Self::ALLOWED,
            })
    }
}

impl FromStr for Impedance {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIF" | "FIFTY" | "50" => Ok(Self::Fifty),
            "SEVENTYF" | "SEVENTYFIVE" | "75" => Ok(Self::SeventyFive),
            "MEG" | "1.00E+06" => Ok(Self::OneMeg),
            // Replies such as `1.0000E+6` still name a valid impedance.
            other => other
                .parse::<f64>()
                .ok()
                .and_then(|ohms| Self::from_ohms(ohms).ok())
                .ok_or_else(|| ScopeError::InvalidArgument {
                    setting: "Impedance",
                    value: s.to_string(),
                    allowed: Self::ALLOWED,
                }),
        }
    }
}

impl TryFrom<&str> for Impedance {
    type Error = ScopeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<f64> for Impedance {
    type Error = ScopeError;

    fn try_from(ohms: f64) -> Result<Self, Self::Error> {
        Self::from_ohms(ohms)
    }
}

impl TryFrom<i32> for Impedance {
    type Error = ScopeError;

    fn try_from(ohms: i32) -> Result<Self, Self::Error> {
        Self::from_ohms(f64::from(ohms))
    }
}

impl TryFrom<u32> for Impedance {
    type Error = ScopeError;

    fn try_from(ohms: u32) -> Result<Self, Self::Error> {
        Self::from_ohms(f64::from(ohms))
    }
}

/// Manufacturer, model, serial number and firmware as reported by `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware: String,
}

impl Identity {
    pub fn parse(reply: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = reply.trim().splitn(4, ',').map(str::trim).collect();
        match fields.as_slice() {
            [manufacturer, model, serial_number, firmware] => Ok(Self {
                manufacturer: manufacturer.to_string(),
                model: model.to_string(),
                serial_number: serial_number.to_string(),
                firmware: firmware.to_string(),
            }),
            _ => Err(ParseError::Reply {
                command: cmds::IDN.to_string(),
                reply: reply.to_string(),
                expected: "identity",
            }),
        }
    }

    pub fn is_tektronix(&self) -> bool {
        self.manufacturer.eq_ignore_ascii_case("TEKTRONIX")
    }
}

/// The value part of a scalar reply. With `HEADER ON` the scope prefixes replies with the
/// command path, e.g. `:CH1:OFFSET 0.0E+0`.
pub(crate) fn reply_value(reply: &str) -> &str {
    reply.split_whitespace().last().unwrap_or("")
}

pub fn parse_float(command: &str, reply: &str) -> Result<f64, ParseError> {
    reply_value(reply)
        .parse::<f64>()
        .map_err(|_| ParseError::Reply {
            command: command.to_string(),
            reply: reply.to_string(),
            expected: "number",
        })
}

pub fn parse_int(command: &str, reply: &str) -> Result<i64, ParseError> {
    let value = reply_value(reply);
    value
        .parse::<i64>()
        .or_else(|_| {
            // Some firmware reports integers as `1.0000E+4`.
            value
                .parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
                .ok_or(())
        })
        .map_err(|()| ParseError::Reply {
            command: command.to_string(),
            reply: reply.to_string(),
            expected: "integer",
        })
}

pub fn parse_bool(command: &str, reply: &str) -> Result<bool, ParseError> {
    match reply_value(reply).to_ascii_uppercase().as_str() {
        "1" | "ON" => Ok(true),
        "0" | "OFF" => Ok(false),
        _ => Err(ParseError::Reply {
            command: command.to_string(),
            reply: reply.to_string(),
            expected: "boolean",
        }),
    }
}

/// Split a `SET?` dump into `KEY -> raw value`.
///
/// The first element of the dump is a header and is skipped.
pub fn parse_setup(reply: &str) -> HashMap<String, String> {
    reply
        .split(';')
        .skip(1)
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(' ') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (entry.to_string(), String::new()),
        })
        .collect()
}

/// 4 if the setup mentions a fourth channel, 2 otherwise.
pub fn channel_count_from_setup<'a>(keys: impl IntoIterator<Item = &'a String>) -> u8 {
    let has_ch4 = keys.into_iter().any(|key| {
        key.trim_start_matches(':')
            .get(..4)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("CH4:"))
    });
    if has_ch4 {
        4
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_resolve_accepts_all_forms() {
        for reference in [
            ChannelRef::from(3),
            ChannelRef::from("3"),
            ChannelRef::from("CH3"),
            ChannelRef::from("ch3"),
            ChannelRef::from(Channel(3)),
        ] {
            let channel = Channel::resolve(&reference, 4).unwrap();
            assert_eq!(channel.to_string(), "CH3");
        }
    }

    #[test]
    fn test_channel_resolve_is_idempotent() {
        for count in [2u8, 4] {
            for i in 1..=count {
                let once = Channel::resolve(&ChannelRef::from(i), count).unwrap();
                let twice = Channel::resolve(&once.into(), count).unwrap();
                let by_name = Channel::resolve(&once.to_string().into(), count).unwrap();
                assert_eq!(once, twice);
                assert_eq!(once, by_name);
            }
        }
    }

    #[test]
    fn test_channel_resolve_rejects_out_of_range_and_garbage() {
        for reference in [
            ChannelRef::from(3),
            ChannelRef::from(0),
            ChannelRef::from(-1),
            ChannelRef::from("CH5"),
            ChannelRef::from("MATH"),
            ChannelRef::from("CH"),
            ChannelRef::from(""),
            ChannelRef::from("CH1x"),
        ] {
            let err = Channel::resolve(&reference, 2).unwrap_err();
            assert!(matches!(err, ScopeError::InvalidChannel { channel_count: 2, .. }));
        }
    }

    #[test]
    fn test_impedance_numbers_and_tokens_agree() {
        assert_eq!(Impedance::try_from(50).unwrap(), Impedance::Fifty);
        assert_eq!(Impedance::try_from("fifty").unwrap(), Impedance::Fifty);
        assert_eq!(Impedance::try_from("FIF").unwrap(), Impedance::Fifty);
        assert_eq!(Impedance::try_from(75.0).unwrap(), Impedance::SeventyFive);
        assert_eq!(Impedance::try_from("SeventyFive").unwrap(), Impedance::SeventyFive);
        assert_eq!(Impedance::try_from(1.0e6).unwrap(), Impedance::OneMeg);
        assert_eq!(Impedance::try_from("meg").unwrap(), Impedance::OneMeg);
        assert_eq!("1.0000E+6".parse::<Impedance>().unwrap(), Impedance::OneMeg);

        assert_eq!(Impedance::Fifty.as_str(), "50");
        assert_eq!(Impedance::OneMeg.as_str(), "1.00E+06");
    }

    #[test]
    fn test_impedance_rejects_unknown_values() {
        assert!(matches!(
            Impedance::try_from(99),
            Err(ScopeError::InvalidArgument { setting: "Impedance", .. })
        ));
        assert!(matches!(
            Impedance::try_from("hundred"),
            Err(ScopeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_coupling_is_case_insensitive() {
        assert_eq!("ac".parse::<Coupling>().unwrap(), Coupling::Ac);
        assert_eq!("Dc".parse::<Coupling>().unwrap(), Coupling::Dc);
        assert_eq!(Coupling::try_from("GND").unwrap(), Coupling::Gnd);
        assert!(matches!(
            "AC1M".parse::<Coupling>(),
            Err(ScopeError::InvalidArgument { setting: "Coupling", .. })
        ));
    }

    #[test]
    fn test_scalar_parsers() {
        assert_eq!(parse_float("CH1:OFFS?", "1.0E-3").unwrap(), 1.0e-3);
        assert_eq!(parse_float("CH1:OFFS?", ":CH1:OFFSET 2.5E+0").unwrap(), 2.5);
        assert!(parse_float("CH1:OFFS?", "volts").is_err());

        assert_eq!(parse_int("DATA:START?", "17").unwrap(), 17);
        assert_eq!(parse_int("HOR:RECO?", "1.0000E+4").unwrap(), 10_000);
        assert!(parse_int("DATA:START?", "1.5").is_err());

        assert!(parse_bool("SEL:CH1?", "1").unwrap());
        assert!(!parse_bool("SEL:CH1?", ":SELECT:CH1 0").unwrap());
        assert!(parse_bool("SEL:CH1?", "maybe").is_err());
    }

    #[test]
    fn test_parse_setup_and_channel_count() {
        let dump = ":HEADER 1;:CH1:SCA 1.0E-1;:CH2:SCA 5.0E-1;:DATA:SOURCE CH1;:LOCK";
        let setup = parse_setup(dump);

        assert_eq!(setup.get(":CH1:SCA").map(String::as_str), Some("1.0E-1"));
        assert_eq!(setup.get(":DATA:SOURCE").map(String::as_str), Some("CH1"));
        assert_eq!(setup.get(":LOCK").map(String::as_str), Some(""));
        assert!(!setup.contains_key(":HEADER"));
        assert_eq!(channel_count_from_setup(setup.keys()), 2);

        let four = parse_setup(":HEADER 1;:CH1:SCA 1;:CH4:SCA 1");
        assert_eq!(channel_count_from_setup(four.keys()), 4);

        let verbose = parse_setup("HEADER 0;CH4:SCALE 1.0");
        assert_eq!(channel_count_from_setup(verbose.keys()), 4);
    }

    #[test]
    fn test_identity_parse() {
        let identity = Identity::parse("TEKTRONIX,MDO3024,C012345,CF:91.1CT FV:v1.30\n").unwrap();
        assert!(identity.is_tektronix());
        assert_eq!(identity.model, "MDO3024");
        assert_eq!(identity.firmware, "CF:91.1CT FV:v1.30");

        assert!(Identity::parse("garbage").is_err());
    }
}
