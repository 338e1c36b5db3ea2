//! Protocol commands
//!
//! The fixed command table of the laser's ASCII protocol. Every command has a
//! wire opcode and, for setters, a bounded integer parameter that is rendered
//! as a fixed number of uppercase hex digits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProtocolError;

/// Valid range and wire width of a command parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterSpec {
    /// Smallest accepted value
    pub min: u32,
    /// Largest accepted value
    pub max: u32,
    /// Number of hex digits on the wire (zero-padded)
    pub hex_digits: usize,
}

impl ParameterSpec {
    const fn new(min: u32, max: u32, hex_digits: usize) -> Self {
        Self {
            min,
            max,
            hex_digits,
        }
    }

    /// Check whether `value` is inside `[min, max]`
    pub fn accepts(&self, value: i64) -> bool {
        value >= i64::from(self.min) && value <= i64::from(self.max)
    }

    /// Render a value as zero-padded uppercase hex of the configured width
    pub fn render(&self, value: u32) -> String {
        format!("{:0width$X}", value, width = self.hex_digits)
    }
}

/// Static description of one command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    /// Command name as used by callers (e.g. "SetShutter")
    pub name: &'static str,
    /// ASCII opcode sent on the wire
    pub opcode: &'static str,
    /// Parameter constraints, if the command takes one
    pub parameter: Option<ParameterSpec>,
}

/// Protocol commands understood by the laser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Switch the laser off ('X')
    LaserOff,
    /// Switch the laser on / standby ('g')
    LaserOn,
    /// Start repetition mode ('h')
    RepetitionOn,
    /// Start burst mode ('j')
    BurstOn,
    /// Start external trigger mode ('u')
    ExtTrigmode,
    /// Stop firing ('i')
    LaserStop,
    /// Set the burst quantity ('l', 0-9999)
    SetBurstQuantity,
    /// Set the repetition frequency in Hz ('m', 0-99)
    SetRepetitionFrequency,
    /// Set the high voltage ('n', 0-100)
    SetHV,
    /// Raise the high voltage by one step ('o1')
    IncrementHV,
    /// Lower the high voltage by one step ('o0')
    DecrementHV,
    /// Open (1) or close (0) the shutter ('z')
    SetShutter,
    /// Move the attenuator stepper ('O3', 0-399)
    SetStepperPosition,
    /// Set attenuator transmission in half percent ('O4', 0-200)
    SetTransmission,
    /// Set attenuation target energy ('O5', 0-9999)
    SetAttenuationEnergy,
    /// Re-initialize the attenuator ('O60000')
    InitAttenuator,
    /// Query the one-byte short status ('W')
    GetShortStatus,
    /// Query status block 7 ('UT')
    GetStat7,
    /// Query status block 8 ('UU')
    GetStat8,
    /// Query firmware version ('V3')
    GetVer3,
    /// Query attenuator stepper block ('US')
    GetSernum,
    /// Query serial numbers ('UV')
    GetAttenuatorStatus,
    /// Query stored energy values ('P')
    GetEnergyValues,
}

impl Command {
    /// Every command, in table order
    pub const ALL: [Command; 23] = [
        Command::LaserOff,
        Command::LaserOn,
        Command::RepetitionOn,
        Command::BurstOn,
        Command::ExtTrigmode,
        Command::LaserStop,
        Command::SetBurstQuantity,
        Command::SetRepetitionFrequency,
        Command::SetHV,
        Command::IncrementHV,
        Command::DecrementHV,
        Command::SetShutter,
        Command::SetStepperPosition,
        Command::SetTransmission,
        Command::SetAttenuationEnergy,
        Command::InitAttenuator,
        Command::GetShortStatus,
        Command::GetStat7,
        Command::GetStat8,
        Command::GetVer3,
        Command::GetSernum,
        Command::GetAttenuatorStatus,
        Command::GetEnergyValues,
    ];

    /// The status-query bundle issued on every poll
    pub const POLL_BUNDLE: [Command; 3] =
        [Command::GetShortStatus, Command::GetStat7, Command::GetStat8];

    /// Full table entry for this command
    pub fn spec(&self) -> CommandSpec {
        let (name, opcode, parameter) = match self {
            Command::LaserOff => ("LaserOff", "X", None),
            Command::LaserOn => ("LaserOn", "g", None),
            Command::RepetitionOn => ("RepetitionOn", "h", None),
            Command::BurstOn => ("BurstOn", "j", None),
            Command::ExtTrigmode => ("ExtTrigmode", "u", None),
            Command::LaserStop => ("LaserStop", "i", None),
            Command::SetBurstQuantity => {
                ("SetBurstQuantity", "l", Some(ParameterSpec::new(0, 9999, 4)))
            }
            Command::SetRepetitionFrequency => (
                "SetRepetitionFrequency",
                "m",
                Some(ParameterSpec::new(0, 99, 2)),
            ),
            Command::SetHV => ("SetHV", "n", Some(ParameterSpec::new(0, 100, 2))),
            Command::IncrementHV => ("IncrementHV", "o1", None),
            Command::DecrementHV => ("DecrementHV", "o0", None),
            Command::SetShutter => ("SetShutter", "z", Some(ParameterSpec::new(0, 1, 1))),
            Command::SetStepperPosition => (
                "SetStepperPosition",
                "O3",
                Some(ParameterSpec::new(0, 399, 4)),
            ),
            Command::SetTransmission => {
                ("SetTransmission", "O4", Some(ParameterSpec::new(0, 200, 2)))
            }
            Command::SetAttenuationEnergy => (
                "SetAttenuationEnergy",
                "O5",
                Some(ParameterSpec::new(0, 9999, 4)),
            ),
            Command::InitAttenuator => ("InitAttenuator", "O60000", None),
            Command::GetShortStatus => ("GetShortStatus", "W", None),
            Command::GetStat7 => ("GetStat7", "UT", None),
            Command::GetStat8 => ("GetStat8", "UU", None),
            Command::GetVer3 => ("GetVer3", "V3", None),
            Command::GetSernum => ("GetSernum", "US", None),
            Command::GetAttenuatorStatus => ("GetAttenuatorStatus", "UV", None),
            Command::GetEnergyValues => ("GetEnergyValues", "P", None),
        };
        CommandSpec {
            name,
            opcode,
            parameter,
        }
    }

    /// Command name as used by callers
    pub fn name(&self) -> &'static str {
        self.spec().name
    }

    /// Wire opcode
    pub fn opcode(&self) -> &'static str {
        self.spec().opcode
    }

    /// Parameter constraints, if any
    pub fn parameter(&self) -> Option<ParameterSpec> {
        self.spec().parameter
    }

    /// Whether the laser answers this command with a reply frame
    pub fn expects_response(&self) -> bool {
        matches!(
            self,
            Command::GetShortStatus
                | Command::GetStat7
                | Command::GetStat8
                | Command::GetVer3
                | Command::GetSernum
                | Command::GetAttenuatorStatus
                | Command::GetEnergyValues
        )
    }

    /// Find the command whose opcode is the longest prefix of `text`
    pub fn match_opcode(text: &str) -> Option<Command> {
        Command::ALL
            .iter()
            .filter(|cmd| text.starts_with(cmd.opcode()))
            .max_by_key(|cmd| cmd.opcode().len())
            .copied()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .iter()
            .find(|cmd| cmd.name() == name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_opcodes() {
        assert_eq!(Command::LaserOff.opcode(), "X");
        assert_eq!(Command::GetStat7.opcode(), "UT");
        assert_eq!(Command::InitAttenuator.opcode(), "O60000");
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!("SetShutter".parse::<Command>().unwrap(), Command::SetShutter);
        assert!(matches!(
            "Fire".parse::<Command>(),
            Err(ProtocolError::UnknownCommand(name)) if name == "Fire"
        ));
    }

    #[test]
    fn test_names_are_unique() {
        for (i, a) in Command::ALL.iter().enumerate() {
            for b in &Command::ALL[i + 1..] {
                assert_ne!(a.name(), b.name());
                assert_ne!(a.opcode(), b.opcode());
            }
        }
    }

    #[test]
    fn test_parameter_rendering() {
        let spec = Command::SetBurstQuantity.parameter().unwrap();
        assert_eq!(spec.render(255), "00FF");
        assert!(spec.accepts(9999));
        assert!(!spec.accepts(10000));
        assert!(!spec.accepts(-1));
    }

    #[test]
    fn test_match_opcode_prefers_longest() {
        assert_eq!(Command::match_opcode("O60000"), Some(Command::InitAttenuator));
        assert_eq!(Command::match_opcode("O30010"), Some(Command::SetStepperPosition));
        assert_eq!(Command::match_opcode("V3"), Some(Command::GetVer3));
        assert_eq!(Command::match_opcode("o1"), Some(Command::IncrementHV));
        assert_eq!(Command::match_opcode("Q"), None);
    }

    #[test]
    fn test_command_response() {
        assert!(Command::GetShortStatus.expects_response());
        assert!(!Command::SetShutter.expects_response());
    }
}
