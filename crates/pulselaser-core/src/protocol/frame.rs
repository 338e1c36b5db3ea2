//! Frame encoding/decoding
//!
//! Implements the ASCII telegram format of the laser.
//!
//! Frame format:
//! - Request:  `#` `!` `@` opcode [hex parameter] FCS `\r`
//! - Response: `<` `@` `!` reply code payload FCS `\r`
//!
//! The FCS is the byte sum of everything before it (start delimiter included)
//! modulo 256, rendered as exactly two uppercase hex digits.

use super::{
    Command, ProtocolError, DESTINATION_ADDRESS, END_DELIMITER, REQUEST_START_DELIMITER,
    RESPONSE_START_DELIMITER, SOURCE_ADDRESS,
};

/// Length of the frame check sequence in characters
pub const CHECKSUM_LEN: usize = 2;

/// Calculate the frame check sequence of `data`
pub fn checksum(data: &[u8]) -> String {
    let sum = data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    format!("{:02X}", sum)
}

/// Compose a request frame from a command name and optional parameter
///
/// A parameter given to a command that takes none is ignored.
pub fn compose(name: &str, parameter: Option<i64>) -> Result<Vec<u8>, ProtocolError> {
    let command: Command = name.parse()?;
    compose_command(command, parameter)
}

/// Compose a request frame for a known command
pub fn compose_command(command: Command, parameter: Option<i64>) -> Result<Vec<u8>, ProtocolError> {
    let spec = command.spec();

    let mut telegram = String::with_capacity(16);
    telegram.push(REQUEST_START_DELIMITER);
    telegram.push(DESTINATION_ADDRESS);
    telegram.push(SOURCE_ADDRESS);
    telegram.push_str(spec.opcode);

    if let Some(param_spec) = spec.parameter {
        let value = parameter.ok_or_else(|| ProtocolError::MissingParameter(spec.name.into()))?;
        if !param_spec.accepts(value) {
            return Err(ProtocolError::ParameterOutOfRange {
                command: spec.name.to_string(),
                value,
                min: param_spec.min,
                max: param_spec.max,
            });
        }
        // accepts() bounds the value to the u32 range
        telegram.push_str(&param_spec.render(value as u32));
    }

    let fcs = checksum(telegram.as_bytes());
    telegram.push_str(&fcs);
    telegram.push(END_DELIMITER);

    Ok(telegram.into_bytes())
}

/// Build a response frame around a reply body (reply code + payload)
///
/// This is what the laser puts on the wire; used by the simulator and tests.
pub fn reply_frame(body: &str) -> Vec<u8> {
    let mut telegram = String::with_capacity(body.len() + 6);
    telegram.push(RESPONSE_START_DELIMITER);
    telegram.push(SOURCE_ADDRESS);
    telegram.push(DESTINATION_ADDRESS);
    telegram.push_str(body);
    let fcs = checksum(telegram.as_bytes());
    telegram.push_str(&fcs);
    telegram.push(END_DELIMITER);
    telegram.into_bytes()
}

/// Split a frame into its checked content and verify the FCS
///
/// Strips exactly one trailing terminator, then compares the last two
/// characters against the recomputed checksum as whole tokens.
fn verify_checksum(raw: &[u8]) -> Result<&str, ProtocolError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::MalformedReply("frame is not ASCII".to_string()))?;
    let text = text.strip_suffix(END_DELIMITER).unwrap_or(text);

    if !text.is_ascii() || text.len() < CHECKSUM_LEN {
        return Err(ProtocolError::MalformedReply(format!(
            "frame too short or not ASCII: {:?}",
            text
        )));
    }

    let (content, received) = text.split_at(text.len() - CHECKSUM_LEN);
    let expected = checksum(content.as_bytes());
    if received != expected {
        return Err(ProtocolError::ChecksumMismatch {
            expected,
            actual: received.to_string(),
        });
    }

    Ok(content)
}

/// Validate an inbound frame and return its body (reply code + payload)
///
/// The response, source and destination delimiters are each removed at most
/// once from the front.
pub fn reply_body(raw: &[u8]) -> Result<&str, ProtocolError> {
    let content = verify_checksum(raw)?;
    let content = content
        .strip_prefix(RESPONSE_START_DELIMITER)
        .unwrap_or(content);
    let content = content.strip_prefix(SOURCE_ADDRESS).unwrap_or(content);
    let content = content.strip_prefix(DESTINATION_ADDRESS).unwrap_or(content);
    Ok(content)
}

/// Decode a request frame back into its command and parameter
pub fn decode_request(raw: &[u8]) -> Result<(Command, Option<u32>), ProtocolError> {
    let content = verify_checksum(raw)?;
    let body = content
        .strip_prefix(REQUEST_START_DELIMITER)
        .and_then(|s| s.strip_prefix(DESTINATION_ADDRESS))
        .and_then(|s| s.strip_prefix(SOURCE_ADDRESS))
        .ok_or_else(|| ProtocolError::MalformedReply(format!("not a request: {:?}", content)))?;

    let command = Command::match_opcode(body)
        .ok_or_else(|| ProtocolError::UnknownCommand(body.to_string()))?;
    let rest = &body[command.opcode().len()..];

    let parameter = match command.parameter() {
        Some(spec) => {
            if rest.len() != spec.hex_digits {
                return Err(ProtocolError::MalformedReply(format!(
                    "{} expects {} parameter digits, got {:?}",
                    command, spec.hex_digits, rest
                )));
            }
            let bad_parameter =
                || ProtocolError::MalformedReply(format!("bad parameter {:?}", rest));
            if !rest.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(bad_parameter());
            }
            let value = u32::from_str_radix(rest, 16).map_err(|_| bad_parameter())?;
            Some(value)
        }
        None => None,
    };

    Ok((command, parameter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_two_digits() {
        assert_eq!(checksum(b""), "00");
        assert_eq!(checksum(&[0x01]), "01");
        assert_eq!(checksum(&[0xFF, 0x01]), "00");
        assert_eq!(checksum(b"#!@z1"), "2F");
    }

    #[test]
    fn test_compose_simple() {
        assert_eq!(compose("GetShortStatus", None).unwrap(), b"#!@WDB\r".to_vec());
        assert_eq!(compose("LaserOn", None).unwrap(), b"#!@gEB\r".to_vec());
    }

    #[test]
    fn test_compose_with_parameter() {
        assert_eq!(compose("SetShutter", Some(1)).unwrap(), b"#!@z12F\r".to_vec());
    }

    #[test]
    fn test_compose_missing_parameter() {
        assert!(matches!(
            compose("SetHV", None),
            Err(ProtocolError::MissingParameter(name)) if name == "SetHV"
        ));
    }

    #[test]
    fn test_reply_body_strips_single_delimiters() {
        let frame = reply_frame("W00");
        assert_eq!(reply_body(&frame).unwrap(), "W00");
        // A repeated delimiter belongs to the body
        assert_eq!(reply_body(&reply_frame("@W00")).unwrap(), "@W00");
        assert_eq!(reply_body(&reply_frame("!W00")).unwrap(), "!W00");
    }

    #[test]
    fn test_reply_body_ending_like_its_checksum() {
        // "<@!W01DD" sums to 0xDD
        let frame = b"<@!W01DDDD\r";
        assert_eq!(reply_frame("W01DD"), frame.to_vec());
        assert_eq!(reply_body(frame).unwrap(), "W01DD");
    }

    #[test]
    fn test_decode_request() {
        let frame = compose("SetBurstQuantity", Some(300)).unwrap();
        let (cmd, param) = decode_request(&frame).unwrap();
        assert_eq!(cmd, Command::SetBurstQuantity);
        assert_eq!(param, Some(300));
    }

    #[test]
    fn test_decode_request_rejects_sign_in_parameter() {
        let mut frame = b"#!@z+".to_vec();
        let fcs = checksum(&frame);
        frame.extend_from_slice(fcs.as_bytes());
        frame.push(b'\r');
        assert!(matches!(
            decode_request(&frame),
            Err(ProtocolError::MalformedReply(_))
        ));
    }

    #[test]
    fn test_checksum_verification() {
        let mut frame = reply_frame("W01");
        let idx = frame.len() - 2;
        frame[idx] = if frame[idx] == b'0' { b'1' } else { b'0' };
        assert!(matches!(
            reply_body(&frame),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }
}
