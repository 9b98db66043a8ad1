//! frame.rs
//! Parses one textual CAN-FD line into `(id, payload)`.
//! Pure and stateless; the ingest loop drops non-matching lines before
//! they reach this parser.

use thiserror::Error;

pub const LINE_PREFIX: &str = "CAN FD RX:";

/// One frame as carried on the wire. Transient: discarded after decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("line does not start with `{LINE_PREFIX}`")]
    MissingPrefix,
    #[error("missing `{0}` field")]
    MissingField(&'static str),
    #[error("unparseable frame id `{0}`")]
    BadId(String),
    #[error("unparseable data byte `{0}`")]
    BadByte(String),
}

/// Extracts `Frame { id, payload }` from a line of the form
/// `CAN FD RX: ID=0x<hex>, DLC=<n>, Data=<hex bytes space-separated>`.
///
/// The `DLC` field is carried on the wire but not validated against the
/// payload length; the decode table rejects short payloads on its own.
///
/// # Errors
/// `ParseError` when the prefix is absent, the id is not hex, the `Data=`
/// section is missing, or any data byte fails to parse.
pub fn parse_line(line: &str) -> Result<Frame, ParseError> {
    let rest = line.strip_prefix(LINE_PREFIX).ok_or(ParseError::MissingPrefix)?;
    let rest = rest.trim_start();

    // First comma-separated field is "ID=0x<hex>".
    let id_field = rest.split(',').next().unwrap_or("").trim();
    let id_text = id_field
        .strip_prefix("ID=")
        .ok_or(ParseError::MissingField("ID"))?;
    let id_hex = id_text.strip_prefix("0x").or_else(|| id_text.strip_prefix("0X")).unwrap_or(id_text);
    let id = u16::from_str_radix(id_hex, 16).map_err(|_| ParseError::BadId(id_text.to_string()))?;

    let data_text = rest
        .split_once("Data=")
        .ok_or(ParseError::MissingField("Data"))?
        .1;

    let mut payload = Vec::new();
    for tok in data_text.split_whitespace() {
        let byte = u8::from_str_radix(tok, 16).map_err(|_| ParseError::BadByte(tok.to_string()))?;
        payload.push(byte);
    }

    Ok(Frame { id, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_wellformed_line() {
        let line = "CAN FD RX: ID=0x1A0, DLC=4, Data=11 22 AB ff";
        let frame = parse_line(line).unwrap();
        assert_eq!(frame.id, 0x1A0);
        assert_eq!(frame.payload, vec![0x11, 0x22, 0xAB, 0xFF]);
    }

    #[test]
    fn parses_heartbeat_with_empty_payload() {
        let frame = parse_line("CAN FD RX: ID=0xEA, DLC=0, Data=").unwrap();
        assert_eq!(frame.id, 0xEA);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn rejects_missing_prefix() {
        assert_eq!(parse_line("ID=0xEA, DLC=0, Data="), Err(ParseError::MissingPrefix));
        assert_eq!(parse_line(""), Err(ParseError::MissingPrefix));
    }

    #[test]
    fn rejects_bad_id() {
        let err = parse_line("CAN FD RX: ID=0xZZ, DLC=0, Data=").unwrap_err();
        assert!(matches!(err, ParseError::BadId(_)));
    }

    #[test]
    fn rejects_bad_data_byte() {
        let err = parse_line("CAN FD RX: ID=0x10, DLC=2, Data=11 GG").unwrap_err();
        assert_eq!(err, ParseError::BadByte("GG".to_string()));
    }

    #[test]
    fn rejects_missing_data_section() {
        let err = parse_line("CAN FD RX: ID=0x10, DLC=2").unwrap_err();
        assert_eq!(err, ParseError::MissingField("Data"));
    }
}
