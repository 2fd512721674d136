//! Envelope codec.
//!
//! Outgoing traffic is always a JSON [`Envelope`]. Incoming frames are either
//! structured envelopes or untyped legacy text (`+join :general`), and stored
//! history uses the fixed-width layout described by [`LegacyLineSchema`].

use serde_json::json;

use crate::common::error::DecodeError;
use crate::common::models::{Envelope, Message};
use crate::common::protocol::{
    LegacyLineSchema, ACK_FAILURE, ACK_SUCCESS, COMMAND_PREFIX, SERVER_ID, TYPE_MESSAGE,
};

/// Outcome of looking at one inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Structured(Envelope),
    Legacy(String),
    Malformed(String),
}

/// Sign of a legacy acknowledgement line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSign {
    Success,
    Failure,
    Bare,
}

fn envelope_bytes(time: i64, src: &str, dst: &str, msg: &str) -> Vec<u8> {
    json!({
        "type": TYPE_MESSAGE,
        "time": time,
        "src": src,
        "dst": dst,
        "msg": msg,
    })
    .to_string()
    .into_bytes()
}

/// Builds the body of a server command: `!<command> <args>`.
pub fn command_body(command: &str, args: &str) -> String {
    format!("{}{} {}", COMMAND_PREFIX, command, args)
}

pub fn encode_command(command: &str, args: &str, src: &str, time: i64) -> Vec<u8> {
    envelope_bytes(time, src, SERVER_ID, &command_body(command, args))
}

pub fn encode_user_message(body: &str, dst: &str, src: &str, time: i64) -> Vec<u8> {
    envelope_bytes(time, src, dst, body)
}

pub fn classify_text(text: &str) -> Frame {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Frame::Malformed("empty frame".to_string());
    }
    match serde_json::from_str::<Envelope>(trimmed) {
        Ok(env) => Frame::Structured(env),
        Err(_) => Frame::Legacy(trimmed.to_string()),
    }
}

pub fn classify(bytes: &[u8]) -> Frame {
    match std::str::from_utf8(bytes) {
        Ok(text) => classify_text(text),
        Err(e) => Frame::Malformed(format!("invalid utf-8: {}", e)),
    }
}

fn structured_to_message(env: Envelope) -> Result<Message, DecodeError> {
    if env.is_error() {
        return Err(DecodeError::Remote { src: env.src, reason: env.msg });
    }
    Ok(env.into_message())
}

/// Decodes a wire frame. Only structured envelopes are accepted.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    match classify(bytes) {
        Frame::Structured(env) => structured_to_message(env),
        Frame::Legacy(text) => Err(DecodeError::Malformed(format!("not an envelope: {}", text))),
        Frame::Malformed(reason) => Err(DecodeError::Malformed(reason)),
    }
}

/// Like [`decode`], but falls back to the history line layout for non-JSON input.
pub fn decode_with_legacy(
    bytes: &[u8],
    destination: &str,
    schema: &LegacyLineSchema,
) -> Result<Message, DecodeError> {
    match classify(bytes) {
        Frame::Structured(env) => structured_to_message(env),
        Frame::Legacy(text) => decode_legacy_line(&text, destination, schema)
            .ok_or_else(|| DecodeError::Malformed(format!("legacy line: {}", text))),
        Frame::Malformed(reason) => Err(DecodeError::Malformed(reason)),
    }
}

/// Parses one stored history line. Returns `None` on any mismatch.
///
/// The numeric prefix holds the id followed by exactly `time_width` timestamp
/// characters, so `"42"` and `"00000042"` both decode to id 42.
pub fn decode_legacy_line(
    line: &str,
    destination: &str,
    schema: &LegacyLineSchema,
) -> Option<Message> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.len() < schema.min_len() {
        return None;
    }

    // digits and padding are ASCII, so the byte offsets below are char boundaries
    let prefix_end = line
        .find(|c: char| !(c.is_ascii_digit() || c == ' '))
        .unwrap_or(line.len());
    if prefix_end <= schema.time_width {
        return None;
    }
    let id_end = prefix_end - schema.time_width;
    if id_end > schema.id_width {
        return None;
    }
    let id: u64 = line[..id_end].trim().parse().ok()?;
    let time: i64 = line[id_end..prefix_end].trim().parse().ok()?;

    let (src, body) = line[prefix_end..].split_once(schema.separator)?;

    Some(Message {
        id: Some(id),
        time,
        src: src.to_string(),
        dst: destination.to_string(),
        body: body.to_string(),
    })
}

/// Splits a legacy acknowledgement into its sign and the payload following `keyword`.
///
/// The keyword must be followed by whitespace, the end of the text or a JSON
/// opener, so `join` does not match `joined`.
pub fn parse_ack<'a>(text: &'a str, keyword: &str) -> Option<(AckSign, &'a str)> {
    let text = text.trim_start();
    let (sign, rest) = match text.chars().next()? {
        ACK_SUCCESS => (AckSign::Success, &text[1..]),
        ACK_FAILURE => (AckSign::Failure, &text[1..]),
        _ => (AckSign::Bare, text),
    };
    let after = rest.strip_prefix(keyword)?;
    match after.chars().next() {
        None => Some((sign, "")),
        Some(c) if c.is_whitespace() || c == '{' || c == '[' => Some((sign, after.trim())),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::protocol::LEGACY_LINE_V1;

    #[test]
    fn test_user_message_round_trip() {
        let bytes = encode_user_message("hello there", ":general", "@alice", 1_700_000_000);
        let msg = decode(&bytes).unwrap();
        assert_eq!(msg.body, "hello there");
        assert_eq!(msg.dst, ":general");
        assert_eq!(msg.src, "@alice");
        assert!(msg.time >= 1_700_000_000);
        assert_eq!(msg.id, None);
    }

    #[test]
    fn test_command_is_addressed_to_server() {
        let bytes = encode_command("join", ":general", "@alice", 10);
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["dst"], SERVER_ID);
        assert_eq!(value["src"], "@alice");
        assert_eq!(value["msg"], "!join :general");
    }

    #[test]
    fn test_error_envelope_is_typed() {
        let raw =
            br#"{"type":"error","time":0,"src":"!server","dst":"@alice","msg":"no such channel"}"#;
        match decode(raw) {
            Err(DecodeError::Remote { src, reason }) => {
                assert_eq!(src, "!server");
                assert_eq!(reason, "no such channel");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_plain_text_is_malformed_without_fallback() {
        assert!(matches!(decode(b"+join :general"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(b""), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(&[0xff, 0xfe]), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_legacy_fallback_on_request() {
        let line = LEGACY_LINE_V1.format_line(5, 1_700_000_001, "@bob", "hey");
        let msg = decode_with_legacy(line.as_bytes(), ":general", &LEGACY_LINE_V1).unwrap();
        assert_eq!(msg.id, Some(5));
        assert_eq!(msg.dst, ":general");
        assert!(decode_with_legacy(b"short", ":general", &LEGACY_LINE_V1).is_err());
    }

    #[test]
    fn test_legacy_line_unpadded_schema() {
        let schema = LegacyLineSchema::new(2, 10, '|');
        let line = String::from("42") + "1700000000" + "@bob" + "|" + "hello";
        let msg = decode_legacy_line(&line, ":general", &schema).unwrap();
        assert_eq!(msg.id, Some(42));
        assert_eq!(msg.time, 1_700_000_000);
        assert_eq!(msg.src, "@bob");
        assert_eq!(msg.body, "hello");
    }

    #[test]
    fn test_legacy_line_unpadded_id_under_shipped_schema() {
        let line = String::from("42") + "1700000000" + "@bob" + "|" + "hello";
        for schema in [LEGACY_LINE_V1, LegacyLineSchema::default()] {
            let msg = decode_legacy_line(&line, ":general", &schema).unwrap();
            assert_eq!(msg.id, Some(42));
            assert_eq!(msg.time, 1_700_000_000);
            assert_eq!(msg.src, "@bob");
            assert_eq!(msg.dst, ":general");
            assert_eq!(msg.body, "hello");
        }
        let msg = decode_legacy_line("71700000000@bob|hi", ":x", &LEGACY_LINE_V1).unwrap();
        assert_eq!(msg.id, Some(7));
        // id wider than the schema allows
        assert!(decode_legacy_line("1234567891700000000@bob|hi", ":x", &LEGACY_LINE_V1).is_none());
    }

    #[test]
    fn test_legacy_line_padded_default_schema() {
        let line = "00000042 1700000000@bob|hello|world\n";
        let schema = LegacyLineSchema::new(8, 11, '|');
        let msg = decode_legacy_line(line, ":x", &schema).unwrap();
        assert_eq!(msg.id, Some(42));
        assert_eq!(msg.body, "hello|world");

        let line = LEGACY_LINE_V1.format_line(42, 1_700_000_000, "@bob", "hello");
        assert_eq!(line, "000000421700000000@bob|hello");
        assert!(decode_legacy_line(&line, ":x", &LEGACY_LINE_V1).is_some());
    }

    #[test]
    fn test_legacy_line_failures_return_none() {
        let schema = LEGACY_LINE_V1;
        assert!(decode_legacy_line("", ":x", &schema).is_none());
        assert!(decode_legacy_line("0000004", ":x", &schema).is_none());
        assert!(decode_legacy_line("abcdefgh1700000000@bob|hi", ":x", &schema).is_none());
        assert!(decode_legacy_line("00000001notatime!!@bob|hi", ":x", &schema).is_none());
        assert!(decode_legacy_line("000000011700000000@bob no separator", ":x", &schema).is_none());
        // multi-byte character straddling the id field
        assert!(decode_legacy_line("0000000é1700000000@bob|hi", ":x", &schema).is_none());
    }

    #[test]
    fn test_parse_ack() {
        assert_eq!(parse_ack("+join :general", "join"), Some((AckSign::Success, ":general")));
        assert_eq!(parse_ack("-join :general", "join"), Some((AckSign::Failure, ":general")));
        assert_eq!(parse_ack("login success", "login"), Some((AckSign::Bare, "success")));
        assert_eq!(
            parse_ack("db user {\"name\":\"A\"}", "db user"),
            Some((AckSign::Bare, "{\"name\":\"A\"}"))
        );
        assert_eq!(parse_ack("chat{}", "chat"), Some((AckSign::Bare, "{}")));
        assert_eq!(parse_ack("+leave", "leave"), Some((AckSign::Success, "")));
        assert_eq!(parse_ack("joined :general", "join"), None);
        assert_eq!(parse_ack("+leave :x", "join"), None);
        assert_eq!(parse_ack("", "join"), None);
    }

    #[test]
    fn test_classify() {
        let chat = classify(br#"{"type":"chat","name":":a"}"#);
        assert!(matches!(chat, Frame::Structured(e) if e.kind == "chat"));
        assert!(matches!(classify(b"+join :a"), Frame::Legacy(t) if t == "+join :a"));
        assert!(matches!(classify(b"   "), Frame::Malformed(_)));
    }
}
