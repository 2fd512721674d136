use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::common::codec;
use crate::common::error::DecodeError;
use crate::common::protocol::{LegacyLineSchema, TYPE_ERROR};

/// A chat message as exchanged with the server.
///
/// `id` is assigned by the server, so freshly composed messages carry `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub dst: String,
    #[serde(rename = "msg", default)]
    pub body: String,
}

impl Message {
    pub fn new(
        time: i64,
        src: impl Into<String>,
        dst: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self { id: None, time, src: src.into(), dst: dst.into(), body: body.into() }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn formatted_time(&self) -> String {
        format_timestamp(self.time)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.body.trim_end_matches(['\n', '\r']);
        if let Some(id) = self.id {
            write!(f, "({})", id)?;
        }
        write!(f, "[{} from {} to {}]: {}", self.formatted_time(), self.src, self.dst, body)
    }
}

pub fn format_timestamp(timestamp: i64) -> String {
    let dt = Utc.timestamp_opt(timestamp, 0).single().unwrap_or_else(Utc::now);
    let local_dt: DateTime<Local> = dt.with_timezone(&Local);
    local_dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Wire unit carried by every transport frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub dst: String,
    #[serde(default)]
    pub msg: String,
}

impl Envelope {
    pub fn is_error(&self) -> bool {
        self.kind == TYPE_ERROR
    }

    pub fn into_message(self) -> Message {
        Message { id: self.id, time: self.time, src: self.src, dst: self.dst, body: self.msg }
    }
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "name", default)]
    pub real_name: String,
    #[serde(default)]
    pub birthday: i64,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "description: {}\nemail: {}\nname: {}\nbirthday: {}",
            self.description, self.email, self.real_name, self.birthday
        )
    }
}

/// Server-held state of the logged in user, returned by `db user`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub contacts: HashMap<String, String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    name: String,
    #[serde(default)]
    chat: Vec<String>,
}

/// History of one channel or private conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chat {
    pub name: String,
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn empty(name: &str) -> Self {
        Self { name: name.to_string(), messages: Vec::new() }
    }

    /// Builds a chat from stored lines; blank lines are skipped and lines that
    /// do not fit the schema are dropped.
    pub fn from_lines<S: AsRef<str>>(name: &str, lines: &[S], schema: &LegacyLineSchema) -> Self {
        let messages = lines
            .iter()
            .map(|l| l.as_ref())
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| {
                let parsed = codec::decode_legacy_line(l, name, schema);
                if parsed.is_none() {
                    log::debug!("Dropping history line of {}: {:?}", name, l);
                }
                parsed
            })
            .collect();
        Self { name: name.to_string(), messages }
    }

    /// Parses the `{"name": ..., "chat": [...]}` payload of a `chat` reply.
    pub fn from_payload(payload: &str, schema: &LegacyLineSchema) -> Result<Self, DecodeError> {
        let parsed: ChatPayload = serde_json::from_str(payload.trim())
            .map_err(|e| DecodeError::Malformed(format!("chat payload: {}", e)))?;
        Ok(Self::from_lines(&parsed.name, &parsed.chat, schema))
    }

    pub fn get_by_id(&self, id: u64) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == Some(id))
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

impl fmt::Display for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for m in &self.messages {
            let body = m.body.trim_end_matches(['\n', '\r']);
            writeln!(f, "(time: {}; from: {}): {}", m.formatted_time(), m.src, body)?;
        }
        Ok(())
    }
}
