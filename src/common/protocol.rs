/// Protocol constants shared by the codec, the validator and the session.

/// Reserved identity of the server, used as `src` of replies and `dst` of commands.
pub const SERVER_ID: &str = "!server";

/// Default public channel every user can write to.
pub const DEFAULT_CHANNEL: &str = ":all";

pub const USER_SIGIL: char = '@';
pub const CHANNEL_SIGIL: char = ':';
pub const SPECIAL_SIGIL: char = '!';

/// Prefix of command bodies sent to [`SERVER_ID`].
pub const COMMAND_PREFIX: char = '!';
pub const ACK_SUCCESS: char = '+';
pub const ACK_FAILURE: char = '-';

pub const TYPE_MESSAGE: &str = "message";
pub const TYPE_ERROR: &str = "error";

pub const MAX_USERNAME_LENGTH: usize = 32;
pub const MAX_CHANNEL_NAME_LENGTH: usize = 32;

pub const DEFAULT_PORT: u16 = 4171;
pub const DEFAULT_RESPONSE_BUFFER: usize = 64;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3000;

/// Command keywords understood by the server.
pub mod command {
    pub const LOGIN: &str = "login";
    pub const REGISTER: &str = "register";
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const CREATE: &str = "create";
    pub const CHAT: &str = "chat";
    pub const DESCRIBE_USER: &str = "db user";
    pub const PROFILE: &str = "profile";
    pub const CONTACT: &str = "contact";
    pub const READ: &str = "read";
    pub const UNREAD: &str = "unread";
    pub const FETCH_MESSAGE: &str = "msg";
}

/// Layout of a stored history line: `[id][timestamp][source][separator][body]`.
///
/// The timestamp has a fixed width and the id is at most `id_width` wide.
/// Both may be padded with zeros or spaces, and an unpadded id is read from
/// the digits left in front of the timestamp. The source runs until the first
/// separator; everything after it is the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyLineSchema {
    pub id_width: usize,
    pub time_width: usize,
    pub separator: char,
}

impl LegacyLineSchema {
    pub const fn new(id_width: usize, time_width: usize, separator: char) -> Self {
        Self { id_width, time_width, separator }
    }

    /// Shortest line that can still hold a one-digit id, an empty source,
    /// the separator and an empty body.
    pub fn min_len(&self) -> usize {
        1 + self.time_width + self.separator.len_utf8()
    }

    /// Renders a line in this layout. Used by tests and tooling that fake server history.
    pub fn format_line(&self, id: u64, time: i64, src: &str, body: &str) -> String {
        format!(
            "{:0>idw$}{:0>tw$}{}{}{}",
            id,
            time,
            src,
            self.separator,
            body,
            idw = self.id_width,
            tw = self.time_width
        )
    }
}

/// Version 1 of the history line layout.
pub const LEGACY_LINE_V1: LegacyLineSchema = LegacyLineSchema::new(8, 10, '|');

impl Default for LegacyLineSchema {
    fn default() -> Self {
        LEGACY_LINE_V1
    }
}
