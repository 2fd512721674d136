//! Syntax checks for usernames and channel names.
//!
//! These rules must match the server's own checker; anything rejected here is
//! never sent over the wire.

use crate::common::error::{Field, ValidationError};
use crate::common::protocol::{
    CHANNEL_SIGIL, MAX_CHANNEL_NAME_LENGTH, MAX_USERNAME_LENGTH, USER_SIGIL,
};

pub const USERNAME_BLOCKED_SYMBOLS: &[char] = &[
    ' ', '!', '#', '$', '%', '^', '&', '*', '(', ')', '-', '=', '+', '[', ']', '{', '}', '`', '~',
    '\'', '"', '<', '>', '?', ',', '.', '/', '|', '\\', ':', ';',
];

pub const USERNAME_RESERVED: &[&str] = &["@admin", "@browser", "@server", "@all"];

pub const CHANNEL_BLOCKED_SYMBOLS: &[char] = &[
    ' ', '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '-', '=', '+', '[', ']', '{', '}', '`',
    '~', '\'', '"', '<', '>', '?', ',', '.', '/', '|', '\\', ';',
];

pub const CHANNEL_RESERVED: &[&str] = &[":all", ":server", ":browser"];

struct Rule {
    sigil: char,
    max_len: usize,
    blocked: &'static [char],
    reserved: &'static [&'static str],
}

const USERNAME_RULE: Rule = Rule {
    sigil: USER_SIGIL,
    max_len: MAX_USERNAME_LENGTH,
    blocked: USERNAME_BLOCKED_SYMBOLS,
    reserved: USERNAME_RESERVED,
};

const CHANNEL_RULE: Rule = Rule {
    sigil: CHANNEL_SIGIL,
    max_len: MAX_CHANNEL_NAME_LENGTH,
    blocked: CHANNEL_BLOCKED_SYMBOLS,
    reserved: CHANNEL_RESERVED,
};

impl Rule {
    fn accepts(&self, name: &str) -> bool {
        name.starts_with(self.sigil)
            && name.len() <= self.max_len
            && !name.contains(self.blocked)
            && !self.reserved.iter().any(|r| *r == name)
            && !name.chars().any(char::is_uppercase)
    }
}

pub fn check_username(name: &str) -> bool {
    USERNAME_RULE.accepts(name)
}

pub fn check_channel_name(name: &str) -> bool {
    CHANNEL_RULE.accepts(name)
}

pub fn validate_username(name: &str) -> Result<(), ValidationError> {
    if check_username(name) {
        Ok(())
    } else {
        Err(ValidationError { field: Field::Username, value: name.to_string() })
    }
}

pub fn validate_channel_name(name: &str) -> Result<(), ValidationError> {
    if check_channel_name(name) {
        Ok(())
    } else {
        Err(ValidationError { field: Field::ChannelName, value: name.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_usernames() {
        assert!(check_username("@alice"));
        assert!(check_username("@bob_42"));
        assert!(check_username("@"));
    }

    #[test]
    fn test_rejects_bad_usernames() {
        assert!(!check_username(""));
        assert!(!check_username("alice"));
        assert!(!check_username("@Alice"));
        assert!(!check_username("@ali ce"));
        assert!(!check_username("@ali:ce"));
        assert!(!check_username(&format!("@{}", "a".repeat(MAX_USERNAME_LENGTH))));
        for reserved in USERNAME_RESERVED {
            assert!(!check_username(reserved), "{} should be reserved", reserved);
        }
    }

    #[test]
    fn test_every_blocked_symbol_is_rejected() {
        for c in USERNAME_BLOCKED_SYMBOLS {
            let name = format!("@ab{}cd", c);
            assert!(!check_username(&name), "{:?} accepted", name);
        }
        for c in CHANNEL_BLOCKED_SYMBOLS {
            let name = format!(":ab{}cd", c);
            assert!(!check_channel_name(&name), "{:?} accepted", name);
        }
    }

    #[test]
    fn test_length_limit_is_inclusive() {
        let name = format!("@{}", "a".repeat(MAX_USERNAME_LENGTH - 1));
        assert_eq!(name.len(), MAX_USERNAME_LENGTH);
        assert!(check_username(&name));
    }

    #[test]
    fn test_channel_rules() {
        assert!(check_channel_name(":general"));
        assert!(check_channel_name(":rust:async"));
        assert!(!check_channel_name("general"));
        assert!(!check_channel_name(":General"));
        assert!(!check_channel_name(":gen@eral"));
        for reserved in CHANNEL_RESERVED {
            assert!(!check_channel_name(reserved));
        }
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = validate_username("@Bad").unwrap_err();
        assert_eq!(err.field, Field::Username);
        assert_eq!(err.value, "@Bad");
        assert_eq!(err.to_string(), "username check failed for '@Bad'");

        let err = validate_channel_name("nochan").unwrap_err();
        assert_eq!(err.field, Field::ChannelName);
        assert!(validate_channel_name(":ok").is_ok());
    }

    #[test]
    fn test_checks_are_deterministic() {
        for name in ["@alice", "@Alice", "@admin", ":x", "@a b"] {
            assert_eq!(check_username(name), check_username(name));
        }
    }
}
