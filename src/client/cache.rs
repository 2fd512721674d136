//! In-memory mirror of the logged in user's server-side record.
//!
//! Only the session mutates it, and only after the server acknowledged the
//! change. Nothing here is persisted.

use std::collections::HashMap;

use serde_json::json;

use crate::common::models::{Message, Profile, UserRecord};
use crate::common::protocol::{SPECIAL_SIGIL, USER_SIGIL};

#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    username: String,
    real_name: String,
    email: String,
    status: String,
    channels: Vec<String>,
    contacts: HashMap<String, String>,
    profile: Option<Profile>,
    unread: Vec<Message>,
}

impl LocalCache {
    pub fn new(username: &str) -> Self {
        Self { username: username.to_string(), ..Default::default() }
    }

    /// Replaces the record with the server's view. Duplicate channels are collapsed.
    pub fn hydrate(&mut self, record: UserRecord) {
        self.real_name = record.name;
        self.email = record.email;
        self.status = record.status;
        self.channels.clear();
        for channel in record.channels {
            self.join(&channel);
        }
        self.contacts = record.contacts;
        if record.profile.is_some() {
            self.profile = record.profile;
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn real_name(&self) -> &str {
        &self.real_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn contacts(&self) -> &HashMap<String, String> {
        &self.contacts
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn set_profile(&mut self, profile: Profile) {
        self.real_name = profile.real_name.clone();
        self.email = profile.email.clone();
        self.profile = Some(profile);
    }

    pub fn join(&mut self, channel: &str) {
        if !self.channels.iter().any(|c| c == channel) {
            self.channels.push(channel.to_string());
        }
    }

    pub fn leave(&mut self, channel: &str) {
        self.channels.retain(|c| c != channel);
    }

    /// Users and special destinations are not channels, so they always count as joined.
    pub fn is_channel_member(&self, dest: &str) -> bool {
        if dest.starts_with(USER_SIGIL) || dest.starts_with(SPECIAL_SIGIL) {
            return true;
        }
        self.channels.iter().any(|c| c == dest)
    }

    pub fn add_contact(&mut self, username: &str, alias: &str) {
        self.contacts.insert(username.to_string(), alias.to_string());
    }

    pub fn remove_contact(&mut self, username: &str) {
        self.contacts.remove(username);
    }

    pub fn resolve_contact_alias(&self, username: &str) -> Option<&str> {
        self.contacts.get(username).map(String::as_str)
    }

    pub fn store_unread(&mut self, msg: Message) {
        if msg.id.is_some() && self.unread.iter().any(|m| m.dst == msg.dst && m.id == msg.id) {
            return;
        }
        self.unread.push(msg);
    }

    pub fn unread(&self) -> &[Message] {
        &self.unread
    }

    pub fn unread_count(&self) -> usize {
        self.unread.len()
    }

    /// Takes every unread message out of the cache, oldest first.
    pub fn drain_unread(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.unread)
    }

    pub fn find_unread(&self, chat: &str, id: u64) -> Option<&Message> {
        self.unread.iter().find(|m| m.dst == chat && m.id == Some(id))
    }

    /// Removes the unread entries of `chat` with the given id; returns how many went.
    pub fn mark_read(&mut self, chat: &str, id: u64) -> usize {
        let before = self.unread.len();
        self.unread.retain(|m| !(m.dst == chat && m.id == Some(id)));
        before - self.unread.len()
    }

    pub fn mark_all_read(&mut self, chat: &str) -> usize {
        let before = self.unread.len();
        self.unread.retain(|m| m.dst != chat);
        before - self.unread.len()
    }

    /// JSON dump of the record, for debugging.
    pub fn describe(&self) -> String {
        json!({
            "type": "database",
            "users": {
                &self.username: {
                    "name": self.real_name,
                    "channels": self.channels,
                    "contacts": self.contacts,
                    "email": self.email,
                    "status": self.status,
                    "profile": self.profile,
                    "unread": self.unread.len(),
                }
            }
        })
        .to_string()
    }
}
