//! High-level client operations.
//!
//! Every operation validates locally, performs one round trip through the
//! broker and only then touches the cache.

use log::{debug, info, warn};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::broker::RequestBroker;
use crate::client::cache::LocalCache;
use crate::client::config::ClientConfig;
use crate::client::transport::{self, FrameReceiver, FrameSender};
use crate::common::codec::{self, AckSign, Frame};
use crate::common::crypto::CredentialHasher;
use crate::common::error::{ClientError, DecodeError, Result};
use crate::common::models::{format_timestamp, Chat, Message, Profile, UserRecord};
use crate::common::protocol::{command, LegacyLineSchema, CHANNEL_SIGIL, DEFAULT_CHANNEL};
use crate::common::validator::{validate_channel_name, validate_username};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResult {
    Success,
    FailUsername,
    FailPassword,
    /// Any other answer, kept verbatim.
    Unknown(String),
}

impl LoginResult {
    fn from_reply(reply: &Reply) -> Self {
        match reply.payload.split_whitespace().next().unwrap_or("") {
            "success" => LoginResult::Success,
            "fail_username" => LoginResult::FailUsername,
            "fail_password" => LoginResult::FailPassword,
            _ => LoginResult::Unknown(reply.payload.clone()),
        }
    }
}

/// `create` and `join` are separate round trips, so creation can half succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCreation {
    Created,
    CreatedNotJoined,
    Rejected,
}

/// A server reply reduced to its sign and the text following the command keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub sign: AckSign,
    pub payload: String,
}

impl Reply {
    pub fn parse(text: &str, keyword: &str) -> Self {
        let body = match codec::classify_text(text) {
            Frame::Structured(env) => env.msg,
            Frame::Legacy(line) => line,
            Frame::Malformed(_) => String::new(),
        };
        match codec::parse_ack(&body, keyword) {
            Some((sign, payload)) => Reply { sign, payload: payload.to_string() },
            None => Reply { sign: AckSign::Bare, payload: body.trim().to_string() },
        }
    }

    pub fn is_failure(&self) -> bool {
        self.sign == AckSign::Failure
    }

    /// Channel changes count only when the server explicitly said `+`.
    fn acknowledges(&self, subject: &str) -> bool {
        self.sign == AckSign::Success && self.payload.contains(subject)
    }
}

/// A live chat message with the sender shown by contact alias when one is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub message: Message,
    pub sender_label: String,
}

impl fmt::Display for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} -> {}: {}",
            format_timestamp(self.message.time),
            self.sender_label,
            self.message.dst,
            self.message.body
        )
    }
}

fn payload_json<T: serde::de::DeserializeOwned>(payload: &str, what: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|e| malformed(format!("{} payload: {}", what, e)))
}

fn malformed(reason: String) -> ClientError {
    ClientError::Decode(DecodeError::Malformed(reason))
}

pub struct Session {
    broker: Arc<RequestBroker>,
    cache: LocalCache,
    hasher: Arc<dyn CredentialHasher>,
    request_timeout: Duration,
    legacy_line: LegacyLineSchema,
    live: mpsc::UnboundedReceiver<Message>,
    reader: Option<JoinHandle<()>>,
}

impl Session {
    /// Opens a TCP connection to the configured server and starts the reader.
    pub async fn connect(
        config: &ClientConfig,
        username: &str,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Result<Self> {
        let (sender, receiver) =
            transport::connect(&config.host, config.port, config.connect_timeout).await?;
        Ok(Self::start(username, sender, receiver, hasher, config))
    }

    /// Starts a session over any transport. Must be called inside a tokio runtime.
    pub fn start<S, R>(
        username: &str,
        sender: S,
        receiver: R,
        hasher: Arc<dyn CredentialHasher>,
        config: &ClientConfig,
    ) -> Self
    where
        S: FrameSender + 'static,
        R: FrameReceiver + 'static,
    {
        let broker =
            Arc::new(RequestBroker::new(username, Arc::new(sender), config.response_buffer));
        let (live_tx, live) = mpsc::unbounded_channel();
        let reader = broker.spawn_reader(receiver, live_tx);
        Self {
            broker,
            cache: LocalCache::new(username),
            hasher,
            request_timeout: config.request_timeout,
            legacy_line: config.legacy_line,
            live,
            reader: Some(reader),
        }
    }

    pub fn username(&self) -> &str {
        self.broker.username()
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Cache membership, plus the default channel every user is in without joining it.
    pub fn is_subscribed(&self, dest: &str) -> bool {
        dest == DEFAULT_CHANNEL || self.cache.is_channel_member(dest)
    }

    pub fn broker(&self) -> Arc<RequestBroker> {
        Arc::clone(&self.broker)
    }

    pub fn is_connected(&self) -> bool {
        self.broker.is_connected()
    }

    async fn request(&self, cmd: &str, args: &str, filter: Option<&str>) -> Result<Reply> {
        let text = self.broker.request(cmd, args, filter, self.request_timeout).await?;
        debug!("Reply to '{}': {}", cmd, text);
        Ok(Reply::parse(&text, cmd))
    }

    fn credentials(&self, password: &str) -> String {
        json!([self.username(), self.hasher.hash(password)]).to_string()
    }

    pub async fn login(&mut self, password: &str) -> Result<LoginResult> {
        validate_username(self.username())?;
        let reply = self.request(command::LOGIN, &self.credentials(password), None).await?;
        let result = LoginResult::from_reply(&reply);
        let me = self.username();
        match &result {
            LoginResult::Success => info!("Logged in as {}", me),
            LoginResult::FailUsername => warn!("Login failed: unknown username {}", me),
            LoginResult::FailPassword => warn!("Login failed: wrong password for {}", me),
            LoginResult::Unknown(text) => warn!("Login failed with unexpected reply: {}", text),
        }
        Ok(result)
    }

    pub async fn register(&mut self, password: &str) -> Result<LoginResult> {
        validate_username(self.username())?;
        let reply = self.request(command::REGISTER, &self.credentials(password), None).await?;
        let result = LoginResult::from_reply(&reply);
        if result == LoginResult::Success {
            info!("Registered {}", self.username());
        } else {
            warn!("Registration of {} failed: {}", self.username(), reply.payload);
        }
        Ok(result)
    }

    pub async fn join_channel(&mut self, channel: &str) -> Result<bool> {
        validate_channel_name(channel)?;
        let reply = self.request(command::JOIN, channel, Some(channel)).await?;
        if !reply.acknowledges(channel) {
            warn!("Failed to join channel {}", channel);
            return Ok(false);
        }
        self.cache.join(channel);
        info!("Joined channel {}", channel);
        Ok(true)
    }

    pub async fn leave_channel(&mut self, channel: &str) -> Result<bool> {
        validate_channel_name(channel)?;
        let reply = self.request(command::LEAVE, channel, Some(channel)).await?;
        if !reply.acknowledges(channel) {
            warn!("Failed to leave channel {}", channel);
            return Ok(false);
        }
        self.cache.leave(channel);
        info!("Left channel {}", channel);
        Ok(true)
    }

    pub async fn create_channel(&mut self, channel: &str) -> Result<ChannelCreation> {
        validate_channel_name(channel)?;
        let reply = self.request(command::CREATE, channel, Some(channel)).await?;
        if !reply.acknowledges(channel) {
            warn!("Server refused to create {}", channel);
            return Ok(ChannelCreation::Rejected);
        }
        match self.join_channel(channel).await {
            Ok(true) => Ok(ChannelCreation::Created),
            Ok(false) => Ok(ChannelCreation::CreatedNotJoined),
            Err(e) if e.is_recoverable() => {
                warn!("Created {} but joining failed: {}", channel, e);
                Ok(ChannelCreation::CreatedNotJoined)
            }
            Err(e) => Err(e),
        }
    }

    /// History of a channel or private chat. No answer in time yields an empty chat.
    pub async fn get_chat(&self, chat: &str) -> Result<Chat> {
        let reply = match self.request(command::CHAT, chat, Some(chat)).await {
            Ok(reply) => reply,
            Err(ClientError::Timeout { .. }) => {
                warn!("No history received for {}", chat);
                return Ok(Chat::empty(chat));
            }
            Err(e) => return Err(e),
        };
        if reply.is_failure() {
            warn!("Server refused history of {}: {}", chat, reply.payload);
            return Ok(Chat::empty(chat));
        }
        Ok(Chat::from_payload(&reply.payload, &self.legacy_line)?)
    }

    /// Loads the user's record from the server into the cache.
    pub async fn hydrate_cache(&mut self) -> Result<()> {
        let username = self.username().to_string();
        let reply = self.request(command::DESCRIBE_USER, &username, None).await?;
        if reply.is_failure() {
            return Err(ClientError::Protocol { src: username, reason: reply.payload });
        }
        let record: UserRecord = payload_json(&reply.payload, "db user")?;
        self.cache.hydrate(record);
        info!(
            "Cache hydrated: {} channels, {} contacts",
            self.cache.channels().len(),
            self.cache.contacts().len()
        );
        Ok(())
    }

    /// Asks the server for messages that arrived while offline; returns how many were new.
    pub async fn sync_unread(&mut self) -> Result<usize> {
        let reply = self.request(command::UNREAD, "[]", None).await?;
        if reply.is_failure() || reply.payload.is_empty() {
            return Ok(0);
        }
        let messages: Vec<Message> = payload_json(&reply.payload, "unread")?;
        let before = self.cache.unread_count();
        for msg in messages {
            self.cache.store_unread(msg);
        }
        Ok(self.cache.unread_count() - before)
    }

    pub async fn read_message(&mut self, chat: &str, id: u64) -> Result<bool> {
        let reply = self.request(command::READ, &format!("{} {}", chat, id), Some(chat)).await?;
        if reply.is_failure() {
            return Ok(false);
        }
        self.cache.mark_read(chat, id);
        Ok(true)
    }

    /// Marks every message of `chat` as read; returns how many cached entries went.
    pub async fn read_all(&mut self, chat: &str) -> Result<usize> {
        let reply = self.request(command::READ, &format!("{} all", chat), Some(chat)).await?;
        if reply.is_failure() {
            return Ok(0);
        }
        Ok(self.cache.mark_all_read(chat))
    }

    /// One message by id, from the unread cache when possible.
    pub async fn fetch_message(&self, chat: &str, id: u64) -> Result<Option<Message>> {
        if let Some(msg) = self.cache.find_unread(chat, id) {
            return Ok(Some(msg.clone()));
        }
        let args = json!([chat, id]).to_string();
        let reply = self.request(command::FETCH_MESSAGE, &args, Some(chat)).await?;
        if reply.is_failure() || reply.payload.is_empty() {
            return Ok(None);
        }
        payload_json(&reply.payload, "msg").map(Some)
    }

    /// Hands the still-unread messages back to the server before leaving.
    pub async fn send_unread(&mut self) -> Result<usize> {
        let pending = serde_json::to_string(self.cache.unread())
            .map_err(|e| malformed(e.to_string()))?;
        self.broker.send_command(command::UNREAD, &pending).await?;
        Ok(self.cache.drain_unread().len())
    }

    pub async fn add_contact(&mut self, username: &str, alias: &str) -> Result<bool> {
        validate_username(username)?;
        let args = format!("add {} {}", username, alias);
        let reply = self.request(command::CONTACT, &args, Some(username)).await?;
        if reply.is_failure() {
            return Ok(false);
        }
        self.cache.add_contact(username, alias);
        Ok(true)
    }

    pub async fn remove_contact(&mut self, username: &str) -> Result<bool> {
        validate_username(username)?;
        let args = format!("rem {}", username);
        let reply = self.request(command::CONTACT, &args, Some(username)).await?;
        if reply.is_failure() {
            return Ok(false);
        }
        self.cache.remove_contact(username);
        Ok(true)
    }

    pub async fn get_profile(&self, username: &str) -> Result<Option<Profile>> {
        validate_username(username)?;
        let reply = self.request(command::PROFILE, &format!("get {}", username), None).await?;
        if reply.is_failure() {
            return Ok(None);
        }
        payload_json(&reply.payload, "profile").map(Some)
    }

    pub async fn update_profile(&mut self, profile: Profile) -> Result<bool> {
        let body = serde_json::to_string(&profile).map_err(|e| malformed(e.to_string()))?;
        let reply = self.request(command::PROFILE, &format!("set {}", body), None).await?;
        if reply.is_failure() {
            return Ok(false);
        }
        self.cache.set_profile(profile);
        Ok(true)
    }

    /// Sends a chat message. Channels other than the default one must have been joined first.
    pub async fn send_message(&self, body: &str, dst: &str) -> Result<()> {
        if !self.is_subscribed(dst) {
            return Err(ClientError::NotAMember(dst.to_string()));
        }
        self.broker.send_user_message(body, dst).await
    }

    /// Waits for the next live message addressed to the user or a joined channel.
    ///
    /// Returns `None` once the connection is gone.
    pub async fn next_message(&mut self) -> Option<IncomingMessage> {
        loop {
            let message = self.live.recv().await?;
            if message.dst.starts_with(CHANNEL_SIGIL) && !self.is_subscribed(&message.dst) {
                debug!("Ignoring message for {} (not a member)", message.dst);
                continue;
            }
            let sender_label = self
                .cache
                .resolve_contact_alias(&message.src)
                .map(str::to_string)
                .unwrap_or_else(|| message.src.clone());
            return Some(IncomingMessage { message, sender_label });
        }
    }

    pub async fn disconnect(&mut self) {
        self.broker.disconnect().await;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
