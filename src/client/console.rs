//! Interactive console commands typed by the user (`!join :general`, `!read :a 3`).
//!
//! Anything that does not start with `!` is sent as a chat message to the
//! current destination.

use log::warn;

use crate::client::session::{ChannelCreation, Session};
use crate::common::error::{ClientError, Result};
use crate::common::models::Profile;
use crate::common::protocol::DEFAULT_CHANNEL;

pub const HELP: &str = "\
!exit                         - hand back unread messages and disconnect
!dest <chat>                  - switch the destination of typed messages
!join <channel>               - join a channel
!leave <channel>              - leave a channel
!create <channel>             - create and join a channel
!chat <chat>                  - show the history of a chat
!contact add <user> <alias>   - add a contact
!contact rem <user>           - remove a contact
!profile <user>               - show a profile
!profile set <json>           - replace your profile
!unread                       - list unread messages
!read <chat> <id>|all         - mark messages as read
!msg <chat> <id>              - show one message
!whoami                       - dump the local record
!help                         - this text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Exit,
    Dest(String),
    Join(String),
    Leave(String),
    Create(String),
    Chat(String),
    ContactAdd { username: String, alias: String },
    ContactRemove(String),
    ShowProfile(String),
    SetProfile(String),
    Unread,
    Read { chat: String, id: u64 },
    ReadAll(String),
    Fetch { chat: String, id: u64 },
    WhoAmI,
    Help,
    Say(String),
    Invalid(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('!') else {
            return ConsoleCommand::Say(line.to_string());
        };
        let (name, args) = rest.split_once(' ').map_or((rest, ""), |(n, a)| (n, a.trim()));
        let mut words = args.split_whitespace();
        let invalid = || ConsoleCommand::Invalid(line.to_string());

        match (name, words.next()) {
            ("exit", _) => ConsoleCommand::Exit,
            ("help", _) => ConsoleCommand::Help,
            ("unread", _) => ConsoleCommand::Unread,
            ("whoami", _) => ConsoleCommand::WhoAmI,
            ("dest", Some(chat)) => ConsoleCommand::Dest(chat.to_string()),
            ("join", Some(channel)) => ConsoleCommand::Join(channel.to_string()),
            ("leave", Some(channel)) => ConsoleCommand::Leave(channel.to_string()),
            ("create", Some(channel)) => ConsoleCommand::Create(channel.to_string()),
            ("chat", Some(chat)) => ConsoleCommand::Chat(chat.to_string()),
            ("contact", Some("add")) => {
                let rest = args.strip_prefix("add").unwrap_or(args).trim_start();
                match rest.split_once(char::is_whitespace) {
                    Some((username, alias)) if !alias.trim().is_empty() => {
                        ConsoleCommand::ContactAdd {
                            username: username.to_string(),
                            alias: alias.trim().to_string(),
                        }
                    }
                    _ => invalid(),
                }
            }
            ("contact", Some("rem")) => match words.next() {
                Some(username) => ConsoleCommand::ContactRemove(username.to_string()),
                None => invalid(),
            },
            ("profile", Some("set")) => match args.strip_prefix("set") {
                Some(json) if !json.trim().is_empty() => {
                    ConsoleCommand::SetProfile(json.trim().to_string())
                }
                _ => invalid(),
            },
            ("profile", Some(username)) => ConsoleCommand::ShowProfile(username.to_string()),
            ("read", Some("all")) if args == "all" => ConsoleCommand::ReadAll("all".to_string()),
            ("read", Some(chat)) => match words.next() {
                Some("all") => ConsoleCommand::ReadAll(chat.to_string()),
                Some(id) => match id.parse::<u64>() {
                    Ok(id) => ConsoleCommand::Read { chat: chat.to_string(), id },
                    Err(_) => invalid(),
                },
                None => invalid(),
            },
            ("msg", Some(chat)) => match words.next().and_then(|id| id.parse().ok()) {
                Some(id) => ConsoleCommand::Fetch { chat: chat.to_string(), id },
                None => invalid(),
            },
            _ => invalid(),
        }
    }
}

/// What the console loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Runs console commands against a session and prints their results.
pub struct Console {
    session: Session,
    dest: String,
}

impl Console {
    pub fn new(session: Session, dest: &str) -> Self {
        Self { session, dest: dest.to_string() }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    /// Executes one line. Recoverable errors are printed and the loop goes on.
    pub async fn run(&mut self, line: &str) -> Result<Flow> {
        match self.execute(ConsoleCommand::parse(line)).await {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_recoverable() => {
                println!("{}", e);
                Ok(Flow::Continue)
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(&mut self, cmd: ConsoleCommand) -> Result<Flow> {
        match cmd {
            ConsoleCommand::Exit => {
                let handed_back = self.session.send_unread().await?;
                println!("Disconnecting ({} unread handed back)...", handed_back);
                self.session.disconnect().await;
                return Ok(Flow::Exit);
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::WhoAmI => println!("{}", self.session.cache().describe()),
            ConsoleCommand::Dest(chat) => {
                if !self.session.is_subscribed(&chat) {
                    return Err(ClientError::NotAMember(chat));
                }
                self.dest = chat;
            }
            ConsoleCommand::Join(channel) => {
                if self.session.join_channel(&channel).await? {
                    self.dest = channel;
                } else {
                    println!("Failed to join {}", channel);
                }
            }
            ConsoleCommand::Leave(channel) => {
                if self.session.leave_channel(&channel).await? {
                    if self.dest == channel {
                        self.dest = DEFAULT_CHANNEL.to_string();
                    }
                } else {
                    println!("Failed to leave {}", channel);
                }
            }
            ConsoleCommand::Create(channel) => match self.session.create_channel(&channel).await? {
                ChannelCreation::Created => self.dest = channel,
                ChannelCreation::CreatedNotJoined => {
                    println!("Created {} but could not join it", channel)
                }
                ChannelCreation::Rejected => println!("Could not create {}", channel),
            },
            ConsoleCommand::Chat(chat) => {
                if !self.session.is_subscribed(&chat) {
                    return Err(ClientError::NotAMember(chat));
                }
                let history = self.session.get_chat(&chat).await?;
                println!("\n{}", history);
            }
            ConsoleCommand::ContactAdd { username, alias } => {
                if !self.session.add_contact(&username, &alias).await? {
                    println!("Could not add contact {}", username);
                }
            }
            ConsoleCommand::ContactRemove(username) => {
                if !self.session.remove_contact(&username).await? {
                    println!("Could not remove contact {}", username);
                }
            }
            ConsoleCommand::ShowProfile(username) => {
                match self.session.get_profile(&username).await? {
                    Some(profile) => println!("Profile of {}:\n{}", username, profile),
                    None => println!("No profile for {}", username),
                }
            }
            ConsoleCommand::SetProfile(json) => {
                let profile: Profile = match serde_json::from_str(&json) {
                    Ok(profile) => profile,
                    Err(e) => {
                        println!("Invalid profile: {}", e);
                        return Ok(Flow::Continue);
                    }
                };
                if !self.session.update_profile(profile).await? {
                    println!("Profile update refused");
                }
            }
            ConsoleCommand::Unread => {
                let unread = self.session.cache().unread();
                if unread.is_empty() {
                    println!("No unread messages.");
                } else {
                    println!("{} unread messages:", unread.len());
                    for msg in unread {
                        println!("{}", msg);
                    }
                }
            }
            ConsoleCommand::Read { chat, id } => {
                if self.session.read_message(&chat, id).await? {
                    println!("Message {} in {} marked as read.", id, chat);
                }
            }
            ConsoleCommand::ReadAll(chat) => {
                let chat = if chat == "all" { self.dest.clone() } else { chat };
                let count = self.session.read_all(&chat).await?;
                println!("{} messages in {} marked as read.", count, chat);
            }
            ConsoleCommand::Fetch { chat, id } => match self.session.fetch_message(&chat, id).await?
            {
                Some(msg) => println!("{}", msg),
                None => println!("No message {} in {}", id, chat),
            },
            ConsoleCommand::Say(body) => {
                if !body.is_empty() {
                    self.session.send_message(&body, &self.dest).await?;
                }
            }
            ConsoleCommand::Invalid(line) => {
                warn!("Unrecognised command: {}", line);
                println!("Invalid command, type !help");
            }
        }
        Ok(Flow::Continue)
    }
}
