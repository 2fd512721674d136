pub mod broker;
pub mod cache;
pub mod config;
pub mod console;
pub mod session;
pub mod transport;

pub use broker::RequestBroker;
pub use cache::LocalCache;
pub use config::ClientConfig;
pub use session::{ChannelCreation, IncomingMessage, LoginResult, Session};
