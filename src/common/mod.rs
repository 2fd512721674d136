pub mod codec;
pub mod crypto;
pub mod error;
pub mod models;
pub mod protocol;
pub mod validator;

pub use crypto::*;
pub use error::*;
pub use models::*;
pub use protocol::*;
