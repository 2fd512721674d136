// Credential hashing shared by login and registration
use ring::digest;
use std::fmt::Write;

/// Turns a plain password into the credential string sent to the server.
///
/// Passed explicitly to the session so no hashing state lives in globals.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> String;
}

/// Salted SHA-256, re-applied `iterations` times, rendered as lower-case hex.
#[derive(Debug, Clone)]
pub struct IteratedSha256 {
    salt: String,
    iterations: u32,
}

impl IteratedSha256 {
    pub fn new(salt: impl Into<String>, iterations: u32) -> Self {
        Self { salt: salt.into(), iterations: iterations.max(1) }
    }

    fn round(&self, input: &str) -> String {
        let mut ctx = digest::Context::new(&digest::SHA256);
        ctx.update(self.salt.as_bytes());
        ctx.update(input.as_bytes());
        ctx.update(self.salt.as_bytes());
        to_hex(ctx.finish().as_ref())
    }
}

impl CredentialHasher for IteratedSha256 {
    fn hash(&self, password: &str) -> String {
        let mut current = password.to_string();
        for _ in 0..self.iterations {
            current = self.round(&current);
        }
        current
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(&mut acc, "{:02x}", b);
        acc
    })
}
