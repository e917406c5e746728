//! Authentication for chat handshakes.
//!
//! Tokens are issued elsewhere on the platform; this module only checks them
//! and turns them into a chat [`Identity`].

mod identity;
mod service;

pub use identity::{Identity, Role};
pub use service::{Claims, JwtAuthorizer};

use crate::error::AuthError;

/// Roles allowed to open a chat connection.
pub const CHAT_ROLES: [Role; 2] = [Role::User, Role::Trainer];

/// Turns a bearer credential into the caller's identity.
///
/// `Ok(None)` means the token is well formed but expired, wrongly signed, or
/// its role is not in `allowed`. `Err` means the token could not be parsed.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, token: &str, allowed: &[Role]) -> Result<Option<Identity>, AuthError>;
}
