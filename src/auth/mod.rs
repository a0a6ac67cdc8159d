// Standard library imports
use std::collections::HashMap;
use std::marker::Unpin;

// External crate imports
use log::{debug, warn};
use md5::{Digest, Md5};
use serde_derive::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// Internal crate imports
use crate::errors::Error;
use crate::messages::constants::MD5_PASSWORD_PREFIX;
use crate::messages::{
    md5_challenge, md5_hash_password, md5_hash_second_pass, plain_password_challenge,
    read_password, wrong_password,
};

#[cfg(test)]
mod tests;

/// How clients prove who they are during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Accept every user without a password exchange.
    #[default]
    Trust,
    /// AuthenticationCleartextPassword. Only sensible over TLS.
    Cleartext,
    /// AuthenticationMD5Password with a random salt per attempt.
    Md5,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Trust => write!(f, "trust"),
            AuthMethod::Cleartext => write!(f, "cleartext"),
            AuthMethod::Md5 => write!(f, "md5"),
        }
    }
}

/// Source of user passwords.
///
/// A stored password is either plain text or `md5` followed by the hex of
/// md5(password + user), the way PostgreSQL keeps it in pg_authid.
pub trait CredentialStore: Send + Sync + 'static {
    fn password(&self, user: &str) -> Option<String>;
}

impl CredentialStore for HashMap<String, String> {
    fn password(&self, user: &str) -> Option<String> {
        self.get(user).cloned()
    }
}

fn is_md5_hash(stored: &str) -> bool {
    stored.len() == 35 && stored.starts_with(MD5_PASSWORD_PREFIX)
}

/// Run the password exchange for `user`. On failure the client has already
/// been sent a FATAL error.
pub async fn authenticate<S, T>(
    read: &mut S,
    write: &mut T,
    method: AuthMethod,
    credentials: &dyn CredentialStore,
    user: &str,
) -> Result<(), Error>
where
    S: AsyncReadExt + Unpin,
    T: AsyncWriteExt + Unpin,
{
    let accepted = match method {
        AuthMethod::Trust => {
            debug!("Trust authentication for user {user}");
            return Ok(());
        }
        AuthMethod::Cleartext => authenticate_cleartext(read, write, credentials, user).await?,
        AuthMethod::Md5 => authenticate_md5(read, write, credentials, user).await?,
    };

    if accepted {
        return Ok(());
    }

    let error = Error::AuthError(format!("Invalid password for user: {user}"));
    warn!("{error}");
    wrong_password(write, user).await?;
    write.flush().await?;
    Err(error)
}

async fn authenticate_cleartext<S, T>(
    read: &mut S,
    write: &mut T,
    credentials: &dyn CredentialStore,
    user: &str,
) -> Result<bool, Error>
where
    S: AsyncReadExt + Unpin,
    T: AsyncWriteExt + Unpin,
{
    plain_password_challenge(write).await?;
    let response = read_password(read).await?;
    let Ok(password) = String::from_utf8(response) else {
        return Ok(false);
    };

    Ok(match credentials.password(user) {
        Some(stored) if is_md5_hash(&stored) => md5_stored_password(user, &password) == stored,
        Some(stored) => stored == password,
        None => false,
    })
}

async fn authenticate_md5<S, T>(
    read: &mut S,
    write: &mut T,
    credentials: &dyn CredentialStore,
    user: &str,
) -> Result<bool, Error>
where
    S: AsyncReadExt + Unpin,
    T: AsyncWriteExt + Unpin,
{
    let salt = md5_challenge(write).await?;
    let response = read_password(read).await?;

    let expected = match credentials.password(user) {
        Some(stored) if is_md5_hash(&stored) => {
            md5_hash_second_pass(&stored[MD5_PASSWORD_PREFIX.len()..], &salt)
        }
        Some(stored) => md5_hash_password(user, &stored, &salt),
        None => return Ok(false),
    };
    Ok(expected == response)
}

/// `md5` + hex(md5(password + user)), the stored form of an md5 password.
pub fn md5_stored_password(user: &str, password: &str) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    format!("{MD5_PASSWORD_PREFIX}{:x}", md5.finalize())
}
