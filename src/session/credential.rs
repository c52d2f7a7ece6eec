//! Session credential intake
//!
//! The login collaborator leaves the session cookies in a file, either as a
//! JSON array of browser cookie objects or as a raw `Cookie:` header line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading the credential blob
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read cookie file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cookie file is not a valid cookie array: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Cookie file contains no cookies")]
    Empty,
}

/// Opaque session cookie plus what validation learned about it
#[derive(Clone, PartialEq, Serialize)]
pub struct Credential {
    /// Value sent in the `Cookie` header
    pub cookie: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub last_validated: Option<DateTime<Utc>>,
    pub valid: bool,
}

/// Identity fields returned by a successful validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: String,
    pub user_name: String,
}

/// Result of checking a credential against the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub user: Option<UserInfo>,
}

impl Validation {
    pub fn rejected() -> Self {
        Self {
            valid: false,
            user: None,
        }
    }
}

/// One entry of a browser cookie export; extra attributes are ignored
#[derive(Debug, Deserialize)]
struct BrowserCookie {
    name: String,
    value: String,
}

impl Credential {
    /// Creates a not-yet-validated credential
    pub fn new(cookie: String) -> Self {
        Self {
            cookie,
            user_id: None,
            user_name: None,
            last_validated: None,
            valid: false,
        }
    }

    /// Records the outcome of a validation
    pub fn record_validation(&mut self, validation: &Validation, at: DateTime<Utc>) {
        self.valid = validation.valid;
        self.last_validated = Some(at);
        if let Some(user) = &validation.user {
            self.user_id = Some(user.user_id.clone());
            self.user_name = Some(user.user_name.clone());
        }
    }

    /// Marks the credential as rejected by the remote service
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Carries over identity learned earlier when the blob is unchanged
    pub fn inherit_from(&mut self, previous: &Credential) {
        if previous.cookie == self.cookie {
            self.user_id = previous.user_id.clone();
            self.user_name = previous.user_name.clone();
            self.last_validated = previous.last_validated;
            self.valid = previous.valid;
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("cookie", &format_args!("<{} bytes>", self.cookie.len()))
            .field("user_id", &self.user_id)
            .field("user_name", &self.user_name)
            .field("last_validated", &self.last_validated)
            .field("valid", &self.valid)
            .finish()
    }
}

/// Turns a cookie file's contents into a `Cookie` header value
///
/// # Arguments
///
/// * `content` - Either a JSON array of `{name, value}` objects or a raw header line
///
/// # Returns
///
/// * `Ok(String)` - The header value, `name=value` pairs joined by `; `
/// * `Err(CredentialError)` - The blob is empty or not a cookie array
pub fn parse_cookie_blob(content: &str) -> Result<String, CredentialError> {
    let trimmed = content.trim();

    if trimmed.starts_with('[') {
        let cookies: Vec<BrowserCookie> = serde_json::from_str(trimmed)?;
        let header = cookies
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            return Err(CredentialError::Empty);
        }
        return Ok(header);
    }

    let header = trimmed
        .strip_prefix("Cookie:")
        .or_else(|| trimmed.strip_prefix("cookie:"))
        .unwrap_or(trimmed)
        .trim();

    if header.is_empty() {
        return Err(CredentialError::Empty);
    }
    Ok(header.to_string())
}

/// Reads the credential blob left by the login collaborator
pub fn load_credential_file(path: &Path) -> Result<Credential, CredentialError> {
    let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let cookie = parse_cookie_blob(&content)?;
    Ok(Credential::new(cookie))
}

/// Where a run obtains its credential
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Re-read from the login collaborator's cookie file on every load
    File(PathBuf),
    /// A credential held in memory
    Fixed(Credential),
}

impl CredentialSource {
    pub fn load(&self) -> Result<Credential, CredentialError> {
        match self {
            Self::File(path) => load_credential_file(path),
            Self::Fixed(credential) => Ok(credential.clone()),
        }
    }
}
