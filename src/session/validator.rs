//! Session validation against the remote profile endpoint

use crate::config::ApiConfig;
use crate::crawler::FetchError;
use crate::session::{Credential, UserInfo, Validation};
use crate::ConfigError;
use async_trait::async_trait;
use reqwest::header::{COOKIE, REFERER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

/// Checks that a credential is still accepted by the remote service
#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Performs one lightweight authenticated request
    ///
    /// Returns `Ok` with `valid = false` when the service rejects the
    /// credential, and `Err` only when the check itself could not be made.
    async fn validate(&self, credential: &Credential) -> Result<Validation, FetchError>;
}

#[derive(Debug, Deserialize)]
struct ProfileEnvelope {
    data: Option<ProfileData>,
}

#[derive(Debug, Deserialize)]
struct ProfileData {
    user: Option<ProfileUser>,
}

#[derive(Debug, Deserialize)]
struct ProfileUser {
    idstr: Option<String>,
    id: Option<u64>,
    screen_name: Option<String>,
}

impl ProfileUser {
    fn into_user_info(self) -> Option<UserInfo> {
        let user_id = self
            .idstr
            .filter(|s| !s.is_empty())
            .or_else(|| self.id.map(|id| id.to_string()))?;
        let user_name = self.screen_name.filter(|s| !s.is_empty())?;
        Some(UserInfo { user_id, user_name })
    }
}

/// Validator backed by `GET <profile-url>?uid=<uid>`
pub struct HttpSessionValidator {
    client: Client,
    endpoint: Url,
    referer: Option<String>,
}

impl HttpSessionValidator {
    /// Creates a validator for the configured profile endpoint
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `api` - API configuration holding the profile URL
    /// * `uid` - Profile uid to query; may be empty
    pub fn new(client: Client, api: &ApiConfig, uid: &str) -> Result<Self, ConfigError> {
        let mut endpoint = Url::parse(&api.profile_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", api.profile_url, e)))?;
        endpoint.query_pairs_mut().append_pair("uid", uid);

        Ok(Self {
            client,
            endpoint,
            referer: api.referer.clone(),
        })
    }
}

#[async_trait]
impl SessionValidator for HttpSessionValidator {
    async fn validate(&self, credential: &Credential) -> Result<Validation, FetchError> {
        let mut request = self
            .client
            .get(self.endpoint.clone())
            .header(COOKIE, credential.cookie.as_str());
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer.as_str());
        }

        let response = request.send().await.map_err(FetchError::from_request)?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(status = status.as_u16(), "Session rejected by remote service");
            return Ok(Validation::rejected());
        }
        if FetchError::is_transient_status(status) {
            return Err(FetchError::Transient(format!(
                "profile endpoint returned HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Ok(Validation::rejected());
        }

        let body = response.text().await.map_err(FetchError::from_request)?;

        // A logged-out session is usually answered with an HTML login page
        let user = serde_json::from_str::<ProfileEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.data)
            .and_then(|data| data.user)
            .and_then(ProfileUser::into_user_info);

        match user {
            Some(user) => {
                tracing::debug!(user_id = %user.user_id, "Session is valid");
                Ok(Validation {
                    valid: true,
                    user: Some(user),
                })
            }
            None => {
                tracing::warn!("Profile response lacks identity fields");
                Ok(Validation::rejected())
            }
        }
    }
}
