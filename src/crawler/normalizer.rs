//! Raw item decoding and normalization
//!
//! Every field of a raw item is optional on the wire. Absent fields map to
//! fixed defaults; only a missing id makes an item unusable.

use crate::crawler::FetchError;
use crate::storage::FavoriteRecord;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Placeholder body for posts that carry no text
pub const DEFAULT_TEXT: &str = "no text";

/// Wire format of `created_at`, e.g. `Tue Oct 14 09:30:00 +0800 2025`
const REMOTE_TIME_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Stored format of `created_at`, sortable as text
const STORED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One favorite as returned by the remote service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItem {
    pub idstr: Option<String>,
    pub mblogid: Option<String>,
    pub created_at: Option<String>,
    /// Rich body
    pub text: Option<String>,
    /// Plain body
    pub text_raw: Option<String>,
    #[serde(rename = "isLongText")]
    pub is_long_text: Option<bool>,
    pub url_struct: Option<Vec<RawLink>>,
    pub user: Option<RawUser>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLink {
    pub long_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUser {
    pub idstr: Option<String>,
    pub screen_name: Option<String>,
}

impl RawItem {
    /// The remote id, if present and non-empty
    pub fn id(&self) -> Option<&str> {
        self.idstr.as_deref().filter(|id| !id.is_empty())
    }
}

/// Maps a raw item into the canonical record
///
/// # Arguments
///
/// * `raw` - The decoded item
/// * `post_url_base` - Base used to build the post permalink
/// * `collected_at` - Ingestion timestamp stamped on the record
///
/// # Returns
///
/// * `Ok(FavoriteRecord)` - The normalized record
/// * `Err(FetchError::MalformedResponse)` - The item has no id
pub fn normalize(
    raw: &RawItem,
    post_url_base: &str,
    collected_at: DateTime<Utc>,
) -> Result<FavoriteRecord, FetchError> {
    let id = raw
        .id()
        .ok_or_else(|| FetchError::MalformedResponse("favorite without idstr".to_string()))?
        .to_string();

    let user_id = raw
        .user
        .as_ref()
        .and_then(|u| u.idstr.clone())
        .unwrap_or_default();
    let user_name = raw
        .user
        .as_ref()
        .and_then(|u| u.screen_name.clone())
        .unwrap_or_default();

    let url = match raw.mblogid.as_deref() {
        Some(mblogid) if !user_id.is_empty() && !mblogid.is_empty() => format!(
            "{}/{}/{}",
            post_url_base.trim_end_matches('/'),
            user_id,
            mblogid
        ),
        _ => String::new(),
    };

    let text = raw
        .text_raw
        .clone()
        .or_else(|| raw.text.clone())
        .unwrap_or_else(|| DEFAULT_TEXT.to_string());

    let links = raw
        .url_struct
        .iter()
        .flatten()
        .filter_map(|link| link.long_url.clone())
        .filter(|link| !link.is_empty())
        .collect();

    Ok(FavoriteRecord {
        id,
        mblogid: raw.mblogid.clone().unwrap_or_default(),
        created_at: raw
            .created_at
            .as_deref()
            .map(parse_created_at)
            .unwrap_or_default(),
        collected_at,
        url,
        user_id,
        user_name,
        text,
        text_html: raw.text.clone().unwrap_or_default(),
        is_long_text: raw.is_long_text.unwrap_or(false),
        links,
        source: raw.source.clone().unwrap_or_default(),
    })
}

/// Rewrites the remote timestamp in the poster's own offset
///
/// Unparseable values are kept verbatim.
pub fn parse_created_at(value: &str) -> String {
    match DateTime::parse_from_str(value, REMOTE_TIME_FORMAT) {
        Ok(time) => time.format(STORED_TIME_FORMAT).to_string(),
        Err(e) => {
            tracing::warn!("Unparseable created_at {:?}: {}", value, e);
            value.to_string()
        }
    }
}
