use std::error::Error;
use std::fmt;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::store::Record;

const IMPORT_PARAM: &str = "import";

/// What survives a share: only the label and its category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedItem {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "c")]
    pub category: String,
}

impl From<&Record> for SharedItem {
    fn from(value: &Record) -> Self {
        Self {
            name: value.name.clone(),
            category: value.category.clone(),
        }
    }
}

#[derive(Debug)]
pub enum ShareError {
    MissingPayload,
    Base64(base64::DecodeError),
    Json(serde_json::Error),
}

impl fmt::Display for ShareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareError::MissingPayload => write!(f, "share link has no import payload"),
            ShareError::Base64(err) => write!(f, "share payload is not valid base64: {}", err),
            ShareError::Json(err) => write!(f, "share payload is not a valid list: {}", err),
        }
    }
}

impl Error for ShareError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ShareError::MissingPayload => None,
            ShareError::Base64(err) => Some(err),
            ShareError::Json(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for ShareError {
    fn from(value: serde_json::Error) -> Self {
        ShareError::Json(value)
    }
}

/// Standard-alphabet base64 of the JSON list, readable by `atob`.
pub fn encode(records: &[Record]) -> Result<String, ShareError> {
    let items = records.iter().map(SharedItem::from).collect::<Vec<_>>();
    let json = serde_json::to_vec(&items)?;
    Ok(STANDARD.encode(json))
}

pub fn share_link(base_url: &str, records: &[Record]) -> Result<String, ShareError> {
    let payload = escape_query_value(&encode(records)?);
    let separator = if base_url.contains('?') { '&' } else { '?' };
    Ok(format!("{base_url}{separator}{IMPORT_PARAM}={payload}"))
}

fn escape_query_value(payload: &str) -> String {
    let mut escaped = String::with_capacity(payload.len());
    for ch in payload.chars() {
        match ch {
            '+' => escaped.push_str("%2B"),
            '/' => escaped.push_str("%2F"),
            '=' => escaped.push_str("%3D"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Accepts a full share link or a bare payload in either base64 alphabet.
pub fn decode(input: &str) -> Result<Vec<SharedItem>, ShareError> {
    let payload = extract_payload(input.trim()).ok_or(ShareError::MissingPayload)?;
    let bytes = decode_base64(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn extract_payload(input: &str) -> Option<&str> {
    if input.is_empty() {
        return None;
    }
    let Some((_, query)) = input.split_once('?') else {
        return Some(input);
    };
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == IMPORT_PARAM)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, ShareError> {
    // Standard-alphabet links may arrive with `%2B`/`%2F`/`%3D` escapes.
    let unescaped = payload
        .replace("%2B", "+")
        .replace("%2b", "+")
        .replace("%2F", "/")
        .replace("%2f", "/")
        .replace("%3D", "=")
        .replace("%3d", "=");
    let engines = [&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];
    let mut last_err = None;
    for engine in engines {
        match engine.decode(&unescaped) {
            Ok(bytes) => return Ok(bytes),
            Err(err) => last_err = Some(err),
        }
    }
    Err(ShareError::Base64(
        last_err.unwrap_or(base64::DecodeError::InvalidLength(unescaped.len())),
    ))
}
