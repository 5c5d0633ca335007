//! The `Item` entity and its identifier.
//!
//! An `Item` represents a file or directory as seen by exactly one provider.
//! Its `id` is the sole handle on which all subsequent operations on the
//! item depend; `filename` is display-only and is never treated as a path.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Opaque, provider-specific identifier for an [`Item`].
///
/// Never shared across providers: the same string means nothing to a
/// different backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Builds an `ItemId`, rejecting the empty string.
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidId`] if `id` is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidId("item id cannot be empty".into()));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Size or timestamp fields that a provider may not be able to supply.
///
/// Kept as a dedicated type (rather than `Option<u64>` everywhere) so call
/// sites read as "unknown", matching the vocabulary used in the provider
/// contract and the wire formats that omit these fields outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaybeKnown<T> {
    Known(T),
    Unknown,
}

impl<T> MaybeKnown<T> {
    pub fn known(&self) -> Option<&T> {
        match self {
            MaybeKnown::Known(v) => Some(v),
            MaybeKnown::Unknown => None,
        }
    }
}

impl<T> From<Option<T>> for MaybeKnown<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => MaybeKnown::Known(v),
            None => MaybeKnown::Unknown,
        }
    }
}

/// The kind of remote object an [`Item`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Image,
    Audio,
    Video,
    Directory,
    Unknown,
}

impl ItemType {
    #[must_use]
    pub fn is_directory(self) -> bool {
        matches!(self, ItemType::Directory)
    }

    /// Classifies a filename by extension, the same heuristic every
    /// provider adapter falls back to when the remote metadata doesn't
    /// carry an explicit MIME type.
    #[must_use]
    pub fn from_filename(name: &str) -> Self {
        let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "heic" => ItemType::Image,
            "mp3" | "flac" | "wav" | "ogg" | "m4a" | "aac" => ItemType::Audio,
            "mp4" | "mkv" | "avi" | "mov" | "webm" => ItemType::Video,
            "" => ItemType::Unknown,
            _ => ItemType::File,
        }
    }
}

/// A file or directory as addressed by a single provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub filename: String,
    pub size: MaybeKnown<u64>,
    pub timestamp: MaybeKnown<DateTime<Utc>>,
    pub item_type: ItemType,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl Item {
    /// Convenience constructor for a directory item, used by `mkdir`
    /// response parsers across every provider adapter.
    #[must_use]
    pub fn directory(id: ItemId, filename: impl Into<String>) -> Self {
        Self {
            id,
            filename: filename.into(),
            size: MaybeKnown::Unknown,
            timestamp: MaybeKnown::Unknown,
            item_type: ItemType::Directory,
            url: None,
            thumbnail_url: None,
        }
    }
}
