//! Tag domain model and name normalization.
//!
//! # Invariants
//! - Stored tag names are always in normalized form
//!   (see [`normalize_tag_name`]).
//! - `validate_tag_name` runs on the raw input, before normalization.

use crate::model::error::{DomainError, DomainResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum tag name length in characters, measured before normalization.
pub const MAX_TAG_NAME_LEN: usize = 50;

/// Creator id attributed to tags created implicitly by `find_or_create_tag`.
pub const SYSTEM_CREATOR_ID: &str = "system";

/// Palette used for tags that are created without an explicit color.
pub const DEFAULT_TAG_COLORS: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8E8", "#F7DC6F",
    "#BB8FCE", "#85C1E9",
];

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex must compile"));

/// Lowercases, trims and replaces each internal whitespace run with `-`.
///
/// `"  Very  Important "` becomes `"very-important"`.
pub fn normalize_tag_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    WHITESPACE_RE.replace_all(&lowered, "-").into_owned()
}

/// Checks raw tag input: non-blank, bounded length, restricted alphabet.
pub fn validate_tag_name(raw: &str) -> DomainResult<()> {
    if raw.trim().is_empty() {
        return Err(DomainError::invalid_field("name", "tag name is required"));
    }
    if raw.chars().count() > MAX_TAG_NAME_LEN {
        return Err(DomainError::invalid_field(
            "name",
            format!("tag name must be at most {MAX_TAG_NAME_LEN} characters"),
        ));
    }
    let allowed = |ch: char| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ' ');
    if !raw.chars().all(allowed) {
        return Err(DomainError::invalid_field(
            "name",
            "tag name may only contain letters, digits, spaces, '-' and '_'",
        ));
    }
    Ok(())
}

/// Free-form label attached to tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
    pub creator_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub is_deleted: bool,
    pub deleted_at: Option<i64>,
}

impl Tag {
    pub fn new(name: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            color: String::new(),
            creator_id: creator_id.into(),
            created_at: 0,
            updated_at: 0,
            version: 0,
            is_deleted: false,
            deleted_at: None,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid_field("name", "tag name is required"));
        }
        if self.creator_id.trim().is_empty() {
            return Err(DomainError::invalid_field("creator_id", "tag creator is required"));
        }
        Ok(())
    }
}
