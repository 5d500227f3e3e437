//! Ritual documents, listing filters and object key naming.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::profile::UserId;

/// Ritual systems offered by the upload form.
pub const KNOWN_SYSTEMS: &[&str] = &["Scottish", "French", "Emulation", "York"];

/// Languages offered by the upload form.
pub const KNOWN_LANGUAGES: &[&str] = &["Spanish", "English", "French", "Portuguese"];

/// Unique identifier for a ritual document.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RitualId(Uuid);

impl RitualId {
    /// Generate a new random ritual ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid ritual ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RitualId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RitualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RitualId({})", self.0)
    }
}

impl fmt::Display for RitualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ritual document: metadata row plus the public URL of its binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ritual {
    pub id: RitualId,
    pub name: String,
    /// Required viewer degree. `None` means unlisted: admins only.
    pub degree: Option<i32>,
    pub system: String,
    pub language: String,
    /// Display name of the author, not a member reference.
    pub author: String,
    pub file_url: String,
    /// Object store key of the binary. Missing on legacy rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Member who uploaded the document, if still known.
    pub owner_id: Option<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Listing filter. Every set field must match.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RitualFilter {
    pub degree: Option<i32>,
    pub system: Option<String>,
    pub language: Option<String>,
}

impl RitualFilter {
    /// Check whether a ritual passes this filter.
    pub fn matches(&self, ritual: &Ritual) -> bool {
        if let Some(degree) = self.degree
            && ritual.degree != Some(degree)
        {
            return false;
        }
        if let Some(system) = &self.system
            && &ritual.system != system
        {
            return false;
        }
        if let Some(language) = &self.language
            && &ritual.language != language
        {
            return false;
        }
        true
    }

    /// Filter and order a listing, newest first.
    pub fn apply(&self, rituals: Vec<Ritual>) -> Vec<Ritual> {
        let mut kept: Vec<Ritual> = rituals.into_iter().filter(|r| self.matches(r)).collect();
        kept.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        kept
    }
}

/// Grouping criterion for listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizeBy {
    #[default]
    Degree,
    System,
    Language,
}

impl OrganizeBy {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "degree" => Ok(Self::Degree),
            "system" => Ok(Self::System),
            "language" => Ok(Self::Language),
            _ => Err(crate::Error::InvalidGrouping(s.to_string())),
        }
    }

    /// Label of the group a ritual falls into.
    pub fn group_key(&self, ritual: &Ritual) -> String {
        match self {
            Self::Degree => match ritual.degree {
                Some(degree) => format!("Degree {degree}"),
                None => "Unlisted".to_string(),
            },
            Self::System => ritual.system.clone(),
            Self::Language => ritual.language.clone(),
        }
    }

    /// Group rituals by this criterion. Groups are ordered by label and keep
    /// the incoming order of their members.
    pub fn group(&self, rituals: &[Ritual]) -> BTreeMap<String, Vec<Ritual>> {
        let mut groups: BTreeMap<String, Vec<Ritual>> = BTreeMap::new();
        for ritual in rituals {
            groups
                .entry(self.group_key(ritual))
                .or_default()
                .push(ritual.clone());
        }
        groups
    }
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Object key for an uploaded binary:
/// `rituals/{degree|unknown}/{unix millis}-{sanitized name}`.
pub fn object_key(degree: Option<i32>, file_name: &str, at: OffsetDateTime) -> String {
    let folder = match degree {
        Some(degree) => degree.to_string(),
        None => "unknown".to_string(),
    };
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    format!(
        "rituals/{folder}/{millis}-{}",
        sanitize_file_name(file_name)
    )
}
