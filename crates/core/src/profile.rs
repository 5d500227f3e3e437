//! Member profiles, roles and degrees.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::MIN_DEGREE;

/// Identity of a member. The same value keys the credential and the profile.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a new random user ID.
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
            .map_err(|e| crate::Error::InvalidId(format!("invalid user ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application role of a member.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full back-office access.
    Admin,
    /// Regular member, gated by degree.
    #[default]
    User,
}

impl Role {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            _ => Err(crate::Error::InvalidRole(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Application-level record attached to a credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Access tier. `None` for legacy rows; treated as the lowest tier.
    pub degree: Option<i32>,
    pub lodge: Option<String>,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Profile {
    /// Check whether this profile carries the admin role.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Degree used for access decisions. A missing degree counts as 0.
    pub fn effective_degree(&self) -> i32 {
        self.degree.unwrap_or(0)
    }
}

/// Partial update of a profile. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub degree: Option<i32>,
    /// `Some(None)` clears the lodge.
    #[serde(default, with = "double_option")]
    pub lodge: Option<Option<String>>,
    pub role: Option<Role>,
}

impl ProfileChanges {
    /// True when nothing would change.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.degree.is_none()
            && self.lodge.is_none()
            && self.role.is_none()
    }

    /// True when only the display name is touched.
    pub fn touches_only_name(&self) -> bool {
        self.email.is_none() && self.degree.is_none() && self.lodge.is_none() && self.role.is_none()
    }

    /// Apply the changes to a profile in place.
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(name) = &self.name {
            profile.name = name.trim().to_string();
        }
        if let Some(email) = &self.email {
            profile.email = normalize_email(email);
        }
        if let Some(degree) = self.degree {
            profile.degree = Some(degree);
        }
        if let Some(lodge) = &self.lodge {
            profile.lodge = lodge.clone();
        }
        if let Some(role) = self.role {
            profile.role = role;
        }
    }

    /// Field-level validation. Returns the list of offending fields.
    pub fn validate(&self) -> crate::Result<()> {
        let mut problems = Vec::new();
        if let Some(name) = &self.name
            && name.trim().is_empty()
        {
            problems.push("name".to_string());
        }
        if let Some(email) = &self.email
            && !looks_like_email(email)
        {
            problems.push("email".to_string());
        }
        if let Some(degree) = self.degree
            && degree < MIN_DEGREE
        {
            problems.push("degree".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Validation(problems))
        }
    }
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Option<String>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<String>>, D::Error> {
        Option::<String>::deserialize(deserializer).map(Some)
    }
}

/// Canonical form of an email address: trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Minimal shape check: one `@` with something on both sides.
pub fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && domain.contains('.')
        }
        None => false,
    }
}

/// Validate a requested degree.
pub fn validate_degree(degree: i64) -> crate::Result<i32> {
    if degree < i64::from(MIN_DEGREE) || degree > i64::from(i32::MAX) {
        return Err(crate::Error::InvalidDegree(degree));
    }
    Ok(degree as i32)
}
