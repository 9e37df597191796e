//! Logical upload destinations such as `dishes/42`.
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::error::UploadError;

/// Segment used in place of a parent id that does not exist yet.
pub const PLACEHOLDER_SEGMENT: &str = "_new";

static CONTAINER_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*(/([A-Za-z0-9][A-Za-z0-9_.-]*|_new))*$")
        .expect("valid container regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct TargetContainer(String);

impl TargetContainer {
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        let trimmed = raw.trim().trim_matches('/');
        if !CONTAINER_PATH.is_match(trimmed) || trimmed.split('/').any(|s| s == "..") {
            return Err(UploadError::InvalidContainer {
                path: raw.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// `collection/parent_id`, or `collection/_new/<uuid>` when the parent
    /// record has not been created yet.
    pub fn for_parent(collection: &str, parent_id: Option<&str>) -> Result<Self, UploadError> {
        match parent_id {
            Some(id) => Self::parse(&format!("{}/{}", collection.trim_matches('/'), id)),
            None => Self::parse(&format!(
                "{}/{}/{}",
                collection.trim_matches('/'),
                PLACEHOLDER_SEGMENT,
                Uuid::new_v4().simple()
            )),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.split('/').any(|s| s == PLACEHOLDER_SEGMENT)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<TargetContainer> for String {
    fn from(c: TargetContainer) -> Self {
        c.0
    }
}

impl fmt::Display for TargetContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
