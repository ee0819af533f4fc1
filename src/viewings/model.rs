//! Future viewing records and the input they are created from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Maximum length of `name`, in characters.
pub const MAX_NAME_LEN: usize = 200;
/// Maximum length of `content`, in characters.
pub const MAX_CONTENT_LEN: usize = 4000;
/// Accepted `age` range.
pub const AGE_RANGE: std::ops::RangeInclusive<i32> = 0..=150;

/// Processing state of a viewing.
///
/// `Pending` moves exactly once to `Completed` or `Failed`; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Accepted, image not produced yet.
    Pending,
    /// Image produced; `image_url` is set.
    Completed,
    /// Generation or storage failed. Not retried.
    Failed,
}

impl ProcessingStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown processing status: {}", s)),
        }
    }
}

/// User-submitted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutureViewingInput {
    pub name: String,
    pub age: i32,
    pub content: String,
}

impl FutureViewingInput {
    pub fn new(name: impl Into<String>, age: i32, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age,
            content: content.into(),
        }
    }

    /// Check field bounds. Called before anything is persisted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_text("name", &self.name, MAX_NAME_LEN)?;
        check_text("content", &self.content, MAX_CONTENT_LEN)?;

        if !AGE_RANGE.contains(&self.age) {
            return Err(ValidationError::OutOfRange {
                field: "age",
                value: self.age as i64,
                min: *AGE_RANGE.start() as i64,
                max: *AGE_RANGE.end() as i64,
            });
        }
        Ok(())
    }

    /// Image prompt. Deterministic in the input fields.
    pub fn prompt(&self) -> String {
        build_prompt(&self.name, self.age, &self.content)
    }
}

/// Prompt sent to the image generator for a viewing.
pub fn build_prompt(name: &str, age: i32, content: &str) -> String {
    format!(
        "Imagen para {} de {} años que se imagina el futuro de la siguiente forma: {}",
        name, age, content
    )
}

fn check_text(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required { field });
    }
    let length = value.chars().count();
    if length > max {
        return Err(ValidationError::TooLong { field, length, max });
    }
    Ok(())
}

/// A persisted viewing and its processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FutureViewing {
    pub id: Uuid,
    pub name: String,
    pub age: i32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Set only once `status` is `Completed`.
    pub image_url: Option<String>,
    pub status: ProcessingStatus,
    pub has_been_viewed: bool,
}

impl FutureViewing {
    /// Create a new pending viewing from already validated input.
    pub fn new(input: FutureViewingInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            age: input.age,
            content: input.content,
            created_at: Utc::now(),
            image_url: None,
            status: ProcessingStatus::Pending,
            has_been_viewed: false,
        }
    }

    /// Override the creation timestamp (for imports and tests).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
