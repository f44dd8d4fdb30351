// ABOUTME: Row types for projects, messages and fragments
// ABOUTME: Includes role/type enums with their database string forms

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::StorageError;

/// Generated files keyed by sandbox path
pub type FileMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, StorageError> {
        match s {
            "USER" => Ok(Self::User),
            "ASSISTANT" => Ok(Self::Assistant),
            _ => Err(StorageError::InvalidInput(format!("Unknown role: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Result,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Result => "RESULT",
            Self::Error => "ERROR",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, StorageError> {
        match s {
            "RESULT" => Ok(Self::Result),
            "ERROR" => Ok(Self::Error),
            _ => Err(StorageError::InvalidInput(format!(
                "Unknown message type: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub project_id: String,
    pub role: MessageRole,
    pub message_type: MessageType,
    pub content: String,
}

impl NewMessage {
    pub fn user(project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            role: MessageRole::User,
            message_type: MessageType::Result,
            content: content.into(),
        }
    }

    pub fn assistant(
        project_id: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            role: MessageRole::Assistant,
            message_type,
            content: content.into(),
        }
    }
}

/// Persisted snapshot of a run's output plus the sandbox serving its preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: String,
    pub message_id: String,
    pub sandbox_id: Option<String>,
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
    /// Only set when the sandbox was created by the run that produced this fragment
    pub sandbox_created_at: Option<DateTime<Utc>>,
    pub sandbox_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFragment {
    pub sandbox_id: String,
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
    pub sandbox_created_at: Option<DateTime<Utc>>,
    pub sandbox_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWithFragment {
    #[serde(flatten)]
    pub message: Message,
    pub fragment: Option<Fragment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::from_str(role.as_str()).unwrap(), role);
        }
        assert!(MessageRole::from_str("system").is_err());
    }

    #[test]
    fn test_message_type_serializes_uppercase() {
        let json = serde_json::to_string(&MessageType::Error).unwrap();
        assert_eq!(json, "\"ERROR\"");
        assert!(MessageType::from_str("error").is_err());
    }
}
