use crate::services::token_cache::TokenCache;
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Control {
    pub label: String,
    pub action: String,
}

impl Control {
    pub fn new(label: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: action.into(),
        }
    }
}

fn serialize_bytes_base64<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub file_name: String,
    #[serde(rename = "data_base64", serialize_with = "serialize_bytes_base64")]
    pub data: Bytes,
}

/// A structured response: text plus rows of (label, action) controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    pub controls: Vec<Vec<Control>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn row(mut self, row: Vec<Control>) -> Self {
        if !row.is_empty() {
            self.controls.push(row);
        }
        self
    }

    pub fn button(self, label: impl Into<String>, action: impl Into<String>) -> Self {
        self.row(vec![Control::new(label, action)])
    }

    pub fn attach(mut self, file_name: impl Into<String>, data: Bytes) -> Self {
        self.attachment = Some(Attachment {
            file_name: file_name.into(),
            data,
        });
        self
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.controls
            .iter()
            .flat_map(|row| row.iter().map(|c| c.action.as_str()))
    }

    /// Finds the action behind a control label, for tests and scripted
    /// clients.
    pub fn action_for(&self, label: &str) -> Option<&str> {
        self.controls
            .iter()
            .flatten()
            .find(|c| c.label == label)
            .map(|c| c.action.as_str())
    }

    /// Replaces every oversized action identifier with its token.
    pub fn compact(mut self, tokens: &TokenCache) -> Self {
        for row in self.controls.iter_mut() {
            for control in row.iter_mut() {
                control.action = tokens.compact(&control.action);
            }
        }
        self
    }
}

/// The interactive surface the core answers through.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, operator: &str, reply: Reply) -> std::io::Result<()>;
}
