//! Per-session chat log: one JSON object per line, append-only.
//!
//! Only the session driver writes here; nodes see earlier turns through the
//! `conversation` field of the input state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{FinragError, Result};
use crate::workflow::ChatTurn;

/// One persisted exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub record_id: String,
    pub query: String,
    pub answer: String,
    /// Path or shortcut that produced the answer
    #[serde(rename = "type")]
    pub answer_type: String,
}

impl ChatRecord {
    pub fn new(query: impl Into<String>, answer: impl Into<String>, answer_type: impl Into<String>) -> Self {
        Self {
            record_id: Uuid::new_v4().to_string(),
            query: query.into(),
            answer: answer.into(),
            answer_type: answer_type.into(),
        }
    }
}

impl From<&ChatRecord> for ChatTurn {
    fn from(record: &ChatRecord) -> Self {
        ChatTurn {
            query: record.query.clone(),
            answer: record.answer.clone(),
        }
    }
}

/// Directory of `<session>.jsonl` files
#[derive(Debug, Clone)]
pub struct ChatLog {
    dir: PathBuf,
}

impl ChatLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FinragError::Session(format!("invalid session id '{session_id}'")));
        }
        Ok(self.dir.join(format!("{session_id}.jsonl")))
    }

    pub async fn append(&self, session_id: &str, record: &ChatRecord) -> Result<()> {
        let path = self.session_path(session_id)?;
        fs::create_dir_all(&self.dir).await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(session = %session_id, record = %record.record_id, "chat record appended");
        Ok(())
    }

    /// Records of a session in write order; empty for a new session.
    /// Lines that do not parse are skipped.
    pub async fn read(&self, session_id: &str) -> Result<Vec<ChatRecord>> {
        let path = self.session_path(session_id)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), line = number + 1, error = %err, "skipping bad chat record"),
            }
        }
        Ok(records)
    }

    /// Earlier turns of a session, oldest first
    pub async fn conversation(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        Ok(self.read(session_id).await?.iter().map(ChatTurn::from).collect())
    }
}
