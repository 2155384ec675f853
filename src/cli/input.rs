//! Comment Input Loading
//!
//! Reads comment rows from a JSON array, JSON Lines, or a YAML list. Rows
//! may be full records or bare strings (numbered by position).

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::types::{CommentRecord, LensError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    JsonLines,
    Yaml,
}

impl InputFormat {
    /// Format from the file extension, falling back to sniffing the content
    pub fn detect(path: &Path, content: &str) -> Self {
        match path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref() {
            Some("jsonl" | "ndjson") => Self::JsonLines,
            Some("yaml" | "yml") => Self::Yaml,
            Some("json") if !content.trim_start().starts_with('[') => Self::JsonLines,
            Some("json") => Self::Json,
            _ => match content.trim_start().chars().next() {
                Some('[') => Self::Json,
                Some('{') => Self::JsonLines,
                _ => Self::Yaml,
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputRow {
    Record(CommentRecord),
    Text(String),
}

impl InputRow {
    fn into_record(self, position: usize) -> CommentRecord {
        match self {
            InputRow::Record(record) => record,
            InputRow::Text(text) => CommentRecord::new(position, text),
        }
    }
}

pub fn load_comments(path: &Path) -> Result<Vec<CommentRecord>> {
    let content = fs::read_to_string(path).map_err(|e| {
        LensError::input(format!("cannot read input {}: {}", path.display(), e))
    })?;
    parse_comments(&content, InputFormat::detect(path, &content))
}

pub fn parse_comments(content: &str, format: InputFormat) -> Result<Vec<CommentRecord>> {
    let rows: Vec<InputRow> = match format {
        InputFormat::Json => serde_json::from_str(content)?,
        InputFormat::Yaml => serde_yaml::from_str(content)?,
        InputFormat::JsonLines => content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line).map_err(|e| {
                    LensError::input(format!("line {}: {}", number + 1, e))
                })
            })
            .collect::<Result<_>>()?,
    };

    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(position, row)| row.into_record(position))
        .collect())
}
