//! Vault source: note enumeration and metadata extraction
//!
//! A vault is a directory tree of markdown notes. Each note is captured
//! as a typed record whose file identity (filesystem facts) and custom
//! metadata (YAML frontmatter, inline `key:: value` fields) are separate
//! sub-structures from the point of extraction, so nothing has to be
//! stripped out of a shared bag later.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Keys that would collide with the file-identity and positional
/// sub-structures of the destination row. Removed from custom metadata
/// when a note's frontmatter shadows them.
pub const RESERVED_KEYS: &[&str] = &["file", "position"];

/// Filesystem-derived identity of a note.
#[derive(Debug, Clone, Serialize)]
pub struct FileIdentity {
    pub name: String,
    pub path: String,
    pub folder: String,
    pub extension: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctime: Option<DateTime<Local>>,
    pub mtime: DateTime<Local>,
    pub tags: Vec<String>,
}

/// One note captured from the vault at a point in time.
#[derive(Debug, Clone)]
pub struct VaultNote {
    /// Vault-relative path, `/`-separated.
    pub path: String,
    pub identity: FileIdentity,
    /// Frontmatter and inline fields, reserved keys already removed.
    pub custom: Map<String, Value>,
    pub content: String,
}

/// A markdown vault rooted at a directory.
#[derive(Debug, Clone)]
pub struct Vault {
    root: PathBuf,
}

impl Vault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate all markdown notes in the vault, recursively.
    ///
    /// Hidden directories (`.obsidian` and friends) are skipped, as are
    /// non-markdown files. Results are sorted by path for consistent
    /// ordering across runs.
    pub async fn notes(&self) -> Result<Vec<VaultNote>> {
        let mut pending = vec![self.root.clone()];
        let mut files = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("Failed to read vault directory: {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = entry.metadata().await.with_context(|| {
                    format!("Failed to get metadata for: {}", path.display())
                })?;

                if metadata.is_dir() {
                    let hidden = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .map(|name| name.starts_with('.'))
                        .unwrap_or(false);
                    if !hidden {
                        pending.push(path);
                    }
                } else if path.extension().and_then(|ext| ext.to_str()) == Some("md") {
                    files.push(path);
                }
            }
        }

        files.sort();
        debug!("Found {} notes in vault: {}", files.len(), self.root.display());

        let mut notes = Vec::with_capacity(files.len());
        for path in &files {
            notes.push(self.read_note(path).await?);
        }
        Ok(notes)
    }

    /// Load a single note by path, absolute or vault-relative.
    pub async fn note(&self, path: &Path) -> Result<VaultNote> {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        self.read_note(&abs).await
    }

    async fn read_note(&self, abs: &Path) -> Result<VaultNote> {
        let metadata = tokio::fs::metadata(abs)
            .await
            .with_context(|| format!("Failed to stat note: {}", abs.display()))?;
        let content = tokio::fs::read_to_string(abs)
            .await
            .with_context(|| format!("Failed to read note: {}", abs.display()))?;

        let rel = abs.strip_prefix(&self.root).unwrap_or(abs);
        let path = rel
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        let folder = rel
            .parent()
            .map(|p| p.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"))
            .unwrap_or_default();
        let name = abs
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();
        let extension = abs
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();

        let mtime: DateTime<Local> = metadata
            .modified()
            .with_context(|| format!("No modification time for: {}", abs.display()))?
            .into();
        let ctime = metadata.created().ok().map(DateTime::<Local>::from);

        let (custom, tags) = parse_note_body(&content);

        let identity = FileIdentity {
            name,
            path: path.clone(),
            folder,
            extension,
            size: metadata.len(),
            ctime,
            mtime,
            tags,
        };

        Ok(VaultNote {
            path,
            identity,
            custom,
            content,
        })
    }
}

/// Extract custom metadata and tags from a note body.
///
/// Custom metadata comes from the YAML frontmatter block plus inline
/// `key:: value` fields; tags come from the frontmatter `tags` key plus
/// `#tag` tokens in the body. Reserved keys are removed from the custom
/// map before it is returned.
fn parse_note_body(content: &str) -> (Map<String, Value>, Vec<String>) {
    let mut custom = Map::new();
    let mut tags = Vec::new();

    let (frontmatter, body) = split_frontmatter(content);
    if let Some(frontmatter) = frontmatter {
        match serde_yaml::from_str::<serde_yaml::Value>(frontmatter) {
            Ok(parsed) => match serde_json::to_value(parsed) {
                Ok(Value::Object(map)) => custom.extend(map),
                Ok(_) => {}
                Err(err) => warn!("Ignoring unconvertible frontmatter: {err}"),
            },
            Err(err) => warn!("Ignoring malformed frontmatter: {err}"),
        }
    }

    for line in body.lines() {
        if let Some((key, value)) = line.split_once("::") {
            let key = key.trim();
            if is_inline_key(key) {
                custom.insert(key.to_string(), parse_inline_value(value.trim()));
            }
        }
        collect_tags(line, &mut tags);
    }

    tags.extend(frontmatter_tags(&custom));
    tags.sort();
    tags.dedup();

    for key in RESERVED_KEYS {
        custom.remove(*key);
    }

    (custom, tags)
}

/// Split off a leading YAML frontmatter block delimited by `---` lines.
/// Returns the block contents (without fences) and the remaining body.
fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let rest = match content.strip_prefix("---") {
        Some(rest) => rest,
        None => return (None, content),
    };
    let rest = match rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) {
        Some(rest) => rest,
        None => return (None, content),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            return (Some(&rest[..offset]), &rest[offset + line.len()..]);
        }
        offset += line.len();
    }

    // Unterminated fence, treat the whole content as body
    (None, content)
}

fn is_inline_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_')
}

/// Inline field values keep their scalar type where it is unambiguous.
fn parse_inline_value(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn collect_tags(line: &str, out: &mut Vec<String>) {
    for token in line.split_whitespace() {
        if let Some(tag) = token.strip_prefix('#') {
            let tag = tag.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '/'));
            let valid = tag.chars().next().is_some_and(|c| c.is_alphabetic())
                && tag
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '/' || c == '-' || c == '_');
            if valid {
                out.push(tag.to_string());
            }
        }
    }
}

fn frontmatter_tags(custom: &Map<String, Value>) -> Vec<String> {
    match custom.get("tags") {
        Some(Value::String(s)) => s
            .split([',', ' '])
            .map(|tag| tag.trim().trim_start_matches('#'))
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(|tag| tag.trim_start_matches('#').to_string())
            .collect(),
        _ => Vec::new(),
    }
}
