//! Conversation history
//!
//! The session keeps an in-memory [`Conversation`] for building backend
//! requests. Every entry is also appended to a [`ConversationStore`] so the
//! history survives restarts. Both keep the last [`HISTORY_LIMIT`] entries.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Entries kept in memory and in the log; older ones are dropped
pub const HISTORY_LIMIT: usize = 200;

/// Who said it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the assistant
    User,
    /// The assistant
    Assistant,
}

impl Role {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Speaker
    pub role: Role,
    /// What was said
    pub text: String,
    /// When it was recorded
    pub at: DateTime<Utc>,
}

impl ConversationEntry {
    /// Entry spoken by the user
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    /// Entry spoken by the assistant
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// In-memory conversation, oldest first
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    entries: VecDeque<ConversationEntry>,
    capacity: Option<usize>,
}

impl Conversation {
    /// Unbounded conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation that keeps at most `capacity` entries
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    /// Append an entry, evicting the oldest past capacity
    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push_back(entry);
        if let Some(cap) = self.capacity {
            while self.entries.len() > cap {
                self.entries.pop_front();
            }
        }
    }

    /// The last `n` entries, oldest first
    #[must_use]
    pub fn window(&self, n: usize) -> Vec<ConversationEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All entries, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been said yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extend<ConversationEntry> for Conversation {
    fn extend<I: IntoIterator<Item = ConversationEntry>>(&mut self, iter: I) {
        for entry in iter {
            self.push(entry);
        }
    }
}

/// Durable conversation log
pub trait ConversationStore {
    /// Append one entry
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be persisted
    fn append(&mut self, entry: &ConversationEntry) -> Result<()>;

    /// Load every entry, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be read
    fn load(&self) -> Result<Vec<ConversationEntry>>;
}

/// Store that forgets everything on exit
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: Vec<ConversationEntry>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryStore {
    fn append(&mut self, entry: &ConversationEntry) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<ConversationEntry>> {
        Ok(self.entries.clone())
    }
}

/// File name of the conversation log inside the data directory
pub const CONVERSATION_FILE: &str = "conversation.jsonl";

/// Store backed by a JSON Lines file
///
/// The log is append-only between compactions. Once it holds twice the
/// retention limit it is rewritten with only the newest entries, so it never
/// grows past `2 * keep` lines.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
    keep: usize,
    lines: usize,
}

impl JsonlStore {
    /// Open (or create) the log at `path`, keeping [`HISTORY_LIMIT`] entries
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory cannot be created
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_limit(path, HISTORY_LIMIT)
    }

    /// Open (or create) the log at `path`, keeping the newest `keep` entries
    ///
    /// A log already longer than `keep` is compacted right away.
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory cannot be created
    pub fn with_limit(path: impl Into<PathBuf>, keep: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut store = Self {
            path,
            keep: keep.max(1),
            lines: 0,
        };
        match store.read() {
            Ok((_, lines)) => store.lines = lines,
            Err(e) => tracing::warn!(path = %store.path.display(), error = %e, "conversation log unreadable"),
        }
        if store.lines > store.keep {
            if let Err(e) = store.compact() {
                tracing::warn!(path = %store.path.display(), error = %e, "conversation log compaction failed");
            }
        }

        tracing::debug!(path = %store.path.display(), lines = store.lines, "conversation log opened");
        Ok(store)
    }

    /// Open the default log inside `data_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        Self::open(data_dir.join(CONVERSATION_FILE))
    }

    /// Path of the log file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed entries and the number of non-blank lines in the log
    fn read(&self) -> Result<(Vec<ConversationEntry>, usize)> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(Error::Storage(format!("{}: {e}", self.path.display()))),
        };

        let mut entries = Vec::new();
        let mut lines = 0;
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(line = number + 1, error = %e, "skipping corrupt conversation entry"),
            }
        }

        Ok((entries, lines))
    }

    /// Rewrite the log with only the newest `keep` entries
    fn compact(&mut self) -> Result<()> {
        let (mut entries, before) = self.read()?;
        let skip = entries.len().saturating_sub(self.keep);
        entries.drain(..skip);

        let staging = self.path.with_extension("jsonl.tmp");
        {
            let file = File::create(&staging).map_err(|e| Error::Storage(format!("{}: {e}", staging.display())))?;
            let mut writer = BufWriter::new(file);
            for entry in &entries {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        std::fs::rename(&staging, &self.path).map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))?;

        self.lines = entries.len();
        tracing::debug!(before, after = self.lines, "conversation log compacted");
        Ok(())
    }
}

impl ConversationStore for JsonlStore {
    fn append(&mut self, entry: &ConversationEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Storage(format!("{}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())?;
        drop(file);

        self.lines += 1;
        if self.lines >= self.keep * 2 {
            self.compact()?;
        }
        Ok(())
    }

    fn load(&self) -> Result<Vec<ConversationEntry>> {
        let (mut entries, _) = self.read()?;
        let skip = entries.len().saturating_sub(self.keep);
        entries.drain(..skip);
        Ok(entries)
    }
}
