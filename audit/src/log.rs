//! File-backed audit log.
//!
//! Entries are appended as JSON lines. Each entry stores the hash of the one
//! before it, so editing or removing a line breaks every hash after it. The
//! chain head is recovered from disk on open, which lets a restarted process
//! keep extending the same chain.
//!
//! When the live file grows past `max_size_bytes` it is renamed to a
//! timestamped segment (`audit.20261019_101500123.log`, with a `_NNN` counter
//! when the millisecond is already taken) and a new live file is
//! started. The chain continues across segments. Only the newest
//! `max_rotations` segments are kept.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::entry::{AuditEntry, AuditEvent, GENESIS_HASH};
use crate::error::{AuditError, Result};
use crate::AuditRecorder;

/// Configuration for the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogConfig {
    /// Path to the live log file
    pub log_path: PathBuf,
    /// Size of the live file that triggers rotation
    pub max_size_bytes: u64,
    /// Number of rotated segments to keep
    pub max_rotations: u32,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("data/user-backend/audit.log"),
            max_size_bytes: 100 * 1024 * 1024,
            max_rotations: 10,
        }
    }
}

impl AuditLogConfig {
    /// Default layout under a data directory.
    pub fn in_data_dir(data_path: &Path) -> Self {
        Self {
            log_path: data_path.join("user-backend").join("audit.log"),
            ..Self::default()
        }
    }
}

/// Result of walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    Intact {
        entries: usize,
        segments: usize,
    },
    Broken {
        file: PathBuf,
        line: usize,
        reason: String,
    },
}

impl ChainVerification {
    pub fn is_intact(&self) -> bool {
        matches!(self, ChainVerification::Intact { .. })
    }
}

/// Append-only, hash-chained audit log on disk.
pub struct AuditLog {
    config: AuditLogConfig,
    /// Hash of the newest entry. Held across the file write so appends are
    /// serialized and the chain never forks.
    head: Mutex<String>,
}

impl AuditLog {
    /// Open (or create) the log described by `config`.
    pub fn open(config: AuditLogConfig) -> Result<Self> {
        if let Some(parent) = config.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let head = match Self::read_last_hash(&config.log_path)? {
            Some(hash) => hash,
            None => match Self::rotated_segments_of(&config.log_path)?.last() {
                Some(segment) => Self::read_last_hash(segment)?
                    .unwrap_or_else(|| GENESIS_HASH.to_string()),
                None => GENESIS_HASH.to_string(),
            },
        };
        debug!("Audit log {:?} opened, chain head {}", config.log_path, head);

        Ok(Self {
            config,
            head: Mutex::new(head),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.log_path
    }

    /// Append one event and return the sealed entry.
    pub async fn append(&self, event: AuditEvent) -> Result<AuditEntry> {
        let mut head = self.head.lock().await;

        self.rotate_if_needed()?;

        let entry = AuditEntry::seal(event, head.clone());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.log_path)?;
        let json = serde_json::to_string(&entry)?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        *head = entry.entry_hash.clone();

        info!(
            "Audit entry recorded: action={}, role={}, entity={}",
            entry.action, entry.actor_role, entry.entity
        );
        Ok(entry)
    }

    /// Newest entries, newest first.
    ///
    /// Starts with the live file and falls back through the rotated segments,
    /// newest segment first, until `limit` entries are collected.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut files = Self::rotated_segments_of(&self.config.log_path)?;
        files.push(self.config.log_path.clone());

        let mut collected = Vec::with_capacity(limit);
        for file in files.iter().rev() {
            if collected.len() >= limit {
                break;
            }
            let mut entries = Self::read_entries(file)?;
            entries.reverse();
            let wanted = limit - collected.len();
            collected.extend(entries.into_iter().take(wanted));
        }
        Ok(collected)
    }

    /// Verify every surviving segment and the live file, oldest first.
    ///
    /// A fresh log must start at the genesis hash. Once old segments have been
    /// pruned the oldest surviving entry becomes the anchor.
    pub fn verify_chain(&self) -> Result<ChainVerification> {
        let mut files = Self::rotated_segments_of(&self.config.log_path)?;
        let pruned = !files.is_empty();
        if self.config.log_path.exists() {
            files.push(self.config.log_path.clone());
        }

        let mut expected_previous: Option<String> = if pruned {
            None
        } else {
            Some(GENESIS_HASH.to_string())
        };
        let mut entries = 0;

        for file in &files {
            let reader = BufReader::new(File::open(file)?);
            for (index, line) in reader.lines().enumerate() {
                let line_number = index + 1;
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }

                let entry: AuditEntry = match serde_json::from_str(&line) {
                    Ok(entry) => entry,
                    Err(e) => {
                        return Ok(Self::broken(file, line_number, format!("unparseable: {}", e)))
                    }
                };

                if !entry.verify_hash() {
                    return Ok(Self::broken(
                        file,
                        line_number,
                        format!("hash mismatch for entry {}", entry.id),
                    ));
                }

                if let Some(expected) = &expected_previous {
                    if &entry.previous_hash != expected {
                        return Ok(Self::broken(
                            file,
                            line_number,
                            format!(
                                "expected previous hash {}, found {}",
                                expected, entry.previous_hash
                            ),
                        ));
                    }
                }

                expected_previous = Some(entry.entry_hash);
                entries += 1;
            }
        }

        info!(
            "Audit chain verified: {} entries across {} files",
            entries,
            files.len()
        );
        Ok(ChainVerification::Intact {
            entries,
            segments: files.len(),
        })
    }

    fn broken(file: &Path, line: usize, reason: String) -> ChainVerification {
        error!(
            "Audit chain broken in {:?} at line {}: {}",
            file, line, reason
        );
        ChainVerification::Broken {
            file: file.to_path_buf(),
            line,
            reason,
        }
    }

    fn rotate_if_needed(&self) -> Result<()> {
        let size = match std::fs::metadata(&self.config.log_path) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        if size >= self.config.max_size_bytes {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&self) -> Result<()> {
        let rotated_path = Self::free_segment_path(&self.config.log_path)?;

        std::fs::rename(&self.config.log_path, &rotated_path)?;
        info!("Rotated audit log to {:?}", rotated_path);

        let segments = Self::rotated_segments_of(&self.config.log_path)?;
        let excess = segments
            .len()
            .saturating_sub(self.config.max_rotations as usize);
        for old in segments.iter().take(excess) {
            std::fs::remove_file(old)?;
            info!("Removed old audit segment {:?}", old);
        }
        Ok(())
    }

    /// Segment name for a rotation happening now.
    ///
    /// Two rotations within the same millisecond get a `_NNN` counter, which
    /// still sorts after the plain name, so an existing segment is never
    /// replaced.
    fn free_segment_path(log_path: &Path) -> Result<PathBuf> {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%3f").to_string();
        let candidate = log_path.with_extension(format!("{}.log", timestamp));
        if !candidate.exists() {
            return Ok(candidate);
        }
        for n in 1..1000u32 {
            let candidate = log_path.with_extension(format!("{}_{:03}.log", timestamp, n));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(AuditError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free audit segment name for {}", timestamp),
        )))
    }

    /// Rotated segments of `log_path`, oldest first.
    fn rotated_segments_of(log_path: &Path) -> Result<Vec<PathBuf>> {
        let (Some(parent), Some(stem), Some(live_name)) = (
            log_path.parent(),
            log_path.file_stem().and_then(|s| s.to_str()),
            log_path.file_name().and_then(|s| s.to_str()),
        ) else {
            return Ok(Vec::new());
        };
        if !parent.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}.", stem);
        let mut segments: Vec<PathBuf> = std::fs::read_dir(parent)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| name.starts_with(&prefix) && name != live_name)
                    .unwrap_or(false)
            })
            .map(|entry| entry.path())
            .collect();
        // timestamps sort lexically
        segments.sort();
        Ok(segments)
    }

    fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(|e| AuditError::Corrupt {
                line: index + 1,
                reason: e.to_string(),
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn read_last_hash(path: &Path) -> Result<Option<String>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut last_hash = None;
        for line in BufReader::new(file).lines().map_while(|r| r.ok()) {
            if let Ok(entry) = serde_json::from_str::<AuditEntry>(&line) {
                last_hash = Some(entry.entry_hash);
            }
        }
        Ok(last_hash)
    }
}

#[async_trait]
impl AuditRecorder for AuditLog {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.append(event).await.map(|_| ())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        AuditLog::recent(self, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authz::Role;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AuditLogConfig {
        AuditLogConfig {
            log_path: dir.path().join("audit.log"),
            max_size_bytes: 1024 * 1024,
            max_rotations: 5,
        }
    }

    fn event(i: usize) -> AuditEvent {
        AuditEvent::new("announcement.create", Role::Admin, "announcement")
            .entity_id(format!("a{}", i))
    }

    #[tokio::test]
    async fn test_append_and_verify() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(config(&dir)).unwrap();

        let first = log.append(event(0)).await.unwrap();
        assert_eq!(first.previous_hash, GENESIS_HASH);
        let second = log.append(event(1)).await.unwrap();
        assert_eq!(second.previous_hash, first.entry_hash);

        assert_eq!(
            log.verify_chain().unwrap(),
            ChainVerification::Intact {
                entries: 2,
                segments: 1
            }
        );
    }

    #[tokio::test]
    async fn test_empty_log_is_intact() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(config(&dir)).unwrap();
        assert!(log.verify_chain().unwrap().is_intact());
        assert!(log.recent(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chain_continues_after_restart() {
        let dir = TempDir::new().unwrap();
        let last = {
            let log = AuditLog::open(config(&dir)).unwrap();
            log.append(event(0)).await.unwrap();
            log.append(event(1)).await.unwrap()
        };

        let reopened = AuditLog::open(config(&dir)).unwrap();
        let next = reopened.append(event(2)).await.unwrap();
        assert_eq!(next.previous_hash, last.entry_hash);
        assert!(reopened.verify_chain().unwrap().is_intact());
    }

    #[tokio::test]
    async fn test_tampered_line_detected() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(config(&dir)).unwrap();
        for i in 0..3 {
            log.append(event(i)).await.unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        let tampered = content.replacen("\"ADMIN\"", "\"MENTOR\"", 2);
        std::fs::write(log.path(), tampered).unwrap();

        match log.verify_chain().unwrap() {
            ChainVerification::Broken { line, .. } => assert_eq!(line, 1),
            other => panic!("expected broken chain, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deleted_line_detected() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(config(&dir)).unwrap();
        for i in 0..3 {
            log.append(event(i)).await.unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        let kept: Vec<&str> = content
            .lines()
            .enumerate()
            .filter(|(i, _)| *i != 1)
            .map(|(_, l)| l)
            .collect();
        std::fs::write(log.path(), kept.join("\n") + "\n").unwrap();

        match log.verify_chain().unwrap() {
            ChainVerification::Broken { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("previous hash"));
            }
            other => panic!("expected broken chain, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(config(&dir)).unwrap();
        for i in 0..5 {
            log.append(event(i)).await.unwrap();
        }

        let recent = log.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entity_id.as_deref(), Some("a4"));
        assert_eq!(recent[1].entity_id.as_deref(), Some("a3"));
    }

    #[tokio::test]
    async fn test_recent_reads_rotated_segments() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(AuditLogConfig {
            max_size_bytes: 1,
            ..config(&dir)
        })
        .unwrap();
        for i in 0..5 {
            log.append(event(i)).await.unwrap();
        }
        assert_eq!(AuditLog::rotated_segments_of(log.path()).unwrap().len(), 4);

        let recent = log.recent(3).unwrap();
        let ids: Vec<_> = recent.iter().map(|e| e.entity_id.as_deref()).collect();
        assert_eq!(ids, vec![Some("a4"), Some("a3"), Some("a2")]);

        assert_eq!(log.recent(50).unwrap().len(), 5);
        assert!(log.recent(0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_never_replaces_a_segment() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::open(AuditLogConfig {
            max_size_bytes: 1,
            max_rotations: 100,
            ..config(&dir)
        })
        .unwrap();
        // no sleeps: several rotations land in the same millisecond
        for i in 0..20 {
            log.append(event(i)).await.unwrap();
        }

        assert_eq!(AuditLog::rotated_segments_of(log.path()).unwrap().len(), 19);
        assert_eq!(
            log.verify_chain().unwrap(),
            ChainVerification::Intact {
                entries: 20,
                segments: 20
            }
        );
    }

    #[tokio::test]
    async fn test_rotation_keeps_chain() {
        let dir = TempDir::new().unwrap();
        let config = AuditLogConfig {
            max_size_bytes: 1,
            max_rotations: 2,
            ..config(&dir)
        };
        let log = AuditLog::open(config).unwrap();

        let mut last = None;
        for i in 0..5 {
            last = Some(log.append(event(i)).await.unwrap());
        }

        let segments = AuditLog::rotated_segments_of(log.path()).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(log.verify_chain().unwrap().is_intact());

        let reopened = AuditLog::open(AuditLogConfig {
            log_path: log.path().to_path_buf(),
            max_size_bytes: 1024 * 1024,
            max_rotations: 2,
        })
        .unwrap();
        let next = reopened.append(event(9)).await.unwrap();
        assert_eq!(next.previous_hash, last.unwrap().entry_hash);
    }
}
