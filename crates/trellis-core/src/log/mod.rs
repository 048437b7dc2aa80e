//! Command log
//!
//! Prepared transactions append their commands here before commit, and a
//! commit entry is forced to disk before any store is touched. Recovery
//! replays every transaction that reached its commit entry.
//!
//! Each entry is framed as `[length:4][payload:N][crc32:4]`, the payload
//! being a bincode encoded [`LogEntry`] and the CRC32 covering length and
//! payload. A torn or corrupt tail ends the log and is cut off when the
//! log is opened, so later appends stay readable.

use crate::transaction::{Command, CommandSet};
use crate::{Error, Result};
use crc32fast::Hasher;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const FRAME_OVERHEAD: usize = 8;

/// One log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// A transaction starts writing commands
    Start {
        /// Transaction identifier
        identifier: u64,
    },
    /// One command of a transaction
    Command {
        /// Transaction identifier
        identifier: u64,
        /// The command
        command: Command,
    },
    /// The transaction committed as `tx_id`
    Commit {
        /// Transaction identifier
        identifier: u64,
        /// Commit transaction id
        tx_id: u64,
    },
    /// The prepared transaction rolled back
    Rollback {
        /// Transaction identifier
        identifier: u64,
    },
}

impl LogEntry {
    /// Identifier of the transaction the entry belongs to
    pub fn identifier(&self) -> u64 {
        match self {
            LogEntry::Start { identifier }
            | LogEntry::Command { identifier, .. }
            | LogEntry::Commit { identifier, .. }
            | LogEntry::Rollback { identifier } => *identifier,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let mut buf = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
        Ok(buf)
    }
}

/// A committed transaction read back from the log
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredTransaction {
    /// Transaction identifier
    pub identifier: u64,
    /// Commit transaction id
    pub tx_id: u64,
    /// Commands in log order
    pub commands: CommandSet,
}

/// Append-only command log file
pub struct CommandLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl CommandLog {
    /// Open or create the log at `path`, cutting off a torn or corrupt tail
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let len = file.metadata()?.len();
        let (entries, valid_len) = scan(&path, &mut file)?;
        if valid_len < len {
            tracing::warn!(
                "Truncating command log {:?} from {} to {} bytes",
                path,
                len,
                valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        tracing::debug!(
            "Opened command log {:?} ({} entries, {} bytes)",
            path,
            entries.len(),
            valid_len
        );
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        self.write_frames(&entry.encode()?)
    }

    /// Write whole frames; a failed write is cut back off
    fn write_frames(&self, frames: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        if let Err(e) = file.write_all(frames) {
            if let Err(restore) = file.set_len(len) {
                tracing::error!(
                    "Could not cut partial write off {:?}: {}",
                    self.path,
                    restore
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Current log size in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Whether the log holds no bytes
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append the start entry and every command of a prepared transaction
    pub fn append_prepared(&self, identifier: u64, commands: &[Command]) -> Result<()> {
        let mut frames = LogEntry::Start { identifier }.encode()?;
        for command in commands {
            frames.extend(
                LogEntry::Command {
                    identifier,
                    command: command.clone(),
                }
                .encode()?,
            );
        }
        self.write_frames(&frames)?;
        tracing::debug!(
            "Logged {} commands of transaction {}",
            commands.len(),
            identifier
        );
        Ok(())
    }

    /// Force appended entries to disk
    pub fn force(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Every intact entry, in append order
    pub fn read_entries(&self) -> Result<Vec<LogEntry>> {
        let mut file = self.file.lock();
        Ok(scan(&self.path, &mut file)?.0)
    }

    /// Transactions that reached their commit entry, in tx id order
    pub fn committed_transactions(&self) -> Result<Vec<RecoveredTransaction>> {
        let mut pending: BTreeMap<u64, Vec<Command>> = BTreeMap::new();
        let mut committed = Vec::new();
        for entry in self.read_entries()? {
            match entry {
                LogEntry::Start { identifier } => {
                    pending.insert(identifier, Vec::new());
                }
                LogEntry::Command {
                    identifier,
                    command,
                } => pending
                    .get_mut(&identifier)
                    .ok_or_else(|| {
                        Error::log(format!(
                            "command for transaction {} precedes its start entry",
                            identifier
                        ))
                    })?
                    .push(command),
                LogEntry::Commit { identifier, tx_id } => {
                    let commands = pending.remove(&identifier).unwrap_or_default();
                    committed.push(RecoveredTransaction {
                        identifier,
                        tx_id,
                        commands: commands.into_iter().collect(),
                    });
                }
                LogEntry::Rollback { identifier } => {
                    pending.remove(&identifier);
                }
            }
        }
        if !pending.is_empty() {
            tracing::info!(
                "Command log holds {} transactions that never committed",
                pending.len()
            );
        }
        committed.sort_by_key(|tx| tx.tx_id);
        Ok(committed)
    }

    /// Drop the entries of every finished transaction, keeping those of
    /// transactions still between prepare and commit. Only valid once the
    /// stores hold everything committed so far. Returns the kept entries.
    pub fn rotate(&self) -> Result<usize> {
        let mut file = self.file.lock();
        let (entries, valid_len) = scan(&self.path, &mut file)?;
        let finished: HashSet<u64> = entries
            .iter()
            .filter(|e| matches!(e, LogEntry::Commit { .. } | LogEntry::Rollback { .. }))
            .map(LogEntry::identifier)
            .collect();

        let mut frames = Vec::new();
        let mut kept = 0;
        for entry in entries.iter().filter(|e| !finished.contains(&e.identifier())) {
            frames.extend(entry.encode()?);
            kept += 1;
        }
        file.set_len(0)?;
        file.write_all(&frames)?;
        file.sync_all()?;
        tracing::debug!(
            "Rotated command log {:?}: {} -> {} bytes, {} entries kept",
            self.path,
            valid_len,
            frames.len(),
            kept
        );
        Ok(kept)
    }

    /// Drop every entry
    pub fn truncate(&self) -> Result<()> {
        let file = self.file.lock();
        file.set_len(0)?;
        file.sync_all()?;
        tracing::debug!("Truncated command log {:?}", self.path);
        Ok(())
    }
}

/// Read every intact entry from the start of `file`, returning them with
/// the length of the intact prefix
fn scan(path: &Path, file: &mut File) -> Result<(Vec<LogEntry>, u64)> {
    let mut data = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut data)?;

    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match decode_frame(&data[offset..]) {
            Ok(Some((entry, used))) => {
                entries.push(entry);
                offset += used;
            }
            Ok(None) => {
                tracing::warn!(
                    "Command log {:?} has a torn entry at offset {}, ignoring {} trailing bytes",
                    path,
                    offset,
                    data.len() - offset
                );
                break;
            }
            Err(e) => {
                tracing::warn!("Command log {:?} is corrupt at offset {}: {}", path, offset, e);
                break;
            }
        }
    }
    Ok((entries, offset as u64))
}

/// Decode the frame at the start of `buf`; `None` when it is incomplete
fn decode_frame(buf: &[u8]) -> Result<Option<(LogEntry, usize)>> {
    if buf.len() < FRAME_OVERHEAD {
        return Ok(None);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[..4]);
    let length = u32::from_le_bytes(len_bytes) as usize;
    let total = length + FRAME_OVERHEAD;
    if buf.len() < total {
        return Ok(None);
    }

    let crc_offset = 4 + length;
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&buf[crc_offset..total]);
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&buf[..crc_offset]);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(Error::log(format!(
            "CRC mismatch: stored {:x}, computed {:x}",
            stored, computed
        )));
    }

    let entry = bincode::deserialize(&buf[4..crc_offset])?;
    Ok(Some((entry, total)))
}
