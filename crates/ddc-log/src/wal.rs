use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LogError, LogResult};
use crate::event::{LogBucket, ReplicationLogEvent};

/// One durable record in a namespace's log file.
///
/// On-disk framing:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized WalRecord)]
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    Event(ReplicationLogEvent),
    /// Every partition up to and including this one has been retired.
    Pruned(LogBucket),
}

/// Flush strategy for the WAL.
#[derive(Clone, Debug, Default)]
pub enum SyncMode {
    /// `fsync` after every append.
    EveryWrite,
    /// Flush to the OS and rely on its page cache.
    #[default]
    OsDefault,
}

#[derive(Clone, Debug, Default)]
pub struct WalConfig {
    pub sync_mode: SyncMode,
}

const HEADER_SIZE: usize = 8;

struct WalWriter {
    writer: BufWriter<File>,
    offset: u64,
}

/// Crash-recoverable append-only file of [`WalRecord`]s.
///
/// On recovery the file is read front to back. A record that fails its CRC
/// is skipped; a truncated tail ends recovery.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    config: WalConfig,
}

impl WriteAheadLog {
    /// Open (or create) a WAL file.
    pub fn open(path: &Path, config: WalConfig) -> LogResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                writer: BufWriter::new(file),
                offset,
            }),
            config,
        })
    }

    /// Append a record, returning its byte offset.
    pub fn append(&self, record: &WalRecord) -> LogResult<u64> {
        let payload =
            bincode::serialize(record).map_err(|e| LogError::Serialization(e.to_string()))?;
        let crc = crc32fast::hash(&payload);

        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        let entry_offset = w.offset;
        w.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        w.writer.write_all(&crc.to_le_bytes())?;
        w.writer.write_all(&payload)?;
        w.writer.flush()?;
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            w.writer.get_ref().sync_all()?;
        }
        w.offset += (HEADER_SIZE + payload.len()) as u64;
        Ok(entry_offset)
    }

    /// Read back every intact record with its offset.
    pub fn recover(&self) -> LogResult<Vec<(u64, WalRecord)>> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut records = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;
            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            let next = offset + HEADER_SIZE as u64 + length as u64;

            if length == 0 || next > file_len {
                warn!(offset, length, file_len, path = %self.path.display(), "torn WAL tail; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            file.read_exact(&mut payload)?;
            if crc32fast::hash(&payload) != expected_crc {
                warn!(offset, path = %self.path.display(), "WAL CRC mismatch; skipping record");
                offset = next;
                continue;
            }
            match bincode::deserialize::<WalRecord>(&payload) {
                Ok(record) => records.push((offset, record)),
                Err(e) => warn!(offset, error = %e, "undecodable WAL record; skipping"),
            }
            offset = next;
        }

        debug!(recovered = records.len(), path = %self.path.display(), "WAL recovered");
        Ok(records)
    }

    /// Drop everything before `offset`, which must be a record boundary.
    ///
    /// Offsets of surviving records shift down by `offset`.
    pub fn checkpoint(&self, offset: u64) -> LogResult<()> {
        let mut w = self.writer.lock().expect("WAL mutex poisoned");
        if offset > w.offset {
            return Err(LogError::InvalidCheckpoint {
                requested: offset,
                current: w.offset,
            });
        }
        w.writer.flush()?;

        let mut remaining = Vec::new();
        {
            let mut file = File::open(&self.path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_to_end(&mut remaining)?;
        }

        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&remaining)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        let file = OpenOptions::new().append(true).open(&self.path)?;
        w.writer = BufWriter::new(file);
        w.offset = remaining.len() as u64;
        debug!(through = offset, kept = w.offset, "WAL checkpoint");
        Ok(())
    }

    /// Current write offset (file length).
    pub fn offset(&self) -> u64 {
        self.writer.lock().expect("WAL mutex poisoned").offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
