//! Append-only event log.
//!
//! Each event is written as one self-delimiting frame:
//!
//! ```text
//! magic "EVT\0" | version u8 | body_len u32 LE | body (msgpack) | crc32(body) u32 LE
//! ```
//!
//! A frame is assembled in memory and written with a single `write_all`, so a
//! crash can only leave an incomplete frame at the very end of the file. That
//! torn tail is detected and truncated when the log is reopened.

use crate::error::{Result, StoreError};
use crate::types::Event;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Magic bytes for an event frame.
const FRAME_MAGIC: &[u8; 4] = b"EVT\0";

/// Current frame format version.
const FRAME_VERSION: u8 = 1;

/// magic + version + body length
const FRAME_HEADER_SIZE: u64 = 4 + 1 + 4;

/// crc32 of the body
const FRAME_TRAILER_SIZE: u64 = 4;

struct LogFile {
    file: File,
    /// End of the last complete frame.
    size: u64,
    writes_since_sync: u64,
}

/// Append-only event log.
pub struct EventLog {
    /// Path to the log file.
    path: PathBuf,

    inner: Mutex<LogFile>,

    /// Sync every N writes (1 = every write).
    sync_interval: u64,

    /// Decoded events by offset.
    cache: Mutex<LruCache<u64, Event>>,
}

impl EventLog {
    /// Default sync interval - sync every 100 writes for balance of durability and performance.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Default number of decoded events kept in memory.
    pub const DEFAULT_CACHE_SIZE: usize = 4096;

    /// Open or create an event log with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, Self::DEFAULT_SYNC_INTERVAL, Self::DEFAULT_CACHE_SIZE)
    }

    /// Open or create an event log.
    ///
    /// - sync_interval = 0 or 1: sync every write (safest, slowest)
    /// - sync_interval = 100: sync every 100 writes (good balance)
    ///
    /// An incomplete or checksum-failing frame at the end of the file is
    /// truncated. Damage anywhere else is reported as corruption.
    pub fn open_with(
        path: impl AsRef<Path>,
        sync_interval: u64,
        cache_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let valid_len = Self::scan_valid_len(&mut file, file_len)?;

        if valid_len < file_len {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                file_len,
                "truncating torn frame at end of event log"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path,
            inner: Mutex::new(LogFile {
                file,
                size: valid_len,
                writes_since_sync: 0,
            }),
            sync_interval: sync_interval.max(1),
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Append an event to the log.
    ///
    /// Returns the offset where the frame starts. If the write or its sync
    /// fails the file is cut back to its previous length and the frame is
    /// not part of the log.
    pub fn append(&self, event: &Event) -> Result<u64> {
        let frame = Self::encode_frame(event)?;

        let mut inner = self.inner.lock();
        let offset = inner.size;

        let written = match inner.file.seek(SeekFrom::Start(offset)) {
            Ok(_) => inner.file.write_all(&frame),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = inner.file.set_len(offset);
            return Err(e.into());
        }

        inner.writes_since_sync += 1;
        if inner.writes_since_sync >= self.sync_interval {
            if let Err(e) = inner.file.sync_data() {
                let _ = inner.file.set_len(offset);
                return Err(e.into());
            }
            inner.writes_since_sync = 0;
        }

        inner.size = offset + frame.len() as u64;
        Ok(offset)
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.sync_all()?;
        inner.writes_since_sync = 0;
        Ok(())
    }

    /// Read the event at a given offset.
    pub fn read_at(&self, offset: u64) -> Result<Event> {
        if let Some(event) = self.cache.lock().get(&offset) {
            return Ok(event.clone());
        }

        let (event, _) = self.read_frame(offset)?;
        self.cache.lock().put(offset, event.clone());
        Ok(event)
    }

    /// Iterate all events from a given offset, bypassing the cache.
    pub fn iter_from(&self, offset: u64) -> EventIterator<'_> {
        EventIterator {
            log: self,
            offset,
            end: self.size(),
        }
    }

    /// Current length of the valid log.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read one frame, returning the event and the offset of the next frame.
    fn read_frame(&self, offset: u64) -> Result<(Event, u64)> {
        let mut inner = self.inner.lock();
        if offset >= inner.size {
            return Err(StoreError::Corruption(format!(
                "offset {} beyond end of log ({})",
                offset, inner.size
            )));
        }

        let file = &mut inner.file;
        file.seek(SeekFrom::Start(offset))?;

        let body_len = Self::read_header(file)?;
        let mut body = vec![0u8; body_len as usize];
        file.read_exact(&mut body)?;

        let mut crc_bytes = [0u8; 4];
        file.read_exact(&mut crc_bytes)?;
        let stored = u32::from_le_bytes(crc_bytes);
        let computed = crc32fast::hash(&body);
        if stored != computed {
            return Err(StoreError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        let event: Event = rmp_serde::from_slice(&body)?;
        Ok((event, offset + FRAME_HEADER_SIZE + body_len + FRAME_TRAILER_SIZE))
    }

    fn encode_frame(event: &Event) -> Result<Vec<u8>> {
        let body = rmp_serde::to_vec_named(event)?;
        let body_len = u32::try_from(body.len())
            .map_err(|_| StoreError::Serialization("event exceeds 4 GiB".into()))?;

        let mut frame =
            Vec::with_capacity((FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE) as usize + body.len());
        frame.extend_from_slice(FRAME_MAGIC);
        frame.push(FRAME_VERSION);
        frame.extend_from_slice(&body_len.to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        Ok(frame)
    }

    /// Read and validate a frame header, returning the body length.
    fn read_header(file: &mut File) -> Result<u64> {
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != FRAME_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid frame magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FRAME_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported frame version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        Ok(u32::from_le_bytes(len_bytes) as u64)
    }

    /// Walk the frames and return the length covered by complete, valid frames.
    fn scan_valid_len(file: &mut File, file_len: u64) -> Result<u64> {
        let mut offset = 0u64;

        while offset < file_len {
            if file_len - offset < FRAME_HEADER_SIZE {
                break;
            }

            file.seek(SeekFrom::Start(offset))?;
            let body_len = match Self::read_header(file) {
                Ok(len) => len,
                Err(StoreError::InvalidFormat(msg)) => {
                    return Err(StoreError::Corruption(format!("at offset {offset}: {msg}")))
                }
                Err(e) => return Err(e),
            };

            let frame_end = offset + FRAME_HEADER_SIZE + body_len + FRAME_TRAILER_SIZE;
            if frame_end > file_len {
                break;
            }

            let mut body = vec![0u8; body_len as usize];
            file.read_exact(&mut body)?;
            let mut crc_bytes = [0u8; 4];
            file.read_exact(&mut crc_bytes)?;

            if u32::from_le_bytes(crc_bytes) != crc32fast::hash(&body) {
                if frame_end == file_len {
                    break;
                }
                return Err(StoreError::Corruption(format!(
                    "checksum mismatch in frame at offset {offset}"
                )));
            }

            offset = frame_end;
        }

        Ok(offset)
    }
}

/// Iterator over events in the log.
pub struct EventIterator<'a> {
    log: &'a EventLog,
    offset: u64,
    end: u64,
}

impl<'a> Iterator for EventIterator<'a> {
    type Item = Result<(u64, Event)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }

        let current_offset = self.offset;
        match self.log.read_frame(current_offset) {
            Ok((event, next)) => {
                self.offset = next;
                Some(Ok((current_offset, event)))
            }
            Err(e) => {
                self.offset = self.end; // Stop iteration on error
                Some(Err(e))
            }
        }
    }
}
