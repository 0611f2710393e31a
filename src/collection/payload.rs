//! Payload store
//!
//! Append-only file holding every encrypted record of one collection.
//!
//! ## File Format
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Header: Magic "SDOC" (4) │ Version u16 LE (2) │ Reserved (2)  │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Frame 1                                                       │
//! │ ┌──────────────┬──────────────┬──────────────────────────────┐ │
//! │ │ Len u32 (4)  │ CRC32 (4)    │ Body (bincode StoredRecord)  │ │
//! │ └──────────────┴──────────────┴──────────────────────────────┘ │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Frame 2 ...                                                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//! `Len` counts body bytes only. Every update appends a fresh `Put` frame and
//! every delete a `Remove` frame; replaying frames in file order reproduces
//! the live set. `compact` rewrites the file with live frames only.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::config::SyncStrategy;
use crate::error::{Result, SealError};
use crate::index::Location;

/// Payload store magic
pub const MAGIC: &[u8; 4] = b"SDOC";

/// Payload store format version
pub const VERSION: u16 = 1;

/// Bytes before the first frame
pub const HEADER_SIZE: u64 = 8;

/// Frame header: Len (4) + CRC32 (4)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Kind of record a frame holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOp {
    /// Full document state (insert or update)
    Put,
    /// Document deletion
    Remove,
}

/// Body of a frame. The id and sequence stay in the clear so the index can be
/// rebuilt without keys; everything else is inside `ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub op: RecordOp,
    pub id: String,
    pub sequence: u64,
    pub ciphertext: Vec<u8>,
}

impl StoredRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(body)?)
    }
}

/// A frame found while scanning the whole store
#[derive(Debug, Clone)]
pub struct ScannedFrame {
    pub offset: u64,
    /// Frame length, header included
    pub len: u32,
    pub record: StoredRecord,
}

/// One collection's payload file
///
/// ## Concurrency:
/// - Appends and `compact` need `&mut self` (the collection's write lock)
/// - Reads need `&self` and use positional reads on a shared handle, so
///   readers holding the collection's read lock never wait on each other
pub struct PayloadStore {
    path: PathBuf,
    file: File,
    reader: File,
    len: u64,
    sync_strategy: SyncStrategy,
    unsynced: usize,
}

impl PayloadStore {
    /// Open or create a payload store, cutting off a torn trailing frame
    pub fn open(path: &Path, sync_strategy: SyncStrategy) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut len = file.metadata()?.len();
        if len == 0 {
            file.write_all(&header())?;
            file.sync_all()?;
            len = HEADER_SIZE;
        } else {
            check_header(&mut file, path)?;
            len = truncate_torn_tail(&mut file, path, len)?;
        }
        file.seek(SeekFrom::End(0))?;

        let reader = File::open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            reader,
            len,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append a frame holding `body`. Returns (offset, frame length).
    pub fn append(&mut self, body: &[u8]) -> Result<(u64, u32)> {
        let frame_len = FRAME_HEADER_SIZE + body.len();
        if frame_len > u32::MAX as usize {
            return Err(SealError::Storage(format!(
                "record of {} bytes is too large",
                body.len()
            )));
        }

        let mut frame = BytesMut::with_capacity(frame_len);
        frame.put_u32_le(body.len() as u32);
        frame.put_u32_le(crc32fast::hash(body));
        frame.put_slice(body);

        let offset = self.len;
        if let Err(e) = self.file.write_all(&frame) {
            let _ = self.file.set_len(offset);
            let _ = self.file.seek(SeekFrom::End(0));
            return Err(SealError::Io(e));
        }
        self.len += frame_len as u64;

        self.unsynced += 1;
        if self.sync_strategy.should_sync(self.unsynced) {
            self.sync()?;
        }

        Ok((offset, frame_len as u32))
    }

    /// Drop every frame at or after `offset`
    ///
    /// Undoes appends whose mutation could not be completed. `offset` must
    /// be a frame boundary returned by `append`.
    pub(crate) fn truncate_to(&mut self, offset: u64) -> Result<()> {
        if offset < HEADER_SIZE || offset > self.len {
            return Err(SealError::Storage(format!(
                "cannot truncate {} to {} (len {})",
                self.path.display(),
                offset,
                self.len
            )));
        }
        self.file.set_len(offset)?;
        self.file.seek(SeekFrom::End(0))?;
        self.len = offset;
        self.sync()
    }

    /// Read and decode the record at `location`
    pub fn read_record(&self, location: &Location) -> Result<StoredRecord> {
        let frame = self.read_frame(location.offset, location.len)?;
        StoredRecord::decode(&frame[FRAME_HEADER_SIZE..])
    }

    /// Read one whole frame and check its length and checksum
    fn read_frame(&self, offset: u64, len: u32) -> Result<Vec<u8>> {
        if (len as usize) < FRAME_HEADER_SIZE || offset + len as u64 > self.len {
            return Err(SealError::Storage(format!(
                "frame at {} (len {}) lies outside {}",
                offset,
                len,
                self.path.display()
            )));
        }

        let mut frame = vec![0u8; len as usize];
        read_exact_at(&self.reader, &mut frame, offset)?;

        let (body_len, crc) = frame_header(&frame);
        let body = &frame[FRAME_HEADER_SIZE..];
        if body_len as usize != body.len() || crc32fast::hash(body) != crc {
            return Err(SealError::Storage(format!(
                "frame at {} in {} failed its checksum",
                offset,
                self.path.display()
            )));
        }
        Ok(frame)
    }

    /// Decode every frame in file order
    ///
    /// Uses its own handle. A frame failing its checksum here is mid-file
    /// damage (the tail was checked at open) and is reported as `Storage`,
    /// as is an empty frame.
    pub fn scan(&self) -> Result<Vec<ScannedFrame>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut frames = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < self.len {
            let mut head = [0u8; FRAME_HEADER_SIZE];
            reader.read_exact(&mut head)?;
            let (body_len, crc) = frame_header(&head);
            if body_len == 0 {
                return Err(SealError::Storage(format!(
                    "empty frame at {} in {}",
                    offset,
                    self.path.display()
                )));
            }

            let frame_end = offset + FRAME_HEADER_SIZE as u64 + body_len as u64;
            if frame_end > self.len {
                return Err(SealError::Storage(format!(
                    "frame at {} in {} runs past the end of the store",
                    offset,
                    self.path.display()
                )));
            }

            let mut body = vec![0u8; body_len as usize];
            reader.read_exact(&mut body)?;
            if crc32fast::hash(&body) != crc {
                return Err(SealError::Storage(format!(
                    "frame at {} in {} failed its checksum",
                    offset,
                    self.path.display()
                )));
            }

            frames.push(ScannedFrame {
                offset,
                len: (FRAME_HEADER_SIZE + body.len()) as u32,
                record: StoredRecord::decode(&body)?,
            });
            offset = frame_end;
        }

        Ok(frames)
    }

    /// Rewrite the store keeping only the frames at `live`
    ///
    /// Returns the entries with their new locations, in the order given.
    pub fn compact(&mut self, live: Vec<(String, Location)>) -> Result<Vec<(String, Location)>> {
        let tmp = self.path.with_extension("dat.tmp");

        let result = (|| -> Result<(Vec<(String, Location)>, u64)> {
            let mut out = BufWriter::new(File::create(&tmp)?);
            out.write_all(&header())?;

            let mut offset = HEADER_SIZE;
            let mut moved = Vec::with_capacity(live.len());
            for (id, location) in live {
                let frame = self.read_frame(location.offset, location.len)?;
                out.write_all(&frame)?;
                moved.push((
                    id,
                    Location {
                        offset,
                        ..location
                    },
                ));
                offset += frame.len() as u64;
            }

            let file = out.into_inner().map_err(|e| SealError::Io(e.into_error()))?;
            file.sync_all()?;
            Ok((moved, offset))
        })();

        let (moved, new_len) = match result {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };

        fs::rename(&tmp, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.reader = File::open(&self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            before = self.len,
            after = new_len,
            "Compacted payload store"
        );
        self.len = new_len;
        self.unsynced = 0;

        Ok(moved)
    }

    /// Force pending appends to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Current file length in bytes, header included
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True when the store holds no frames
    pub fn is_empty(&self) -> bool {
        self.len == HEADER_SIZE
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn header() -> [u8; HEADER_SIZE as usize] {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header
}

fn frame_header(bytes: &[u8]) -> (u32, u32) {
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let crc = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (len, crc)
}

/// Read exactly `buf.len()` bytes at `offset` without touching a shared cursor
#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

/// `seek_read` moves the handle's cursor, but every call names its offset
#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        pos += n;
    }
    Ok(())
}

fn check_header(file: &mut File, path: &Path) -> Result<()> {
    let mut found = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    if file.read_exact(&mut found).is_err() {
        return Err(SealError::Storage(format!(
            "payload store {} is shorter than its header",
            path.display()
        )));
    }
    if &found[0..4] != MAGIC {
        return Err(SealError::Storage(format!(
            "{} is not a payload store",
            path.display()
        )));
    }
    let version = u16::from_le_bytes([found[4], found[5]]);
    if version != VERSION {
        return Err(SealError::Storage(format!(
            "unsupported payload store version {} in {}",
            version,
            path.display()
        )));
    }
    Ok(())
}

/// Walk frame headers and cut a torn tail: a trailing frame that is short,
/// or a last frame that fails its CRC or does not decode. An empty frame
/// followed only by zero bytes is a zero-filled tail and is cut too.
/// Returns the resulting file length.
fn truncate_torn_tail(file: &mut File, path: &Path, file_len: u64) -> Result<u64> {
    let mut torn_at: Option<u64> = None;
    let mut last: Option<(u64, u32, u32)> = None;

    {
        let mut reader = BufReader::new(&mut *file);
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut offset = HEADER_SIZE;
        while offset < file_len {
            if file_len - offset < FRAME_HEADER_SIZE as u64 {
                torn_at = Some(offset);
                break;
            }

            let mut head = [0u8; FRAME_HEADER_SIZE];
            reader.read_exact(&mut head)?;
            let (body_len, crc) = frame_header(&head);

            if body_len == 0 {
                // Anything else after an empty frame is left for `scan` to report
                if head == [0u8; FRAME_HEADER_SIZE] && rest_is_zero(&mut reader)? {
                    torn_at = Some(offset);
                }
                last = None;
                break;
            }

            let frame_end = offset + FRAME_HEADER_SIZE as u64 + body_len as u64;
            if frame_end > file_len {
                torn_at = Some(offset);
                break;
            }

            reader.seek_relative(body_len as i64)?;
            last = Some((offset, body_len, crc));
            offset = frame_end;
        }

        if torn_at.is_none() {
            if let Some((offset, body_len, crc)) = last {
                let mut body = vec![0u8; body_len as usize];
                reader.seek(SeekFrom::Start(offset + FRAME_HEADER_SIZE as u64))?;
                reader.read_exact(&mut body)?;
                if crc32fast::hash(&body) != crc || StoredRecord::decode(&body).is_err() {
                    torn_at = Some(offset);
                }
            }
        }
    }

    match torn_at {
        Some(offset) => {
            tracing::warn!(
                path = %path.display(),
                bytes = file_len - offset,
                "Discarding partial record left by an interrupted append"
            );
            file.set_len(offset)?;
            file.sync_all()?;
            Ok(offset)
        }
        None => Ok(file_len),
    }
}

/// True when every byte from the reader's position to EOF is zero
fn rest_is_zero<R: Read>(reader: &mut R) -> Result<bool> {
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return Ok(true);
        }
        if chunk[..n].iter().any(|&b| b != 0) {
            return Ok(false);
        }
    }
}
