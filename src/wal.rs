//! The Write-Ahead Log manager.
//!
//! Kept deliberately small: the buffer pool forces the log before writing
//! any dirty page back, so the log always reaches disk ahead of the page
//! image it describes. Replaying the log is a concern of the recovery
//! layer, which lives outside this crate.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::{Lsn, PageId};

/// Header for every WAL record.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct WalRecordHeader {
    /// The total length of the record, including the header.
    pub total_len: u32,
    /// The CRC checksum of the record body.
    pub crc: u32,
}

/// A single record in the WAL.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum WalRecord {
    /// The full image of a page, logged before the page itself is written.
    PageImage { page_id: PageId, data: Vec<u8> },
    /// A checkpoint record.
    Checkpoint,
}

/// The WAL manager. LSNs are byte offsets into the log file.
pub struct WalManager {
    file: Mutex<File>,
    next_lsn: AtomicU64,
}

impl WalManager {
    /// Opens the WAL file and initializes the manager.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .write(true)
            .open(path.as_ref())?;

        let file_len = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            next_lsn: AtomicU64::new(file_len),
        })
    }

    /// Appends a record to the WAL and returns its LSN. The record is
    /// buffered by the OS until `flush` is called.
    pub fn log(&mut self, record: &WalRecord) -> io::Result<Lsn> {
        let record_bytes = bincode::serialize(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let header_len = std::mem::size_of::<WalRecordHeader>() as u32;
        let total_len = header_len + record_bytes.len() as u32;

        let lsn = self.next_lsn.fetch_add(total_len as u64, Ordering::SeqCst);

        let mut hasher = Hasher::new();
        hasher.update(&record_bytes);
        let crc = hasher.finalize();

        let header = WalRecordHeader { total_len, crc };

        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.seek(SeekFrom::Start(lsn))?;
        file.write_all(unsafe {
            std::slice::from_raw_parts(&header as *const _ as *const u8, header_len as usize)
        })?;
        file.write_all(&record_bytes)?;

        Ok(lsn)
    }

    /// Forces everything logged so far to stable storage.
    pub fn flush(&mut self) -> io::Result<()> {
        let file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        file.sync_data()
    }

    /// Reads the record at `lsn`, verifying its checksum. Returns the
    /// record and the LSN of the record after it; `(None, 0)` past the end.
    pub fn read_record(&mut self, lsn: Lsn) -> io::Result<(Option<WalRecord>, Lsn)> {
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if lsn >= file.metadata()?.len() {
            return Ok((None, 0));
        }

        file.seek(SeekFrom::Start(lsn))?;
        let mut header_buf = [0u8; std::mem::size_of::<WalRecordHeader>()];
        if file.read_exact(&mut header_buf).is_err() {
            return Ok((None, 0));
        }
        let header: WalRecordHeader = unsafe { std::mem::transmute(header_buf) };

        let record_len = header.total_len as usize - std::mem::size_of::<WalRecordHeader>();
        let mut record_buf = vec![0; record_len];
        file.read_exact(&mut record_buf)?;

        let mut hasher = Hasher::new();
        hasher.update(&record_buf);
        let crc = hasher.finalize();

        if crc != header.crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "WAL record CRC mismatch",
            ));
        }

        let record = bincode::deserialize(&record_buf).ok();
        Ok((record, lsn + header.total_len as u64))
    }
}
