use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE, INVALID_PAGE_ID};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles the actual disk I/O: a data file of fixed-size pages
/// and a separate append-only log file.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicI32,
}

impl DiskManager {
    /// Open (or create) the database file and its companion log file.
    /// The log file lives next to the data file with a `.log` suffix.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let db_path = db_path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let mut log_path = PathBuf::from(db_path);
        let mut name = log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "quarzdb".to_string());
        name.push_str(".log");
        log_path.set_file_name(name);
        let log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_path)?;

        // Resume allocation past whatever the data file already holds
        let existing_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            log_file: Mutex::new(log),
            next_page_id: AtomicI32::new(existing_pages),
        })
    }

    /// Read a page from disk into the supplied buffer
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            // Reading past the end yields a fresh zeroed page
            if offset >= file_size {
                page.data.fill(0);
                page.page_id = page_id;
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;

        Ok(())
    }

    /// Hand out the next page ID. The file is extended lazily on first write.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of pages the data file holds (flushed pages only)
    pub fn page_count(&self) -> PageId {
        self.next_page_id.load(Ordering::SeqCst)
    }

    /// Release a page ID. Freed pages are not reused within a session.
    pub fn deallocate_page(&self, _page_id: PageId) {}

    /// Append bytes to the log file
    pub fn write_log(&self, data: &[u8]) -> Result<(), DiskManagerError> {
        let mut file = self.log_file.lock();
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes of log starting at `offset`.
    /// Returns the number of bytes read; 0 once past the end.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<usize, DiskManagerError> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = (file_size - offset) as usize;
        let to_read = buf.len().min(available);
        file.read_exact(&mut buf[..to_read])?;
        Ok(to_read)
    }
}
