use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{failpoint, PageId, PAGE_SIZE};

pub struct Pager {
    file: File,
    pub num_pages: u32,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path_ref = path.as_ref();
        crate::stratum_debug_log!("[Pager::open] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;
        crate::stratum_debug_log!(
            "[Pager::open] File size: {file_size}, initial num_pages: {num_pages}"
        );

        Ok(Self { file, num_pages })
    }

    /// Reads a page into `buf`. Pages past the end of the file, and the
    /// tail of a short read, come back zeroed.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> io::Result<()> {
        crate::stratum_debug_log!("[Pager::read_page] Reading page_id: {page_id}");
        if page_id >= self.num_pages {
            buf.fill(0);
            return Ok(());
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let bytes_read = self.file.read(buf)?;
        if bytes_read < PAGE_SIZE {
            crate::stratum_debug_log!(
                "[Pager::read_page] Read {bytes_read} bytes (less than page size), zeroing rest."
            );
            buf[bytes_read..].fill(0);
        }

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> io::Result<()> {
        failpoint::maybe_fail("pager.write_page")?;
        crate::stratum_debug_log!("[Pager::write_page] Writing page_id: {page_id}");
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;
        if page_id >= self.num_pages {
            self.num_pages = page_id + 1;
        }
        Ok(())
    }

    /// Page ids are handed out monotonically and never reused.
    pub fn allocate_page(&mut self) -> io::Result<PageId> {
        let page_id = self.num_pages;
        self.num_pages += 1;
        crate::stratum_debug_log!(
            "[Pager::allocate_page] Allocating new page_id: {page_id}. New num_pages: {}",
            self.num_pages
        );
        Ok(page_id)
    }

    pub fn deallocate_page(&mut self, _page_id: PageId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pager_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let temp_path = temp_dir.path().join("test.db");

        let mut pager = Pager::open(temp_path.to_str().unwrap()).unwrap();

        let page_id = pager.allocate_page().unwrap();
        assert_eq!(page_id, 0);

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xCD;
        pager.write_page(page_id, &data).unwrap();

        drop(pager);
        let mut pager = Pager::open(temp_path.to_str().unwrap()).unwrap();
        assert_eq!(pager.num_pages, 1);

        let mut buf = [0u8; PAGE_SIZE];
        pager.read_page(page_id, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAB);
        assert_eq!(buf[PAGE_SIZE - 1], 0xCD);
    }

    #[test]
    fn test_read_past_end_is_zeroed() {
        let temp_dir = tempdir().unwrap();
        let mut pager = Pager::open(temp_dir.path().join("test.db")).unwrap();

        let mut buf = [0xFFu8; PAGE_SIZE];
        pager.read_page(17, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_is_monotonic() {
        let temp_dir = tempdir().unwrap();
        let mut pager = Pager::open(temp_dir.path().join("test.db")).unwrap();

        let a = pager.allocate_page().unwrap();
        let b = pager.allocate_page().unwrap();
        pager.deallocate_page(a);
        let c = pager.allocate_page().unwrap();
        assert!(a < b && b < c);
    }
}
