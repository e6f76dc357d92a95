use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// Maximum UTF-8 bytes of an index name stored in the header page
pub const MAX_INDEX_NAME_LEN: usize = 32;

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const RECORD_SIZE: usize = MAX_INDEX_NAME_LEN + 4;

/// View over page 0: a packed array of (index name, root page id) records.
/// Indexes consult it on open to locate their root and rewrite their entry
/// whenever the root moves.
pub struct HeaderPage;

impl HeaderPage {
    /// Zero the record count of a freshly allocated header page
    pub fn init(page: &mut Page) {
        LittleEndian::write_u32(&mut page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET], 0);
    }

    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET]) as usize
    }

    /// Append a (name, root id) record. Fails on duplicate name, oversized
    /// name, or a full header page.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > MAX_INDEX_NAME_LEN {
            return false;
        }
        if Self::find_record(page, name).is_some() {
            return false;
        }

        let count = Self::record_count(page);
        let offset = RECORDS_OFFSET + count * RECORD_SIZE;
        if offset + RECORD_SIZE > PAGE_SIZE {
            return false;
        }

        page.data[offset..offset + MAX_INDEX_NAME_LEN].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(
            &mut page.data[offset + MAX_INDEX_NAME_LEN..offset + RECORD_SIZE],
            root_page_id,
        );
        LittleEndian::write_u32(
            &mut page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET],
            (count + 1) as u32,
        );
        true
    }

    /// Overwrite the root id of an existing record
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        match Self::find_record(page, name) {
            Some(idx) => {
                let offset = RECORDS_OFFSET + idx * RECORD_SIZE;
                LittleEndian::write_i32(
                    &mut page.data[offset + MAX_INDEX_NAME_LEN..offset + RECORD_SIZE],
                    root_page_id,
                );
                true
            }
            None => false,
        }
    }

    /// Remove a record, compacting the tail over it
    pub fn delete_record(page: &mut Page, name: &str) -> bool {
        match Self::find_record(page, name) {
            Some(idx) => {
                let count = Self::record_count(page);
                let from = RECORDS_OFFSET + (idx + 1) * RECORD_SIZE;
                let to = RECORDS_OFFSET + idx * RECORD_SIZE;
                let end = RECORDS_OFFSET + count * RECORD_SIZE;
                page.data.copy_within(from..end, to);
                LittleEndian::write_u32(
                    &mut page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET],
                    (count - 1) as u32,
                );
                true
            }
            None => false,
        }
    }

    pub fn get_root_id(page: &Page, name: &str) -> Option<PageId> {
        Self::find_record(page, name).map(|idx| {
            let offset = RECORDS_OFFSET + idx * RECORD_SIZE;
            LittleEndian::read_i32(&page.data[offset + MAX_INDEX_NAME_LEN..offset + RECORD_SIZE])
        })
    }

    fn find_record(page: &Page, name: &str) -> Option<usize> {
        let count = Self::record_count(page);
        (0..count).find(|&idx| {
            let offset = RECORDS_OFFSET + idx * RECORD_SIZE;
            let stored = &page.data[offset..offset + MAX_INDEX_NAME_LEN];
            let len = stored.iter().position(|&b| b == 0).unwrap_or(MAX_INDEX_NAME_LEN);
            &stored[..len] == name.as_bytes()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::HEADER_PAGE_ID;

    #[test]
    fn test_insert_and_lookup() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::init(&mut page);

        assert!(HeaderPage::insert_record(&mut page, "orders_pk", 7));
        assert!(HeaderPage::insert_record(&mut page, "orders_date", 12));
        assert_eq!(HeaderPage::record_count(&page), 2);

        assert_eq!(HeaderPage::get_root_id(&page, "orders_pk"), Some(7));
        assert_eq!(HeaderPage::get_root_id(&page, "orders_date"), Some(12));
        assert_eq!(HeaderPage::get_root_id(&page, "missing"), None);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::init(&mut page);

        assert!(HeaderPage::insert_record(&mut page, "idx", 3));
        assert!(!HeaderPage::insert_record(&mut page, "idx", 4));
        assert_eq!(HeaderPage::get_root_id(&page, "idx"), Some(3));
    }

    #[test]
    fn test_update_record() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::init(&mut page);

        assert!(HeaderPage::insert_record(&mut page, "idx", 3));
        assert!(HeaderPage::update_record(&mut page, "idx", 9));
        assert_eq!(HeaderPage::get_root_id(&page, "idx"), Some(9));
        assert!(!HeaderPage::update_record(&mut page, "missing", 1));
    }

    #[test]
    fn test_delete_compacts() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::init(&mut page);

        assert!(HeaderPage::insert_record(&mut page, "a", 1));
        assert!(HeaderPage::insert_record(&mut page, "b", 2));
        assert!(HeaderPage::insert_record(&mut page, "c", 3));

        assert!(HeaderPage::delete_record(&mut page, "b"));
        assert_eq!(HeaderPage::record_count(&page), 2);
        assert_eq!(HeaderPage::get_root_id(&page, "a"), Some(1));
        assert_eq!(HeaderPage::get_root_id(&page, "c"), Some(3));
        assert_eq!(HeaderPage::get_root_id(&page, "b"), None);
    }

    #[test]
    fn test_name_length_limit() {
        let mut page = Page::new(HEADER_PAGE_ID);
        HeaderPage::init(&mut page);

        let long_name = "x".repeat(MAX_INDEX_NAME_LEN + 1);
        assert!(!HeaderPage::insert_record(&mut page, &long_name, 1));

        let max_name = "y".repeat(MAX_INDEX_NAME_LEN);
        assert!(HeaderPage::insert_record(&mut page, &max_name, 5));
        assert_eq!(HeaderPage::get_root_id(&page, &max_name), Some(5));
    }
}
