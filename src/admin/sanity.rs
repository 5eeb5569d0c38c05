//! Generic page checks run before a page is interpreted as a GIN page.

use std::fmt;

use crate::admin::error::Corruption;
use crate::storage::gin::Opaque;
use crate::types::{
    page::{PageHeader, PageKind, PAGE_HDR_LEN},
    page_crc32, PageId,
};

/// Validates the parts of a page that do not depend on the tree format.
pub trait PageSanity: Send + Sync + fmt::Debug {
    /// Checks `page`, read from `block` of a store with `page_size` pages.
    fn check(&self, block: PageId, page: &[u8], page_size: u32) -> Result<(), Corruption>;
}

/// Header, placement, size, checksum and special-area checks.
#[derive(Clone, Copy, Debug)]
pub struct DefaultPageSanity {
    /// Recompute and compare page checksums.
    pub verify_checksums: bool,
}

impl Default for DefaultPageSanity {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

impl PageSanity for DefaultPageSanity {
    fn check(&self, block: PageId, page: &[u8], page_size: u32) -> Result<(), Corruption> {
        if page.iter().all(|&b| b == 0) {
            return Err(Corruption::Sanity("index contains unexpected zero page"));
        }
        let header = PageHeader::decode(page).map_err(|err| match err {
            crate::types::GinError::Corruption(msg) => Corruption::Sanity(msg),
            _ => Corruption::Sanity("page header unreadable"),
        })?;
        if header.page_no != block {
            return Err(Corruption::Sanity("page header records a different block"));
        }
        if header.page_size != page_size || page.len() != page_size as usize {
            return Err(Corruption::Sanity("page size does not match the index"));
        }
        if self.verify_checksums {
            let crc = page_crc32(header.page_no.0, header.salt, &page[PAGE_HDR_LEN..]);
            if crc != header.crc32 {
                return Err(Corruption::Sanity("page checksum mismatch"));
            }
        }
        if header.kind != PageKind::Meta {
            Opaque::decode(page).map_err(|_| Corruption::Sanity("special area is corrupted"))?;
        }
        Ok(())
    }
}
