#![forbid(unsafe_code)]
//! Page checksums.

/// CRC32 of a page body, bound to the page number and index salt so that a
/// page copied to the wrong block fails verification.
pub fn page_crc32(page_no: u64, salt: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}
