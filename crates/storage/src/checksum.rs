//! Checksum scheme selection.
//!
//! Two schemes coexist on disk: a legacy CRC-32 (disk version ≤ 11) and
//! CRC-32C (disk version ≥ 12). The active scheme is a property of the
//! open file, decided once at open time and then threaded through every
//! chunk read/write. A stored checksum of zero is treated as "not
//! checked" (an artifact of the legacy encoding, where early tooling
//! sometimes wrote no checksum at all).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumScheme {
    Crc32Legacy,
    Crc32C,
}

impl ChecksumScheme {
    pub fn for_disk_version(version: u8) -> Self {
        if version <= 11 {
            ChecksumScheme::Crc32Legacy
        } else {
            ChecksumScheme::Crc32C
        }
    }

    pub fn compute(&self, data: &[u8]) -> u32 {
        match self {
            ChecksumScheme::Crc32Legacy => crc32fast::hash(data),
            ChecksumScheme::Crc32C => crc32c::crc32c(data),
        }
    }

    /// Verifies `stored` against a freshly computed checksum of `data`.
    /// A stored value of zero is always accepted ("not checked").
    pub fn verify(&self, data: &[u8], stored: u32) -> bool {
        stored == 0 || self.compute(data) == stored
    }
}

/// Tries every known checksum mode in turn; used by integrity-check
/// utilities (`couch_dbck`-style recovery) that may not know a chunk's
/// originating disk version up front.
pub fn verify_any_scheme(data: &[u8], stored: u32) -> bool {
    stored == 0
        || ChecksumScheme::Crc32Legacy.verify(data, stored)
        || ChecksumScheme::Crc32C.verify(data, stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_for_old_versions() {
        assert_eq!(ChecksumScheme::for_disk_version(11), ChecksumScheme::Crc32Legacy);
        assert_eq!(ChecksumScheme::for_disk_version(0), ChecksumScheme::Crc32Legacy);
    }

    #[test]
    fn crc32c_for_new_versions() {
        assert_eq!(ChecksumScheme::for_disk_version(12), ChecksumScheme::Crc32C);
    }

    #[test]
    fn zero_checksum_is_not_checked() {
        assert!(ChecksumScheme::Crc32Legacy.verify(b"anything", 0));
    }

    #[test]
    fn mismatched_checksum_fails() {
        assert!(!ChecksumScheme::Crc32C.verify(b"hello", 0xdead_beef));
    }

    #[test]
    fn roundtrip_both_schemes() {
        let data = b"some payload bytes";
        for scheme in [ChecksumScheme::Crc32Legacy, ChecksumScheme::Crc32C] {
            let sum = scheme.compute(data);
            assert!(scheme.verify(data, sum));
        }
    }
}
