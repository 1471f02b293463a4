//! Recognized flag sets (`spec.md` §6.2), one `bitflags` type per group.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const RDONLY     = 0b0001;
        const CREATE     = 0b0010;
        const UNBUFFERED = 0b0100;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SaveFlags: u32 {
        const COMPRESS_DOC_BODIES = 0b0001;
        const SEQUENCE_AS_IS      = 0b0010;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenDocFlags: u32 {
        const DECOMPRESS_DOC_BODIES = 0b0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DocInfosFlags: u32 {
        const DELETES_ONLY          = 0b00001;
        const NO_DELETES            = 0b00010;
        const RANGES                = 0b00100;
        const TOLERATE_CORRUPTION   = 0b01000;
        const INCLUDE_CORRUPT_DOCS  = 0b10000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CompactFlags: u32 {
        const DROP_DELETES  = 0b0001;
        const UPGRADE_DB    = 0b0010;
        const UNBUFFERED    = 0b0100;
        const RECOVERY_MODE = 0b1000;
    }
}
