//! Typed page-table entries for the two 32-bit paging variants.

use bitfield_struct::bitfield;

/// A legacy (non-PAE) page-directory or page-table entry.
///
/// One layout serves both levels: a directory entry either points at a page
/// table or, with [`page_size`](Self::page_size) set, maps a 4 MiB page
/// directly; a table entry always maps a 4 KiB page.
///
/// Bits 9–11 are hardware-available. Windows repurposes bit 10 as the
/// *prototype* flag and bit 11 as the *transition* flag in non-present
/// entries, which is what the [`buffalo`](crate::buffalo) classifier reads.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct LegacyEntry {
    /// Present (bit 0): the entry maps something.
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User-accessible (bit 2).
    pub user: bool,
    /// Write-through caching (bit 3).
    pub write_through: bool,
    /// Cache disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5), set by the CPU.
    pub accessed: bool,
    /// Dirty (bit 6), leaf entries only.
    pub dirty: bool,
    /// Page size (bit 7): directory entry maps a 4 MiB page.
    pub page_size: bool,
    /// Global (bit 8), leaf entries only.
    pub global: bool,
    /// Available (bit 9).
    #[bits(1)]
    __avl: u8,
    /// Windows *prototype* flag (bit 10) in non-present entries.
    pub prototype: bool,
    /// Windows *transition* flag (bit 11) in non-present entries.
    pub transition: bool,
    /// Frame base, bits 31:12.
    #[bits(20)]
    frame_31_12: u32,
}

impl LegacyEntry {
    /// Base of the next-level page table (bits 31:12).
    #[inline]
    #[must_use]
    pub const fn table_base(self) -> u32 {
        self.into_bits() & 0xFFFF_F000
    }

    /// Base of the mapped 4 KiB page (bits 31:12).
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> u32 {
        self.into_bits() & 0xFFFF_F000
    }

    /// Base of the mapped 4 MiB page (bits 31:22).
    #[inline]
    #[must_use]
    pub const fn large_page_base(self) -> u32 {
        self.into_bits() & 0xFFC0_0000
    }
}

/// A PAE page-directory-pointer, page-directory, or page-table entry.
///
/// PAE widens entries to 64 bits to hold frame bits above the 32-bit line.
/// This build introspects guests whose machine addresses fit in 32 bits, so
/// the base accessors truncate accordingly, exactly as a 32-bit
/// `unsigned long` build of the tooling would.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PaeEntry {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User-accessible (bit 2).
    pub user: bool,
    /// Write-through caching (bit 3).
    pub write_through: bool,
    /// Cache disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6), leaf entries only.
    pub dirty: bool,
    /// Page size (bit 7): directory entry maps a 2 MiB page.
    pub page_size: bool,
    /// Global (bit 8), leaf entries only.
    pub global: bool,
    /// Available (bits 9–11).
    #[bits(3)]
    __avl: u8,
    /// Frame base, bits 35:12.
    #[bits(24)]
    frame_35_12: u32,
    /// Reserved / no-execute, bits 36–63.
    #[bits(28)]
    __reserved: u32,
}

impl PaeEntry {
    /// Base of the next-level table (bits 35:12, truncated to 32 bits).
    #[inline]
    #[must_use]
    pub const fn table_base(self) -> u32 {
        (self.into_bits() & 0xF_FFFF_F000) as u32
    }

    /// Base of the mapped 4 KiB page (bits 35:12, truncated to 32 bits).
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> u32 {
        (self.into_bits() & 0xF_FFFF_F000) as u32
    }

    /// Base of the mapped 2 MiB page (bits 31:21).
    #[inline]
    #[must_use]
    pub const fn large_page_base(self) -> u32 {
        (self.into_bits() as u32) & 0xFFE0_0000
    }
}
