//! Frame numbers for the pseudo-physical and machine address spaces.

use core::fmt;

/// A **pseudo-physical frame number**: a guest physical address shifted down
/// by the page shift.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pfn(u32);

impl Pfn {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PFN(0x{:X})", self.0)
    }
}

/// A **machine frame number**: what the hypervisor's foreign-map primitive
/// takes, and the frame index into a memory image in file mode.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Mfn(u32);

impl Mfn {
    /// The value a guest's frame table stores for a pseudo-physical frame
    /// with no machine frame behind it (ballooned-out or never populated).
    pub const INVALID: Self = Self(0xFFFF_FFFF);

    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }
}

impl fmt::Debug for Mfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MFN(0x{:X})", self.0)
    }
}
