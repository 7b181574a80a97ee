//! Runtime page geometry of the introspected target.

use crate::{MachineAddress, Mfn, Pfn, PhysicalAddress};

/// Page size and shift of the target, fixed at instance construction.
///
/// Practically always 4 KiB / 12 for the 32-bit x86 guests this crate deals
/// with, but the pair is carried explicitly so every split/join goes through
/// one place instead of a scattering of `& 0xFFF`.
///
/// ### Examples
/// ```rust
/// # use guestmem_addresses::*;
/// let g = PageGeometry::DEFAULT;
/// assert_eq!(g.offset(0x12345), 0x345);
/// assert_eq!(g.base(0x12345), 0x12000);
/// assert_eq!(g.frame(0x12345), 0x12);
/// ```
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PageGeometry {
    size: u32,
    shift: u32,
}

impl PageGeometry {
    /// 4 KiB pages, the x86 baseline.
    pub const DEFAULT: Self = Self::new(4096, 12);

    /// A geometry with the given page size and shift.
    ///
    /// `size` must be `1 << shift`; debug builds assert this.
    #[inline]
    #[must_use]
    pub const fn new(size: u32, shift: u32) -> Self {
        debug_assert!(size.is_power_of_two());
        debug_assert!(size == 1 << shift);
        Self { size, shift }
    }

    #[inline]
    #[must_use]
    pub const fn size(self) -> u32 {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        self.shift
    }

    /// Low-bit mask selecting the in-page offset (`size - 1`).
    #[inline]
    #[must_use]
    pub const fn mask(self) -> u32 {
        self.size - 1
    }

    /// In-page offset of a raw address.
    #[inline]
    #[must_use]
    pub const fn offset(self, raw: u32) -> u32 {
        raw & self.mask()
    }

    /// Page base of a raw address (offset cleared).
    #[inline]
    #[must_use]
    pub const fn base(self, raw: u32) -> u32 {
        raw & !self.mask()
    }

    /// Frame number of a raw address.
    #[inline]
    #[must_use]
    pub const fn frame(self, raw: u32) -> u32 {
        raw >> self.shift
    }

    /// Split a pseudo-physical address into its frame number and offset.
    #[inline]
    #[must_use]
    pub const fn split_physical(self, pa: PhysicalAddress) -> (Pfn, u32) {
        (Pfn::new(self.frame(pa.as_u32())), self.offset(pa.as_u32()))
    }

    /// Recombine a pseudo-physical frame number and offset.
    #[inline]
    #[must_use]
    pub const fn join_physical(self, pfn: Pfn, offset: u32) -> PhysicalAddress {
        PhysicalAddress::new((pfn.as_u32() << self.shift) | self.offset(offset))
    }

    /// Split a machine address into its frame number and offset.
    #[inline]
    #[must_use]
    pub const fn split_machine(self, ma: MachineAddress) -> (Mfn, u32) {
        (Mfn::new(self.frame(ma.as_u32())), self.offset(ma.as_u32()))
    }

    /// Recombine a machine frame number and offset.
    #[inline]
    #[must_use]
    pub const fn join_machine(self, mfn: Mfn, offset: u32) -> MachineAddress {
        MachineAddress::new((mfn.as_u32() << self.shift) | self.offset(offset))
    }
}
