//! The three address spaces of an introspected 32-bit guest.

use core::fmt;

/// A guest **virtual** address.
///
/// Only meaningful relative to some page-directory base; the same value maps
/// to different frames in different processes.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

/// A guest **pseudo-physical** address.
///
/// What the guest kernel believes is RAM. On a paravirtualized domain this is
/// one more translation away from the frames the hypervisor hands out; on a
/// hardware-virtualized domain or a memory image the two coincide.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);

/// A host **machine** address.
///
/// The address space the hypervisor's foreign-map primitive speaks, and the
/// byte offset into a memory image in file mode.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MachineAddress(u32);

macro_rules! address_impl {
    ($name:ident, $tag:literal) => {
        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(v: u32) -> Self {
                Self(v)
            }

            #[inline]
            #[must_use]
            pub const fn zero() -> Self {
                Self(0)
            }

            #[inline]
            #[must_use]
            pub const fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "(0x{:08X})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:08x}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                Self(v)
            }
        }
    };
}

address_impl!(VirtualAddress, "VA");
address_impl!(PhysicalAddress, "PA");
address_impl!(MachineAddress, "MA");
