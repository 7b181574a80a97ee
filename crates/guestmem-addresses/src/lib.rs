//! # Guest Address and Frame Types
//!
//! Strongly typed wrappers for the three address spaces a 32-bit guest
//! introspector juggles, plus the frame numbers derived from them.
//!
//! ## Overview
//!
//! Introspecting a paravirtualized domain means moving between three distinct
//! 32-bit address spaces, and a raw `u32` says nothing about which one a value
//! lives in. These zero-cost newtypes carry that intent:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | A guest virtual address, translated by the guest's page tables. |
//! | [`PhysicalAddress`] | A guest pseudo-physical address, as the guest kernel sees RAM. |
//! | [`MachineAddress`] | A host machine address, what the hypervisor actually maps. |
//! | [`Pfn`] | A pseudo-physical frame number (`PhysicalAddress >> shift`). |
//! | [`Mfn`] | A machine frame number (`MachineAddress >> shift`). |
//!
//! [`PageGeometry`] captures the target's page size and shift once at
//! construction and provides the split/join helpers used everywhere else, so
//! page arithmetic never hard-codes 4096 outside of a default.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use guestmem_addresses::*;
//! let geometry = PageGeometry::DEFAULT;
//! let pa = PhysicalAddress::new(0x0001_2345);
//!
//! let (pfn, offset) = geometry.split_physical(pa);
//! assert_eq!(pfn.as_u32(), 0x12);
//! assert_eq!(offset, 0x345);
//! ```
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]` over `u32` and implement `Copy`,
//!   `Eq`, `Ord`, and `Hash`, making them usable as cache keys.
//! - Conversions between the spaces are deliberately absent here; crossing
//!   from pseudo-physical to machine is the PFN-to-MFN table's job and never
//!   a free cast.

mod address;
mod frame;
mod geometry;

pub use address::{MachineAddress, PhysicalAddress, VirtualAddress};
pub use frame::{Mfn, Pfn};
pub use geometry::PageGeometry;
