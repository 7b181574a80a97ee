//! # Machine-Frame Windows
//!
//! The seam between address translation and whatever actually backs the
//! guest's machine frames.
//!
//! Everything above this crate reasons in frame numbers; everything below it
//! is either a hypervisor foreign-map call or a slice of a memory image. The
//! [`FrameMapper`] trait is that boundary: give it a machine frame number and
//! a [`Protection`], get back a byte-addressable [window](FrameMapper::Window)
//! whose lifetime the caller controls. Dropping a window releases the
//! mapping.
//!
//! Two implementations matter in practice:
//!
//! - a hypervisor-backed mapper wrapping the foreign-map primitive (lives
//!   with the driver, outside this workspace), and
//! - [`ImageMapper`], included here, which serves windows out of an in-memory
//!   copy of a physical-memory image and doubles as the simulated machine
//!   memory in tests.
//!
//! Windows over live frames are *not* snapshots; the guest keeps running and
//! may rewrite the frame under the mapping. That is inherent to live
//! introspection and callers must tolerate it.

mod image;

use core::ops::Deref;

use guestmem_addresses::Mfn;

pub use image::{ImageMapper, ImageWindow};

bitflags::bitflags! {
    /// Access protection requested for a mapped window.
    ///
    /// Forwarded to the backing store as-is; a file-backed mapper only ever
    /// honors [`Protection::READ`].
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct Protection: u32 {
        /// Window may be read.
        const READ = 1 << 0;
        /// Window may be written (live foreign mappings only).
        const WRITE = 1 << 1;
    }
}

/// A frame-mapping failure.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The backing store could not produce a mapping for this frame.
    #[error("machine frame {mfn:?} cannot be mapped")]
    Unmappable { mfn: Mfn },

    /// The frame lies beyond the end of the memory image.
    #[error("machine frame {mfn:?} lies outside the memory image")]
    OutOfImage { mfn: Mfn },
}

/// Little-endian `u32` load out of a mapped window.
///
/// Panics if `offset + 4` exceeds the window; callers derive offsets from
/// page-aligned table bases, which keeps them in range by construction.
#[inline]
#[must_use]
pub fn u32_at(window: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&window[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

/// Little-endian `u64` load out of a mapped window.
#[inline]
#[must_use]
pub fn u64_at(window: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&window[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

/// Maps machine frames into byte-addressable windows.
///
/// ### Contract
///
/// - A window returned for `n` frames is exactly `n * page_size` bytes long
///   and virtually contiguous, regardless of how scattered the frames are.
/// - Ownership of the window moves to the caller; the mapping is released
///   when the window is dropped. Windows from separate calls have independent
///   lifetimes.
/// - Errors are reported verbatim; the mapper performs no translation of
///   frame numbers.
pub trait FrameMapper {
    /// The byte-addressable view handed to callers.
    type Window: Deref<Target = [u8]>;

    /// Map a single machine frame.
    fn map_page(&self, prot: Protection, mfn: Mfn) -> Result<Self::Window, MapError>;

    /// Map `mfns.len()` machine frames as one virtually contiguous window,
    /// in the given order.
    fn map_pages(&self, prot: Protection, mfns: &[Mfn]) -> Result<Self::Window, MapError>;
}
