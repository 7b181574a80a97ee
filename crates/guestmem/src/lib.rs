//! # Guest Memory Introspection
//!
//! Byte-level access to the memory of a 32-bit x86 guest, live behind a
//! hypervisor or frozen in a physical-memory image, from outside the guest.
//!
//! ## The pipeline
//!
//! A caller hands in a guest virtual address; what comes back is a window
//! onto host-visible bytes. Three translations happen in between, each owned
//! by one layer of this workspace:
//!
//! ```text
//! virtual address
//!     │  page-table walk (guestmem-paging), rooted at cr3 or a process pgd
//!     ▼
//! pseudo-physical address
//!     │  pfn → mfn via the reconstructed frame table (identity for
//!     │  hardware-virtualized guests and memory images)
//!     ▼
//! machine address
//!     │  frame mapping (guestmem-frame): foreign-map or image slice
//!     ▼
//! byte window
//! ```
//!
//! The [`Instance`] ties the pipeline together per target and carries the
//! caches that make repeated lookups cheap: a bounded LRU of
//! `(pid, page) → machine page` translations and a small `pid → pgd` cache.
//! Both tolerate staleness: a live guest may remap a page after the cache
//! learned it, and the resulting bytes mean whatever they mean. That is the
//! price of introspecting a running target without stopping it.
//!
//! ## Collaborators
//!
//! The instance consumes, rather than implements, the surrounding machinery:
//! a [`FrameMapper`] for the actual mappings, a [`DomainControl`] handle for
//! vcpu context and domain metadata in live mode, and an optional [`OsView`]
//! that resolves pids to page directories and kernel symbols to virtual
//! addresses.
//!
//! ## Example
//!
//! ```rust
//! # use guestmem::*;
//! // A tiny "memory image": frame 0x12 filled with 0xAB.
//! let mut image = vec![0u8; 0x13 * 4096];
//! image[0x12 * 4096..].fill(0xAB);
//!
//! let mapper = ImageMapper::new(image, PageGeometry::DEFAULT);
//! let mut instance = Instance::file(
//!     mapper,
//!     VirtualAddress::new(0xC010_2000),
//!     0xC000_0000,
//!     InstanceOptions::default(),
//! );
//!
//! let window = instance
//!     .access_pa(PhysicalAddress::new(0x0001_2345), Protection::READ)
//!     .unwrap();
//! assert_eq!(window.offset(), 0x345);
//! assert_eq!(window.bytes()[0], 0xAB);
//! ```

mod access;
mod cache;
mod domain;
mod instance;
mod os;
mod p2m;

#[cfg(test)]
pub(crate) mod testutil;

pub use guestmem_addresses::{
    MachineAddress, Mfn, PageGeometry, Pfn, PhysicalAddress, VirtualAddress,
};
pub use guestmem_frame::{FrameMapper, ImageMapper, MapError, Protection};
pub use guestmem_paging::buffalo::{DiagnosticSink, NonPresentDiagnostic, NonPresentKind};
pub use guestmem_paging::{PagingMode, TranslateError};

pub use access::AccessWindow;
pub use domain::{ContextError, DomainControl, VcpuContext, XenVersion};
pub use instance::{Instance, InstanceOptions, Mode};
pub use os::{OsType, OsView};

/// An introspection failure.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The frame backing store failed to produce a mapping.
    #[error(transparent)]
    Map(#[from] MapError),

    /// The hypervisor refused a context or memory-op query.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// A page-table walk reached a non-present entry.
    #[error("virtual address {vaddr} is not mapped in the target")]
    NotMapped { vaddr: VirtualAddress },

    /// A pseudo-physical frame number beyond the guest's frame count.
    #[error("{pfn:?} is beyond the guest frame count {nr_pfns:#x}")]
    OutOfRange { pfn: Pfn, nr_pfns: u32 },

    /// The operation is not available in the instance's mode.
    #[error("{operation} is not supported in this mode")]
    Unsupported { operation: &'static str },

    /// The OS view could not resolve a kernel symbol.
    #[error("kernel symbol `{symbol}` is not known")]
    UnknownSymbol { symbol: String },
}

impl From<TranslateError> for Error {
    fn from(err: TranslateError) -> Self {
        match err {
            TranslateError::NotMapped { vaddr } => Self::NotMapped { vaddr },
            TranslateError::Map(map) => Self::Map(map),
        }
    }
}
