//! Translation caches, both tolerant of guest-side remapping.

use std::num::NonZeroUsize;

use guestmem_addresses::{MachineAddress, PageGeometry, VirtualAddress};
use log::trace;
use lru::LruCache;

/// Bounded LRU of `(pid, virtual page) → machine page` translations.
///
/// A hit skips the page-table walk and the pfn-to-mfn conversion entirely.
/// Entries are never validated against the live guest; a process that
/// remaps a page leaves a stale entry behind until it ages out or the pid is
/// invalidated, and the caller reads whatever the cached frame now holds.
pub(crate) struct TranslationCache {
    entries: LruCache<(i32, u32), u32>,
    geometry: PageGeometry,
}

impl TranslationCache {
    const CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

    pub fn new(geometry: PageGeometry) -> Self {
        Self {
            entries: LruCache::new(Self::CAPACITY),
            geometry,
        }
    }

    /// Cached machine address for `vaddr`, with the in-page offset
    /// reapplied from the lookup address.
    pub fn lookup(&mut self, pid: i32, vaddr: VirtualAddress) -> Option<MachineAddress> {
        let page = self.geometry.base(vaddr.as_u32());
        let base = *self.entries.get(&(pid, page))?;
        Some(MachineAddress::new(
            base | self.geometry.offset(vaddr.as_u32()),
        ))
    }

    pub fn insert(&mut self, pid: i32, vaddr: VirtualAddress, mach: MachineAddress) {
        let page = self.geometry.base(vaddr.as_u32());
        let base = self.geometry.base(mach.as_u32());
        trace!("caching pid {pid} page {page:#010x} -> {base:#010x}");
        self.entries.put((pid, page), base);
    }

    /// Drop every translation learned for `pid`.
    pub fn invalidate(&mut self, pid: i32) {
        let stale: Vec<(i32, u32)> = self
            .entries
            .iter()
            .map(|(key, _)| *key)
            .filter(|(p, _)| *p == pid)
            .collect();
        for key in stale {
            self.entries.pop(&key);
        }
    }
}

/// Small LRU of `pid → page-directory base` resolutions.
pub(crate) struct PidPgdCache {
    entries: LruCache<i32, u32>,
}

impl PidPgdCache {
    const CAPACITY: NonZeroUsize = NonZeroUsize::new(64).unwrap();

    pub fn new() -> Self {
        Self {
            entries: LruCache::new(Self::CAPACITY),
        }
    }

    pub fn lookup(&mut self, pid: i32) -> Option<MachineAddress> {
        self.entries.get(&pid).map(|pgd| MachineAddress::new(*pgd))
    }

    pub fn insert(&mut self, pid: i32, pgd: MachineAddress) {
        self.entries.put(pid, pgd.as_u32());
    }

    pub fn invalidate(&mut self, pid: i32) {
        self.entries.pop(&pid);
    }
}
