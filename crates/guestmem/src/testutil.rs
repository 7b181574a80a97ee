//! Shared fixtures: a scripted domain handle and a window-counting mapper
//! over simulated machine memory.

use std::cell::Cell;
use std::ops::Deref;
use std::rc::Rc;

use guestmem_addresses::{Mfn, PageGeometry};
use guestmem_frame::{FrameMapper, ImageMapper, ImageWindow, MapError, Protection};

use crate::domain::{ContextError, DomainControl, VcpuContext, XenVersion};

pub(crate) fn put_u32(memory: &mut [u8], addr: u32, value: u32) {
    let addr = addr as usize;
    memory[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(memory: &mut [u8], addr: u32, value: u64) {
    let addr = addr as usize;
    memory[addr..addr + 8].copy_from_slice(&value.to_le_bytes());
}

/// Machine memory holding a two-leaf frame-table chain: frame 1 =
/// shared-info, frame 2 = frame-list-list, frame 3 = frame-list, frames 4
/// and 5 = the leaf table. Leaf entry for pfn `n` reads `0x8000 + n`.
pub(crate) fn chain_image(nr_pfns: u32) -> Vec<u8> {
    const PAGE: usize = 4096;
    let mut memory = vec![0u8; 6 * PAGE];
    put_u32(&mut memory, (PAGE + crate::p2m::ARCH_MAX_PFN) as u32, nr_pfns);
    put_u32(
        &mut memory,
        (PAGE + crate::p2m::ARCH_FRAME_LIST_LIST) as u32,
        2,
    );
    put_u32(&mut memory, (2 * PAGE) as u32, 3);
    put_u32(&mut memory, (3 * PAGE) as u32, 4);
    put_u32(&mut memory, (3 * PAGE + 4) as u32, 5);
    for pfn in 0..nr_pfns {
        put_u32(&mut memory, (4 * PAGE) as u32 + pfn * 4, 0x8000 + pfn);
    }
    memory
}

/// A [`DomainControl`] whose answers are scripted up front.
pub(crate) struct FakeDomain {
    shared_info: Mfn,
    version: XenVersion,
    max_gpfn: Option<u32>,
    context: Option<VcpuContext>,
}

impl FakeDomain {
    pub fn new(shared_info: Mfn) -> Self {
        Self {
            shared_info,
            version: XenVersion::V3_2_0,
            max_gpfn: None,
            context: None,
        }
    }

    pub fn with_version(mut self, version: XenVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_maximum_gpfn(mut self, max_gpfn: u32) -> Self {
        self.max_gpfn = Some(max_gpfn);
        self
    }

    pub fn with_cr3(mut self, cr3: u32) -> Self {
        let mut context = VcpuContext::default();
        context.ctrlreg[3] = cr3;
        self.context = Some(context);
        self
    }
}

impl DomainControl for FakeDomain {
    fn vcpu_context(&self, vcpu: u32) -> Result<VcpuContext, ContextError> {
        self.context.ok_or(ContextError::VcpuContext { vcpu })
    }

    fn maximum_gpfn(&self) -> Result<u32, ContextError> {
        self.max_gpfn.ok_or(ContextError::MaximumGpfn)
    }

    fn shared_info_frame(&self) -> Mfn {
        self.shared_info
    }

    fn version(&self) -> XenVersion {
        self.version
    }
}

/// An [`ImageMapper`] that counts mapping calls and live windows, so tests
/// can observe cache hits and the release of scaffold mappings.
pub(crate) struct CountingMapper {
    inner: ImageMapper,
    live: Rc<Cell<usize>>,
    calls: Rc<Cell<usize>>,
}

impl CountingMapper {
    pub fn over(image: Vec<u8>) -> Self {
        Self {
            inner: ImageMapper::new(image, PageGeometry::DEFAULT),
            live: Rc::new(Cell::new(0)),
            calls: Rc::new(Cell::new(0)),
        }
    }

    /// Windows currently alive (mapped and not yet dropped).
    pub fn live_windows(&self) -> usize {
        self.live.get()
    }

    /// Shared handle to the live-window count, for when the mapper itself
    /// moves into an instance.
    pub fn live_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.live)
    }

    /// Shared handle to the mapping-call count.
    pub fn call_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.calls)
    }

    fn track(&self, window: ImageWindow) -> CountedWindow {
        self.live.set(self.live.get() + 1);
        CountedWindow {
            inner: window,
            live: Rc::clone(&self.live),
        }
    }
}

impl FrameMapper for CountingMapper {
    type Window = CountedWindow;

    fn map_page(&self, prot: Protection, mfn: Mfn) -> Result<CountedWindow, MapError> {
        self.calls.set(self.calls.get() + 1);
        self.inner.map_page(prot, mfn).map(|w| self.track(w))
    }

    fn map_pages(&self, prot: Protection, mfns: &[Mfn]) -> Result<CountedWindow, MapError> {
        self.calls.set(self.calls.get() + 1);
        self.inner.map_pages(prot, mfns).map(|w| self.track(w))
    }
}

#[derive(Debug)]
pub(crate) struct CountedWindow {
    inner: ImageWindow,
    live: Rc<Cell<usize>>,
}

impl Deref for CountedWindow {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

impl Drop for CountedWindow {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}
