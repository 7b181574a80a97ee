//! Reconstruction of the guest's pfn-to-mfn table.
//!
//! A paravirtualized guest keeps its own frame-number translation table in
//! guest memory, published to the world through a chain rooted at the
//! domain's shared-info frame: shared-info names one frame (the
//! *frame-list-list*), whose entries name the frames of the *frame-list*,
//! whose entries name the frames of the leaf table itself. Walking the chain
//! once and keeping the leaf mapped turns every later `pfn → mfn` question
//! into an array load.

use std::ops::Deref;

use guestmem_addresses::{Mfn, PageGeometry, Pfn};
use guestmem_frame::{FrameMapper, Protection, u32_at};
use log::{debug, warn};

use crate::domain::DomainControl;
use crate::{Error, XenVersion};

/// Byte offsets into the x86-32 shared-info frame: 32 vcpu-info slots of
/// 64 bytes, two 128-byte event-channel bitmaps and 12 bytes of wallclock
/// precede the arch block.
pub(crate) const ARCH_MAX_PFN: usize = 2316;
pub(crate) const ARCH_FRAME_LIST_LIST: usize = 2320;

/// The materialized leaf table: one window over all of its frames, alive
/// until the owning instance is torn down.
#[derive(Debug)]
pub(crate) struct PfnToMfnTable<W> {
    window: W,
    nr_pfns: u32,
}

impl<W: Deref<Target = [u8]>> PfnToMfnTable<W> {
    pub fn nr_pfns(&self) -> u32 {
        self.nr_pfns
    }

    /// The machine frame recorded for `pfn`, or `None` past the end of the
    /// table. The stored value may be the invalid-frame sentinel; it is
    /// returned as recorded.
    pub fn lookup(&self, pfn: Pfn) -> Option<Mfn> {
        if pfn.as_u32() >= self.nr_pfns {
            return None;
        }
        Some(Mfn::new(u32_at(&self.window, pfn.as_u32() as usize * 4)))
    }
}

/// Walk the shared-info chain and map the leaf table.
///
/// Runs at most once per instance. The scaffold mappings (shared-info, the
/// frame-list-list and the frame-list) are dropped before returning on
/// every path, success or failure, so a failed materialization holds
/// nothing afterwards and leaves no partial state behind.
pub(crate) fn materialize<M: FrameMapper>(
    mapper: &M,
    domain: &dyn DomainControl,
    geometry: PageGeometry,
) -> Result<PfnToMfnTable<M::Window>, Error> {
    let shared_info = mapper
        .map_page(Protection::READ, domain.shared_info_frame())
        .inspect_err(|err| warn!("cannot map the shared-info frame: {err}"))?;

    // Xen 3.1.0 does not publish max_pfn in shared-info; ask the memory op.
    let nr_pfns = match domain.version() {
        XenVersion::V3_1_0 => domain.maximum_gpfn()? + 1,
        _ => u32_at(&shared_info, ARCH_MAX_PFN),
    };
    let list_list_mfn = Mfn::new(u32_at(&shared_info, ARCH_FRAME_LIST_LIST));
    drop(shared_info);

    // Frame pointers per page; each frame-list-list entry covers fpp²
    // pfns, each frame-list entry fpp.
    let fpp = geometry.size() / 4;
    let list_frames = nr_pfns.div_ceil(fpp * fpp);
    let table_frames = nr_pfns.div_ceil(fpp);
    debug!(
        "reconstructing the frame table: {nr_pfns:#x} pfns, \
         {list_frames} frame-list frame(s), {table_frames} leaf frame(s)"
    );

    let list_list = mapper
        .map_page(Protection::READ, list_list_mfn)
        .inspect_err(|err| warn!("cannot map the frame-list-list: {err}"))?;
    let list_mfns = read_mfns(&list_list, list_frames);
    drop(list_list);

    let frame_list = mapper
        .map_pages(Protection::READ, &list_mfns)
        .inspect_err(|err| warn!("cannot map the frame-list: {err}"))?;
    let table_mfns = read_mfns(&frame_list, table_frames);
    drop(frame_list);

    let window = mapper
        .map_pages(Protection::READ, &table_mfns)
        .inspect_err(|err| warn!("cannot map the pfn-to-mfn table: {err}"))?;

    Ok(PfnToMfnTable { window, nr_pfns })
}

fn read_mfns(window: &[u8], count: u32) -> Vec<Mfn> {
    (0..count as usize)
        .map(|i| Mfn::new(u32_at(window, i * 4)))
        .collect()
}
