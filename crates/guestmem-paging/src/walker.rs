//! The two-variant page-table walker.

use guestmem_addresses::{MachineAddress, PageGeometry, PhysicalAddress, VirtualAddress};
use guestmem_frame::{FrameMapper, MapError, Protection, u32_at, u64_at};
use log::{debug, trace};

use crate::buffalo::{self, DiagnosticSink, NonPresentDiagnostic};
use crate::entry::{LegacyEntry, PaeEntry};

/// Which paging variant the guest kernel runs.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PagingMode {
    /// Two-level 32-bit paging, 4 KiB and 4 MiB pages.
    Legacy,
    /// Three-level PAE paging, 4 KiB and 2 MiB pages.
    Pae,
}

/// A translation failure.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TranslateError {
    /// The walk reached a non-present entry.
    #[error("virtual address {vaddr} is not mapped by the guest page tables")]
    NotMapped { vaddr: VirtualAddress },

    /// Mapping the frame holding a directory or table entry failed.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Walks a guest's page tables from a directory base to a physical address.
///
/// The walker is stateless apart from its configuration; construct one per
/// translation or keep one around, it makes no difference. Entry reads map
/// the containing machine frame privately for the duration of one load, so a
/// walk never holds more than one frame mapping at a time and never aliases
/// windows owned by callers.
///
/// Translation tolerates a live guest: an entry read today may be gone
/// tomorrow, and a successful result is only as fresh as the moment its
/// entries were read.
pub struct PageWalker<'a, M: FrameMapper> {
    mapper: &'a M,
    geometry: PageGeometry,
    mode: PagingMode,
    windows: bool,
    sink: Option<&'a dyn DiagnosticSink>,
}

impl<'a, M: FrameMapper> PageWalker<'a, M> {
    pub fn new(mapper: &'a M, geometry: PageGeometry, mode: PagingMode) -> Self {
        Self {
            mapper,
            geometry,
            mode,
            windows: false,
            sink: None,
        }
    }

    /// Enable non-present-entry classification for a Windows guest, with an
    /// optional sink for the records. Without a sink the classification is
    /// still logged.
    #[must_use]
    pub fn with_windows_diagnostics(mut self, sink: Option<&'a dyn DiagnosticSink>) -> Self {
        self.windows = true;
        self.sink = sink;
        self
    }

    /// Translate `vaddr` through the page tables rooted at `root`.
    ///
    /// `root` is the page-directory base for legacy paging and the
    /// page-directory-pointer-table base for PAE; low bits beyond the
    /// respective alignment are masked off.
    ///
    /// # Errors
    ///
    /// [`TranslateError::NotMapped`] when the walk reaches a non-present
    /// entry; [`TranslateError::Map`] when an entry's frame cannot be mapped.
    pub fn translate(
        &self,
        root: MachineAddress,
        vaddr: VirtualAddress,
    ) -> Result<PhysicalAddress, TranslateError> {
        trace!("translating {vaddr} with table root {root}");
        let paddr = match self.mode {
            PagingMode::Legacy => self.translate_legacy(root, vaddr),
            PagingMode::Pae => self.translate_pae(root, vaddr),
        }?;
        trace!("translated {vaddr} -> {paddr}");
        Ok(paddr)
    }

    fn translate_legacy(
        &self,
        root: MachineAddress,
        vaddr: VirtualAddress,
    ) -> Result<PhysicalAddress, TranslateError> {
        let va = vaddr.as_u32();

        let pgd_addr = MachineAddress::new((root.as_u32() & 0xFFFF_F000) + ((va >> 22) & 0x3FF) * 4);
        let pgd = LegacyEntry::from_bits(self.read_u32(pgd_addr)?);
        trace!("directory entry at {pgd_addr}: {:#010x}", pgd.into_bits());
        if !pgd.present() {
            self.diagnose(vaddr, pgd.into_bits(), false);
            return Err(TranslateError::NotMapped { vaddr });
        }

        if pgd.page_size() {
            trace!("4 MiB page");
            return Ok(PhysicalAddress::new(
                pgd.large_page_base() | (va & 0x003F_FFFF),
            ));
        }

        let pte_addr = MachineAddress::new(pgd.table_base() + ((va >> 12) & 0x3FF) * 4);
        let pte = LegacyEntry::from_bits(self.read_u32(pte_addr)?);
        trace!("table entry at {pte_addr}: {:#010x}", pte.into_bits());
        if !pte.present() {
            self.diagnose(vaddr, pte.into_bits(), true);
            return Err(TranslateError::NotMapped { vaddr });
        }

        Ok(PhysicalAddress::new(pte.page_base() | (va & 0xFFF)))
    }

    fn translate_pae(
        &self,
        root: MachineAddress,
        vaddr: VirtualAddress,
    ) -> Result<PhysicalAddress, TranslateError> {
        let va = vaddr.as_u32();

        let pdpt_addr = MachineAddress::new((root.as_u32() & 0xFFFF_FFE0) + ((va >> 30) & 0x3) * 8);
        let pdpe = PaeEntry::from_bits(self.read_u64(pdpt_addr)?);
        trace!("pointer entry at {pdpt_addr}: {:#018x}", pdpe.into_bits());
        if !pdpe.present() {
            return Err(TranslateError::NotMapped { vaddr });
        }

        let pgd_addr = MachineAddress::new(pdpe.table_base() + ((va >> 21) & 0x1FF) * 8);
        let pgd = PaeEntry::from_bits(self.read_u64(pgd_addr)?);
        trace!("directory entry at {pgd_addr}: {:#018x}", pgd.into_bits());
        if !pgd.present() {
            return Err(TranslateError::NotMapped { vaddr });
        }

        if pgd.page_size() {
            trace!("2 MiB page");
            return Ok(PhysicalAddress::new(
                pgd.large_page_base() | (va & 0x001F_FFFF),
            ));
        }

        let pte_addr = MachineAddress::new(pgd.table_base() + ((va >> 12) & 0x1FF) * 8);
        let pte = PaeEntry::from_bits(self.read_u64(pte_addr)?);
        trace!("table entry at {pte_addr}: {:#018x}", pte.into_bits());
        if !pte.present() {
            return Err(TranslateError::NotMapped { vaddr });
        }

        Ok(PhysicalAddress::new(pte.page_base() | (va & 0xFFF)))
    }

    /// Read a `u32` from guest machine memory.
    ///
    /// # Errors
    ///
    /// Propagates the mapper's failure to map the containing frame.
    pub fn read_u32(&self, addr: MachineAddress) -> Result<u32, MapError> {
        let (mfn, offset) = self.geometry.split_machine(addr);
        let window = self.mapper.map_page(Protection::READ, mfn)?;
        Ok(u32_at(&window, offset as usize))
    }

    /// Read a `u64` from guest machine memory.
    ///
    /// The read must not straddle a frame boundary; table entries never do.
    ///
    /// # Errors
    ///
    /// Propagates the mapper's failure to map the containing frame.
    pub fn read_u64(&self, addr: MachineAddress) -> Result<u64, MapError> {
        let (mfn, offset) = self.geometry.split_machine(addr);
        debug_assert!(offset + 8 <= self.geometry.size());
        let window = self.mapper.map_page(Protection::READ, mfn)?;
        Ok(u64_at(&window, offset as usize))
    }

    fn diagnose(&self, vaddr: VirtualAddress, entry: u32, is_pde: bool) {
        if !self.windows {
            return;
        }
        let kind = buffalo::classify(entry, is_pde);
        debug!("non-present entry {entry:#010x} for {vaddr}: {kind:?}");
        if let Some(sink) = self.sink {
            sink.non_present(&NonPresentDiagnostic {
                vaddr,
                entry,
                is_pde,
                kind,
            });
        }
    }
}
