//! The per-target instance tying the translation pipeline together.

use guestmem_addresses::{MachineAddress, Mfn, PageGeometry, Pfn, PhysicalAddress, VirtualAddress};
use guestmem_frame::FrameMapper;
use guestmem_paging::buffalo::DiagnosticSink;
use guestmem_paging::{PageWalker, PagingMode};
use log::debug;

use crate::Error;
use crate::cache::{PidPgdCache, TranslationCache};
use crate::domain::DomainControl;
use crate::os::{OsType, OsView};
use crate::p2m::{self, PfnToMfnTable};

/// Context queries are pinned to the boot vcpu; which vcpu happens to run
/// the address space a caller cares about is not tracked.
const BOOT_VCPU: u32 = 0;

/// How the target's memory is reached.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Mode {
    /// A running domain behind a hypervisor.
    Live,
    /// A physical-memory image.
    File,
}

/// Construction-time knobs for an [`Instance`].
///
/// Mode is not among them; it is decided by the constructor and fixed for
/// the instance's lifetime.
#[derive(Clone, Debug)]
pub struct InstanceOptions {
    /// Guest operating system; enables Windows-specific diagnostics.
    pub os_type: OsType,
    /// Guest kernel runs PAE paging.
    pub pae: bool,
    /// Hardware-virtualized guest: pseudo-physical frames already are
    /// machine frames.
    pub hvm: bool,
    /// Guest page size, normally 4096.
    pub page_size: u32,
    /// Guest page shift, normally 12.
    pub page_shift: u32,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            os_type: OsType::Unknown,
            pae: false,
            hvm: false,
            page_size: 4096,
            page_shift: 12,
        }
    }
}

/// Mode-specific state, tagged rather than overlaid.
enum Backing<W> {
    Live {
        domain: Box<dyn DomainControl>,
        /// Materialized at most once; `None` until the first conversion
        /// needs it.
        p2m: Option<PfnToMfnTable<W>>,
    },
    File {
        /// Kernel virtual address of the page-directory base, as recovered
        /// from the image during bootstrap.
        kpgd: VirtualAddress,
        /// Kernel direct-mapping offset; `kpgd - page_offset` is the
        /// directory's physical location.
        page_offset: u32,
    },
}

/// A handle onto one introspected target.
///
/// Owns every piece of mutable per-target state (the translation caches and
/// the materialized frame table), so one instance must not be shared across
/// threads without an external lock. Run one instance per thread instead;
/// instances do not share anything.
pub struct Instance<M: FrameMapper> {
    mapper: M,
    os_type: OsType,
    pae: bool,
    hvm: bool,
    geometry: PageGeometry,
    backing: Backing<M::Window>,
    pub(crate) vcache: TranslationCache,
    pid_cache: PidPgdCache,
    os_view: Option<Box<dyn OsView>>,
    diagnostics: Option<Box<dyn DiagnosticSink>>,
}

impl<M: FrameMapper> Instance<M> {
    /// An instance over a running domain.
    pub fn live(mapper: M, domain: Box<dyn DomainControl>, options: InstanceOptions) -> Self {
        Self::new(
            mapper,
            Backing::Live { domain, p2m: None },
            options,
        )
    }

    /// An instance over a physical-memory image.
    ///
    /// `kpgd` and `page_offset` come from whatever bootstrap located the
    /// kernel's page directory inside the image.
    pub fn file(mapper: M, kpgd: VirtualAddress, page_offset: u32, options: InstanceOptions) -> Self {
        Self::new(mapper, Backing::File { kpgd, page_offset }, options)
    }

    fn new(mapper: M, backing: Backing<M::Window>, options: InstanceOptions) -> Self {
        let geometry = PageGeometry::new(options.page_size, options.page_shift);
        Self {
            mapper,
            os_type: options.os_type,
            pae: options.pae,
            hvm: options.hvm,
            geometry,
            backing,
            vcache: TranslationCache::new(geometry),
            pid_cache: PidPgdCache::new(),
            os_view: None,
            diagnostics: None,
        }
    }

    /// Attach the OS-specific resolver for pids and kernel symbols.
    #[must_use]
    pub fn with_os_view(mut self, os_view: Box<dyn OsView>) -> Self {
        self.os_view = Some(os_view);
        self
    }

    /// Attach a sink for non-present-entry diagnostics (Windows targets).
    #[must_use]
    pub fn with_diagnostics(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        match self.backing {
            Backing::Live { .. } => Mode::Live,
            Backing::File { .. } => Mode::File,
        }
    }

    #[must_use]
    pub const fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    #[must_use]
    pub const fn os_type(&self) -> OsType {
        self.os_type
    }

    pub(crate) fn mapper(&self) -> &M {
        &self.mapper
    }

    pub(crate) fn os_view(&self) -> Option<&dyn OsView> {
        self.os_view.as_deref()
    }

    /// The kernel's page-directory base.
    ///
    /// Live targets ask the hypervisor for the boot vcpu's `cr3`; file
    /// targets derive it from the bootstrap values.
    ///
    /// # Errors
    ///
    /// [`Error::Context`] when the hypervisor refuses the context query.
    pub fn current_cr3(&self) -> Result<MachineAddress, Error> {
        match &self.backing {
            Backing::Live { domain, .. } => Ok(domain.vcpu_context(BOOT_VCPU)?.cr3()),
            Backing::File { kpgd, page_offset } => Ok(MachineAddress::new(
                kpgd.as_u32().wrapping_sub(*page_offset),
            )),
        }
    }

    /// Convert a pseudo-physical frame to a machine frame.
    ///
    /// Identity for file targets and hardware-virtualized guests; everything
    /// else goes through the reconstructed frame table, materializing it on
    /// first use.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for a pfn past the guest's frame count;
    /// [`Error::Map`] when materialization cannot map part of the chain.
    pub fn pfn_to_mfn(&mut self, pfn: Pfn) -> Result<Mfn, Error> {
        if self.hvm || matches!(self.backing, Backing::File { .. }) {
            return Ok(Mfn::new(pfn.as_u32()));
        }
        self.materialize_p2m()?;
        let Backing::Live {
            p2m: Some(table), ..
        } = &self.backing
        else {
            // Identity targets were short-circuited and the table was just
            // materialized; nothing reaches this.
            return Err(Error::Unsupported {
                operation: "frame-table reconstruction",
            });
        };
        let nr_pfns = table.nr_pfns();
        table.lookup(pfn).ok_or(Error::OutOfRange { pfn, nr_pfns })
    }

    /// Materialize the pfn-to-mfn table now instead of on first use.
    ///
    /// Succeeds at most once and fails without side effects; later calls are
    /// no-ops. Identity targets have nothing to materialize.
    ///
    /// # Errors
    ///
    /// [`Error::Map`] or [`Error::Context`] from walking the shared-info
    /// chain.
    pub fn ensure_pfn_to_mfn(&mut self) -> Result<(), Error> {
        if self.hvm || matches!(self.backing, Backing::File { .. }) {
            return Ok(());
        }
        self.materialize_p2m()
    }

    fn materialize_p2m(&mut self) -> Result<(), Error> {
        let Backing::Live { domain, p2m } = &mut self.backing else {
            return Ok(());
        };
        if p2m.is_none() {
            *p2m = Some(p2m::materialize(&self.mapper, domain.as_ref(), self.geometry)?);
        }
        Ok(())
    }

    /// Page-directory base for a process, going through the pid cache and
    /// then the OS view. `None` when no resolver is attached or the pid is
    /// unknown to it.
    pub fn pid_to_pgd(&mut self, pid: i32) -> Option<MachineAddress> {
        if let Some(pgd) = self.pid_cache.lookup(pid) {
            return Some(pgd);
        }
        let pgd = self.os_view.as_deref()?.pid_to_pgd(pid)?;
        debug!("pgd for pid {pid} is {pgd}");
        self.pid_cache.insert(pid, pgd);
        Some(pgd)
    }

    /// Forget everything cached for `pid`: its translations and its pgd.
    ///
    /// Call when the process is known reaped or its directory replaced.
    pub fn invalidate_pid(&mut self, pid: i32) {
        self.pid_cache.invalidate(pid);
        self.vcache.invalidate(pid);
    }

    /// Walk the page tables rooted at `pgd` for `vaddr`.
    ///
    /// # Errors
    ///
    /// [`Error::NotMapped`] on a non-present entry, [`Error::Map`] when an
    /// entry's frame cannot be mapped.
    pub fn pagetable_lookup(
        &self,
        pgd: MachineAddress,
        vaddr: VirtualAddress,
    ) -> Result<PhysicalAddress, Error> {
        Ok(self.walker().translate(pgd, vaddr)?)
    }

    /// Translate a kernel virtual address to a physical address using the
    /// current kernel page tables.
    ///
    /// # Errors
    ///
    /// As [`Self::current_cr3`] and [`Self::pagetable_lookup`].
    pub fn translate_kv2p(&self, vaddr: VirtualAddress) -> Result<PhysicalAddress, Error> {
        let cr3 = self.current_cr3()?;
        self.pagetable_lookup(cr3, vaddr)
    }

    pub(crate) fn walker(&self) -> PageWalker<'_, M> {
        let walker = PageWalker::new(&self.mapper, self.geometry, self.paging_mode());
        if self.os_type == OsType::Windows {
            walker.with_windows_diagnostics(self.diagnostics.as_deref())
        } else {
            walker
        }
    }

    const fn paging_mode(&self) -> PagingMode {
        if self.pae {
            PagingMode::Pae
        } else {
            PagingMode::Legacy
        }
    }
}
