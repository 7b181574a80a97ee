//! The windowed access surface.

use std::ops::Deref;

use guestmem_addresses::{MachineAddress, PhysicalAddress, VirtualAddress};
use guestmem_frame::{FrameMapper, Protection};
use log::trace;

use crate::Error;
use crate::instance::{Instance, Mode};

/// A mapped view of guest memory handed back to the caller.
///
/// Wraps one or more contiguously presented machine frames plus the in-page
/// offset of the requested address. The caller owns the window; dropping it
/// releases the mapping. Windows from separate calls are independent and may
/// outlive the instance method that produced them.
#[derive(Debug)]
pub struct AccessWindow<W> {
    window: W,
    offset: usize,
}

impl<W: Deref<Target = [u8]>> AccessWindow<W> {
    /// Offset of the requested address within the window.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// The bytes from the requested address to the end of the window.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.window[self.offset..]
    }

    /// The whole window, from its first frame's first byte.
    #[must_use]
    pub fn frame_bytes(&self) -> &[u8] {
        &self.window
    }

    /// Give up the offset and take the raw window.
    pub fn into_window(self) -> W {
        self.window
    }
}

impl<M: FrameMapper> Instance<M> {
    /// Map the frame containing a machine address.
    ///
    /// # Errors
    ///
    /// [`Error::Map`] when the frame cannot be mapped.
    pub fn access_ma(
        &self,
        mach: MachineAddress,
        prot: Protection,
    ) -> Result<AccessWindow<M::Window>, Error> {
        let (mfn, offset) = self.geometry().split_machine(mach);
        let window = self.mapper().map_page(prot, mfn)?;
        Ok(AccessWindow {
            window,
            offset: offset as usize,
        })
    }

    /// Map the frame containing a pseudo-physical address.
    ///
    /// # Errors
    ///
    /// [`Error::Map`] and, on live paravirtualized targets,
    /// [`Error::OutOfRange`] from the frame-number conversion.
    pub fn access_pa(
        &mut self,
        phys: PhysicalAddress,
        prot: Protection,
    ) -> Result<AccessWindow<M::Window>, Error> {
        let (pfn, offset) = self.geometry().split_physical(phys);
        let mfn = self.pfn_to_mfn(pfn)?;
        let window = self.mapper().map_page(prot, mfn)?;
        Ok(AccessWindow {
            window,
            offset: offset as usize,
        })
    }

    /// Map the frame behind a kernel virtual address.
    ///
    /// # Errors
    ///
    /// As [`Self::access_user_va`] with pid 0.
    pub fn access_kernel_va(
        &mut self,
        vaddr: VirtualAddress,
        prot: Protection,
    ) -> Result<AccessWindow<M::Window>, Error> {
        self.access_user_va(vaddr, 0, prot)
    }

    /// Map the frame behind a virtual address in a process' address space.
    ///
    /// Pid 0 selects the kernel's own page tables. A cached translation is
    /// used when present; otherwise the page tables are walked, the result
    /// converted to a machine address and cached, and the frame mapped.
    /// Nothing is cached when the translation fails.
    ///
    /// # Errors
    ///
    /// [`Error::NotMapped`] when the walk dead-ends or the pid cannot be
    /// resolved, [`Error::Context`] when the kernel pgd is unavailable,
    /// [`Error::Map`] / [`Error::OutOfRange`] from the later stages.
    pub fn access_user_va(
        &mut self,
        vaddr: VirtualAddress,
        pid: i32,
        prot: Protection,
    ) -> Result<AccessWindow<M::Window>, Error> {
        if let Some(mach) = self.vcache.lookup(pid, vaddr) {
            trace!("cached translation for pid {pid}: {vaddr} -> {mach}");
            return self.access_ma(mach, prot);
        }

        let mach = self.translate_user_va(vaddr, pid)?;
        self.vcache.insert(pid, vaddr, mach);
        self.access_ma(mach, prot)
    }

    /// Map a contiguous run of virtual pages as one window.
    ///
    /// Walks every page of `[vaddr & !mask, vaddr + size]`, converts each to
    /// its machine frame and maps the run in one piece; the window's offset
    /// points at `vaddr` within its first page. One page beyond the aligned
    /// size is always included.
    ///
    /// # Errors
    ///
    /// [`Error::Unsupported`] in file mode; otherwise as
    /// [`Self::access_user_va`] for each page.
    pub fn access_user_va_range(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        pid: i32,
        prot: Protection,
    ) -> Result<AccessWindow<M::Window>, Error> {
        if self.mode() == Mode::File {
            return Err(Error::Unsupported {
                operation: "contiguous range access",
            });
        }

        let geometry = self.geometry();
        let num_pages = (geometry.offset(vaddr.as_u32()) + size) / geometry.size() + 1;
        let pgd = self.pgd_base(vaddr, pid)?;
        trace!("mapping {num_pages} pages at {vaddr} for pid {pid}");

        let start = geometry.base(vaddr.as_u32());
        let mut mfns = Vec::with_capacity(num_pages as usize);
        for page in 0..num_pages {
            let page_va = VirtualAddress::new(start.wrapping_add(page * geometry.size()));
            let paddr = self.walker().translate(pgd, page_va)?;
            let (pfn, _) = geometry.split_physical(paddr);
            mfns.push(self.pfn_to_mfn(pfn)?);
        }

        let window = self.mapper().map_pages(prot, &mfns)?;
        Ok(AccessWindow {
            window,
            offset: geometry.offset(vaddr.as_u32()) as usize,
        })
    }

    /// Kernel-space variant of [`Self::access_user_va_range`].
    ///
    /// # Errors
    ///
    /// As [`Self::access_user_va_range`] with pid 0.
    pub fn access_kernel_va_range(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        prot: Protection,
    ) -> Result<AccessWindow<M::Window>, Error> {
        self.access_user_va_range(vaddr, size, 0, prot)
    }

    /// Map the frame behind a kernel symbol, resolved through the OS view.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownSymbol`] when no OS view is attached or it cannot
    /// resolve the symbol; otherwise as [`Self::access_kernel_va`].
    pub fn access_kernel_symbol(
        &mut self,
        symbol: &str,
        prot: Protection,
    ) -> Result<AccessWindow<M::Window>, Error> {
        let vaddr = self
            .os_view()
            .and_then(|view| view.kernel_symbol(symbol))
            .ok_or_else(|| Error::UnknownSymbol {
                symbol: symbol.to_owned(),
            })?;
        trace!("kernel symbol `{symbol}` is at {vaddr}");
        self.access_kernel_va(vaddr, prot)
    }

    /// Uncached walk plus frame-number conversion.
    fn translate_user_va(
        &mut self,
        vaddr: VirtualAddress,
        pid: i32,
    ) -> Result<MachineAddress, Error> {
        let pgd = self.pgd_base(vaddr, pid)?;
        let paddr = self.walker().translate(pgd, vaddr)?;
        let (pfn, offset) = self.geometry().split_physical(paddr);
        let mfn = self.pfn_to_mfn(pfn)?;
        Ok(self.geometry().join_machine(mfn, offset))
    }

    fn pgd_base(&mut self, vaddr: VirtualAddress, pid: i32) -> Result<MachineAddress, Error> {
        if pid == 0 {
            self.current_cr3()
        } else {
            self.pid_to_pgd(pid).ok_or(Error::NotMapped { vaddr })
        }
    }
}

#[cfg(test)]
mod tests {
    use guestmem_addresses::{Mfn, PageGeometry, Pfn};

    use super::*;
    use crate::instance::InstanceOptions;
    use crate::os::{OsType, OsView};
    use crate::testutil::{CountingMapper, FakeDomain, put_u32, put_u64};

    const PAGE: u32 = 4096;

    /// Machine memory with legacy page tables rooted at 0x1000 mapping the
    /// identity for virtual pages 0x7000..=0x9000, plus recognizable bytes.
    fn identity_low_memory() -> Vec<u8> {
        let mut memory = vec![0u8; 0xA * PAGE as usize];
        // Directory slot 0 -> page table at 0x2000.
        put_u32(&mut memory, 0x1000, 0x2003);
        for page in 0x7..=0x9u32 {
            put_u32(&mut memory, 0x2000 + page * 4, (page << 12) | 0x3);
            memory[(page << 12) as usize..][..PAGE as usize].fill(page as u8);
        }
        memory
    }

    fn live_hvm_instance(memory: Vec<u8>, cr3: u32) -> Instance<CountingMapper> {
        let mapper = CountingMapper::over(memory);
        let domain = FakeDomain::new(Mfn::new(0)).with_cr3(cr3);
        Instance::live(
            mapper,
            Box::new(domain),
            InstanceOptions {
                hvm: true,
                ..InstanceOptions::default()
            },
        )
    }

    struct OnePidView {
        pid: i32,
        pgd: MachineAddress,
    }

    impl OsView for OnePidView {
        fn pid_to_pgd(&self, pid: i32) -> Option<MachineAddress> {
            (pid == self.pid).then_some(self.pgd)
        }

        fn kernel_symbol(&self, symbol: &str) -> Option<VirtualAddress> {
            (symbol == "init_task").then_some(VirtualAddress::new(0x7123))
        }
    }

    #[test]
    fn access_pa_splits_frame_and_offset() {
        let mut image = vec![0u8; 0x13 * PAGE as usize];
        image[0x12 * PAGE as usize..].fill(0xAB);
        let mapper = CountingMapper::over(image);
        let mut instance = Instance::file(
            mapper,
            VirtualAddress::zero(),
            0,
            InstanceOptions::default(),
        );

        let window = instance
            .access_pa(PhysicalAddress::new(0x0001_2345), Protection::READ)
            .unwrap();
        assert_eq!(window.offset(), 0x345);
        assert_eq!(window.frame_bytes().len(), PAGE as usize);
        assert!(window.bytes().iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn access_ma_skips_frame_conversion() {
        let mut image = vec![0u8; 2 * PAGE as usize];
        image[PAGE as usize + 0x10] = 0xCD;
        let mapper = CountingMapper::over(image);
        let instance = Instance::file(
            mapper,
            VirtualAddress::zero(),
            0,
            InstanceOptions::default(),
        );

        let window = instance
            .access_ma(MachineAddress::new(0x1010), Protection::READ)
            .unwrap();
        assert_eq!(window.offset(), 0x10);
        assert_eq!(window.bytes()[0], 0xCD);
    }

    #[test]
    fn kernel_va_goes_through_the_page_tables() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000);

        let window = instance
            .access_kernel_va(VirtualAddress::new(0x7123), Protection::READ)
            .unwrap();
        assert_eq!(window.offset(), 0x123);
        assert_eq!(window.bytes()[0], 0x7);
    }

    #[test]
    fn user_va_hits_the_cache_on_the_second_access() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000);
        let calls = {
            let window = instance
                .access_kernel_va(VirtualAddress::new(0x8040), Protection::READ)
                .unwrap();
            assert_eq!(window.bytes()[0], 0x8);
            instance.mapper().call_counter().get()
        };

        // Second touch of the same page: no walk, exactly one data mapping.
        let window = instance
            .access_kernel_va(VirtualAddress::new(0x8044), Protection::READ)
            .unwrap();
        assert_eq!(window.bytes()[0], 0x8);
        assert_eq!(instance.mapper().call_counter().get(), calls + 1);
    }

    #[test]
    fn invalidation_forces_a_fresh_walk() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000);
        instance
            .access_kernel_va(VirtualAddress::new(0x8040), Protection::READ)
            .unwrap();
        let calls = instance.mapper().call_counter().get();

        instance.invalidate_pid(0);
        instance
            .access_kernel_va(VirtualAddress::new(0x8040), Protection::READ)
            .unwrap();
        // Directory read, table read, data mapping.
        assert_eq!(instance.mapper().call_counter().get(), calls + 3);
    }

    #[test]
    fn failed_walks_do_not_populate_the_cache() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000);
        let unmapped = VirtualAddress::new(0x0000_4000);

        let err = instance
            .access_kernel_va(unmapped, Protection::READ)
            .unwrap_err();
        assert_eq!(err, Error::NotMapped { vaddr: unmapped });
        assert_eq!(instance.vcache.lookup(0, unmapped), None);
    }

    #[test]
    fn range_access_spans_page_boundaries() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000);

        // 0x1003 bytes starting at 0x7FFF touch pages 7, 8 and 9.
        let window = instance
            .access_user_va_range(VirtualAddress::new(0x7FFF), 0x1003, 0, Protection::READ)
            .unwrap();
        assert_eq!(window.offset(), 0xFFF);
        assert_eq!(window.frame_bytes().len(), 3 * PAGE as usize);
        assert_eq!(window.bytes()[0], 0x7);
        assert_eq!(window.bytes()[1], 0x8);
        assert_eq!(window.bytes()[0x1002], 0x9);
    }

    #[test]
    fn range_access_is_not_available_on_images() {
        let mapper = CountingMapper::over(vec![0u8; PAGE as usize]);
        let mut instance = Instance::file(
            mapper,
            VirtualAddress::zero(),
            0,
            InstanceOptions::default(),
        );

        let err = instance
            .access_kernel_va_range(VirtualAddress::new(0x7FFF), 0x1003, Protection::READ)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[test]
    fn range_access_fails_when_a_page_is_unmapped() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000);

        // Pages 0x9 is the last mapped one; spilling past it dead-ends.
        let err = instance
            .access_user_va_range(VirtualAddress::new(0x9800), 0x1000, 0, Protection::READ)
            .unwrap_err();
        assert!(matches!(err, Error::NotMapped { .. }));
    }

    #[test]
    fn user_pids_resolve_through_the_os_view() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0xDEAD_0000)
            .with_os_view(Box::new(OnePidView {
                pid: 41,
                pgd: MachineAddress::new(0x1000),
            }));

        let window = instance
            .access_user_va(VirtualAddress::new(0x9010), 41, Protection::READ)
            .unwrap();
        assert_eq!(window.bytes()[0], 0x9);

        // Unknown pids cannot be translated.
        let err = instance
            .access_user_va(VirtualAddress::new(0x9010), 42, Protection::READ)
            .unwrap_err();
        assert_eq!(
            err,
            Error::NotMapped {
                vaddr: VirtualAddress::new(0x9010)
            }
        );
    }

    #[test]
    fn kernel_symbols_resolve_through_the_os_view() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000).with_os_view(
            Box::new(OnePidView {
                pid: 1,
                pgd: MachineAddress::zero(),
            }),
        );

        let window = instance
            .access_kernel_symbol("init_task", Protection::READ)
            .unwrap();
        assert_eq!(window.offset(), 0x123);
        assert_eq!(window.bytes()[0], 0x7);

        let err = instance
            .access_kernel_symbol("no_such_symbol", Protection::READ)
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnknownSymbol {
                symbol: "no_such_symbol".to_owned()
            }
        );
    }

    #[test]
    fn pae_guests_walk_three_levels() {
        let mut memory = vec![0u8; 0xA * PAGE as usize];
        // Pointer table at 0x3000, directory at 0x4000, table at 0x5000.
        put_u64(&mut memory, 0x3000, 0x4001);
        put_u64(&mut memory, 0x4000, 0x5001);
        put_u64(&mut memory, 0x5008, 0x7003);
        memory[0x7000..0x8000].fill(0x77);
        let mapper = CountingMapper::over(memory);
        let domain = FakeDomain::new(Mfn::new(0)).with_cr3(0x3000);
        let mut instance = Instance::live(
            mapper,
            Box::new(domain),
            InstanceOptions {
                pae: true,
                hvm: true,
                ..InstanceOptions::default()
            },
        );

        let window = instance
            .access_kernel_va(VirtualAddress::new(0x1234), Protection::READ)
            .unwrap();
        assert_eq!(window.offset(), 0x234);
        assert_eq!(window.bytes()[0], 0x77);
    }

    #[test]
    fn translate_kv2p_matches_the_walk() {
        let instance = live_hvm_instance(identity_low_memory(), 0x1000);
        let paddr = instance
            .translate_kv2p(VirtualAddress::new(0x8123))
            .unwrap();
        assert_eq!(paddr.as_u32(), 0x8123);
    }

    #[test]
    fn windows_outlive_the_access_call_until_dropped() {
        let mut instance = live_hvm_instance(identity_low_memory(), 0x1000);
        let live = instance.mapper().live_counter();

        let first = instance
            .access_kernel_va(VirtualAddress::new(0x7000), Protection::READ)
            .unwrap();
        let second = instance
            .access_kernel_va(VirtualAddress::new(0x8000), Protection::READ)
            .unwrap();
        assert_eq!(live.get(), 2);

        drop(first);
        assert_eq!(live.get(), 1);
        assert_eq!(second.bytes()[0], 0x8);
        drop(second);
        assert_eq!(live.get(), 0);
    }

    #[test]
    fn pfn_to_mfn_is_exposed_for_live_targets() {
        let mut instance = live_hvm_instance(vec![0u8; PAGE as usize], 0);
        assert_eq!(
            instance.pfn_to_mfn(Pfn::new(0x1234)).unwrap(),
            Mfn::new(0x1234)
        );
        assert_eq!(instance.geometry(), PageGeometry::DEFAULT);
        assert_eq!(instance.os_type(), OsType::Unknown);
    }
}
