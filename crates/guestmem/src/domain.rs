//! The hypervisor-side contract consumed in live mode.

use guestmem_addresses::{MachineAddress, Mfn};

/// The hypervisor interface revisions this crate distinguishes.
///
/// Only one distinction matters for memory introspection: Xen 3.1.0 reports
/// the guest's frame count through the *maximum gpfn* memory operation, while
/// its neighbors publish `max_pfn` in the shared-info frame.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum XenVersion {
    V3_0_4,
    V3_1_0,
    V3_2_0,
}

/// A context-query failure.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ContextError {
    /// The hypervisor refused the guest-context query for this vcpu.
    #[error("hypervisor refused the context query for vcpu {vcpu}")]
    VcpuContext { vcpu: u32 },

    /// The maximum-gpfn memory operation failed.
    #[error("hypervisor memory operation for the maximum gpfn failed")]
    MaximumGpfn,
}

/// Guest context of one virtual CPU, as returned by the hypervisor.
///
/// Only the control registers travel through this crate; `ctrlreg[3]` holds
/// the page-directory base the kernel is running on.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct VcpuContext {
    pub ctrlreg: [u32; 8],
}

impl VcpuContext {
    /// The page-directory base, with the low control bits masked off.
    #[inline]
    #[must_use]
    pub const fn cr3(&self) -> MachineAddress {
        MachineAddress::new(self.ctrlreg[3] & 0xFFFF_F000)
    }
}

/// Domain-level queries answered by the hypervisor driver.
///
/// The driver handle itself (how the domain was opened, with which
/// privileges) is outside this crate; an instance only ever asks these four
/// questions of it.
pub trait DomainControl {
    /// Guest context of the given vcpu.
    ///
    /// # Errors
    ///
    /// [`ContextError::VcpuContext`] when the hypervisor refuses the query.
    fn vcpu_context(&self, vcpu: u32) -> Result<VcpuContext, ContextError>;

    /// The domain's highest populated guest pfn (older-ABI fallback for the
    /// frame count).
    ///
    /// # Errors
    ///
    /// [`ContextError::MaximumGpfn`] when the memory operation fails.
    fn maximum_gpfn(&self) -> Result<u32, ContextError>;

    /// Machine frame of the domain's shared-info structure.
    fn shared_info_frame(&self) -> Mfn;

    /// The hypervisor interface revision the domain runs under.
    fn version(&self) -> XenVersion;
}
