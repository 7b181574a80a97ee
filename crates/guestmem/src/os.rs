//! The guest-OS-side contract: process and symbol resolution.

use guestmem_addresses::{MachineAddress, VirtualAddress};

/// Which operating system the guest runs.
///
/// Drives OS-specific behavior in the core. Today that is exactly one
/// thing: non-present page-table entries are classified on Windows targets.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum OsType {
    #[default]
    Unknown,
    Linux,
    Windows,
}

/// Resolution services provided by OS-specific introspection code.
///
/// Walking task lists or parsing kernel symbol tables is a different job
/// from translating addresses; implementations live with the OS support
/// code and are consulted here through this seam. Returning `None` means
/// the resolver does not know; that is not an error by itself.
pub trait OsView {
    /// Page-directory base for a process, or `None` when the pid is unknown.
    fn pid_to_pgd(&self, pid: i32) -> Option<MachineAddress>;

    /// Virtual address of a kernel symbol, or `None` when unresolved.
    fn kernel_symbol(&self, symbol: &str) -> Option<VirtualAddress>;
}
