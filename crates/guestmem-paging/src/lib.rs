//! # 32-bit x86 Guest Paging
//!
//! The page-table walker for introspected 32-bit guests, covering both
//! paging variants a pre-long-mode x86 kernel can run:
//!
//! ```text
//! | Mode   | Levels | Entry | Large page | Split                      |
//! |--------|--------|-------|------------|----------------------------|
//! | Legacy | 2      | u32   | 4 MiB      | 10 | 10 | 12               |
//! | PAE    | 3      | u64   | 2 MiB      | 2 | 9 | 9 | 12             |
//! ```
//!
//! A legacy virtual address indexes a page directory (bits 31–22) and a page
//! table (bits 21–12); a PAE address first selects one of four page-directory
//! pointers (bits 31–30). Either walk can terminate early at a directory
//! entry with the *page-size* bit set, mapping a large page.
//!
//! The walker reads directory and table entries out of guest machine memory
//! through a [`FrameMapper`](guestmem_frame::FrameMapper); each entry read
//! maps the containing frame privately and drops the mapping immediately, so
//! walker reads never alias windows held by callers. The guest keeps running
//! underneath; entries are read once and never cached here.
//!
//! For Windows guests, non-present entries carry forensic meaning in their
//! software bits; the [`buffalo`] module classifies them into a diagnostic
//! side channel without affecting the walk's outcome.

pub mod buffalo;

mod entry;
mod walker;

pub use entry::{LegacyEntry, PaeEntry};
pub use walker::{PageWalker, PagingMode, TranslateError};
