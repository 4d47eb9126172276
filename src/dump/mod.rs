//! Core file reconstruction: capture the address space of a live process
//! into an ELF core that the rest of the tool (or any other core consumer)
//! can load. Split so the layout math is testable without a live target:
//! * [`CoreImage`] describes what to write, with bytes pulled through a
//!   [`MemorySource`].
//! * [`layout`] turns a CoreImage into an ELF core on disk.
//! * [`live`] builds a CoreImage from a running process via ptrace.
pub mod layout;
pub mod live;

pub use layout::*;
pub use live::*;

use crate::space::Result;

/// What to do with one region of the target's address space.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Write the region's bytes into the core.
    Capture,

    /// Record the region in the program headers and NT_FILE but write no
    /// bytes (p_filesz of zero). The loader can recover the content from the
    /// backing file later.
    HeadersOnly,

    /// Leave the region out of the core entirely.
    Exclude,
}

/// One region of the target's address space, as found in its memory map.
#[derive(Clone)]
pub struct Vma {
    pub start: u64,
    pub end: u64,

    /// Offset into the backing file, in bytes.
    pub offset: u64,

    /// PF_R | PF_W | PF_X.
    pub flags: u32,

    pub path: Option<String>,

    /// Pseudo-mappings like [vdso] have a name but no file behind it.
    pub is_file: bool,

    pub readable: bool,
}

impl Vma {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }
}

/// Decides per region what ends up in the core. The default policy matches
/// what kernels and debuggers commonly do; callers with special needs (dump
/// everything, dump nothing file-backed) supply their own.
pub trait FilterPolicy {
    fn decide(&self, vma: &Vma) -> Decision;
}

/// Large file-backed read-only regions are recoverable from the file, so
/// past this size we keep only headers for them.
pub const FILE_SKIP_THRESHOLD: u64 = 20 << 20;

/// * Unreadable regions and the [vvar]/[vsyscall] pseudo-mappings are
///   excluded; reading them through /proc/pid/mem fails or lies.
/// * Clean file-backed regions larger than [`FILE_SKIP_THRESHOLD`] keep
///   their headers only.
/// * Everything else is captured.
pub struct DefaultFilter;

impl FilterPolicy for DefaultFilter {
    fn decide(&self, vma: &Vma) -> Decision {
        if !vma.readable {
            return Decision::Exclude;
        }
        if let Some(path) = &vma.path {
            if path == "[vvar]" || path == "[vsyscall]" {
                return Decision::Exclude;
            }
            // Device mappings hang reads on some drivers.
            if vma.is_file && path.starts_with("/dev/") {
                return Decision::Exclude;
            }
            let writable = vma.flags & crate::elf::WRITE_FLAG != 0;
            if vma.is_file && !writable && vma.len() > FILE_SKIP_THRESHOLD {
                return Decision::HeadersOnly;
            }
        }
        Decision::Capture
    }
}

/// Captures everything readable. [vvar] and [vsyscall] stay excluded; reads
/// of those through /proc/pid/mem don't return what the process saw.
pub struct CaptureAll;

impl FilterPolicy for CaptureAll {
    fn decide(&self, vma: &Vma) -> Decision {
        if !vma.readable {
            return Decision::Exclude;
        }
        match vma.path.as_deref() {
            Some("[vvar]") | Some("[vsyscall]") => Decision::Exclude,
            Some(path) if vma.is_file && path.starts_with("/dev/") => Decision::Exclude,
            _ => Decision::Capture,
        }
    }
}

/// Register state for one thread of the target.
pub struct ThreadState {
    pub tid: i32,
    pub signal: i32,

    /// pt_regs order for the captured architecture.
    pub registers: Vec<u64>,
}

/// Everything needed to write a core, gathered up front so the write itself
/// can't be surprised halfway through.
pub struct CoreImage {
    pub pid: i32,
    pub machine: u16,
    pub page_size: u64,

    /// All regions, with their filter decisions applied.
    pub vmas: Vec<Vma>,
    pub decisions: Vec<Decision>,

    /// Raw auxv bytes as read from /proc/pid/auxv (already terminated).
    pub auxv: Vec<u8>,

    /// The main thread first.
    pub threads: Vec<ThreadState>,
}

impl CoreImage {
    pub fn new<F: FilterPolicy>(
        pid: i32,
        machine: u16,
        page_size: u64,
        vmas: Vec<Vma>,
        auxv: Vec<u8>,
        threads: Vec<ThreadState>,
        filter: &F,
    ) -> Self {
        let decisions = vmas.iter().map(|v| filter.decide(v)).collect();
        CoreImage {
            pid,
            machine,
            page_size,
            vmas,
            decisions,
            auxv,
            threads,
        }
    }
}

/// Where the bytes of a captured region come from. Live dumps read
/// /proc/pid/mem; tests hand in a buffer.
pub trait MemorySource {
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vma(path: Option<&str>, len: u64, flags: u32, readable: bool) -> Vma {
        Vma {
            start: 0x1000,
            end: 0x1000 + len,
            offset: 0,
            flags,
            path: path.map(|p| p.to_string()),
            is_file: path.is_some_and(|p| !p.starts_with('[')),
            readable,
        }
    }

    #[test]
    fn default_filter_decisions() {
        use crate::elf::{READ_FLAG, WRITE_FLAG};
        let f = DefaultFilter;

        assert_eq!(f.decide(&vma(None, 0x1000, READ_FLAG | WRITE_FLAG, true)), Decision::Capture);
        assert_eq!(f.decide(&vma(None, 0x1000, 0, false)), Decision::Exclude);
        assert_eq!(f.decide(&vma(Some("[vvar]"), 0x1000, READ_FLAG, true)), Decision::Exclude);
        assert_eq!(f.decide(&vma(Some("[vsyscall]"), 0x1000, READ_FLAG, true)), Decision::Exclude);
        assert_eq!(f.decide(&vma(Some("/dev/dri/card0"), 0x1000, READ_FLAG, true)), Decision::Exclude);

        // Small file-backed regions are captured, huge read-only ones keep
        // headers only, huge writable ones are captured (they're dirty).
        assert_eq!(
            f.decide(&vma(Some("/usr/lib/libc.so"), 0x1000, READ_FLAG, true)),
            Decision::Capture
        );
        assert_eq!(
            f.decide(&vma(Some("/usr/lib/big.so"), 21 << 20, READ_FLAG, true)),
            Decision::HeadersOnly
        );
        assert_eq!(
            f.decide(&vma(Some("/usr/lib/big.so"), 21 << 20, READ_FLAG | WRITE_FLAG, true)),
            Decision::Capture
        );

        // [vdso] style pseudo mappings are captured; they're small and the
        // content exists nowhere else.
        assert_eq!(f.decide(&vma(Some("[vdso]"), 0x1000, READ_FLAG, true)), Decision::Capture);
    }
}
