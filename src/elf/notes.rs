//! The notes in a core file carry everything that isn't memory content:
//! register state, the auxiliary vector, and the mapped-file table.
use super::Stream;
use crate::utils;
use std::error::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoteType {
    /// General purpose registers and signal info for one thread. A core has
    /// one of these per thread; the faulting thread comes first.
    PrStatus,

    /// Floating point register values.
    PrFPReg,

    /// Process name, arguments, run state.
    PrPsInfo,

    /// The auxiliary vector the kernel handed to the process at exec time.
    /// See https://man7.org/linux/man-pages/man3/getauxval.3.html
    AuxV,

    /// Extended signal info.
    SigInfo,

    /// Memory-mapped files, see fill_files_note in
    /// https://android.googlesource.com/kernel/common/+/6e7bfa046de8/fs/binfmt_elf.c
    File,

    Unknown(u32),
}

impl NoteType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => NoteType::PrStatus,
            2 => NoteType::PrFPReg,
            3 => NoteType::PrPsInfo,
            6 => NoteType::AuxV,
            0x53494749 => NoteType::SigInfo,
            0x46494c45 => NoteType::File,
            _ => NoteType::Unknown(value),
        }
    }
}

pub const NT_PRSTATUS: u32 = 1;
pub const NT_AUXV: u32 = 6;
pub const NT_FILE: u32 = 0x46494c45;

pub struct Note {
    pub name: String,
    pub ntype: NoteType,
    pub contents: NoteContents,
}

#[derive(Debug)]
pub struct NoteContents {
    pub offset: usize,
    pub size: u32,
}

/// Reads one self-describing note record and leaves the stream positioned at
/// the next one (name and desc are both padded out to four bytes).
pub fn read_note(s: &mut Stream) -> Result<(String, u32, NoteContents), Box<dyn Error>> {
    let n_namesz = s.read_word()?;
    let n_descsz = s.read_word()?;
    let n_type = s.read_word()?;

    utils::require(n_namesz > 0, "note with an empty name")?;
    let name_bytes = s.reader.slice(s.offset, (n_namesz - 1) as usize)?.to_vec();
    let name = String::from_utf8(name_bytes)?;
    s.offset += utils::align_to_word(n_namesz) as usize;

    let desc_offset = s.offset;
    s.reader.slice(desc_offset, n_descsz as usize)?; // truncated note?
    s.offset += utils::align_to_word(n_descsz) as usize;

    Ok((
        name,
        n_type,
        NoteContents {
            offset: desc_offset,
            size: n_descsz,
        },
    ))
}

/// One key/value pair out of the auxiliary vector.
#[derive(Clone, Copy)]
pub struct AuxvEntry {
    pub atype: u64,
    pub value: u64,
}

pub const AT_PHDR: u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;
pub const AT_PAGESZ: u64 = 6;

impl AuxvEntry {
    pub fn type_name(&self) -> &'static str {
        match self.atype {
            0 => "AT_NULL",
            1 => "AT_IGNORE",
            2 => "AT_EXECFD",
            3 => "AT_PHDR",
            4 => "AT_PHENT",
            5 => "AT_PHNUM",
            6 => "AT_PAGESZ",
            7 => "AT_BASE",
            8 => "AT_FLAGS",
            9 => "AT_ENTRY",
            10 => "AT_NOTELF",
            11 => "AT_UID",
            12 => "AT_EUID",
            13 => "AT_GID",
            14 => "AT_EGID",
            15 => "AT_PLATFORM",
            16 => "AT_HWCAP",
            17 => "AT_CLKTCK",
            23 => "AT_SECURE",
            24 => "AT_BASE_PLATFORM",
            25 => "AT_RANDOM",
            26 => "AT_HWCAP2",
            31 => "AT_EXECFN",
            32 => "AT_SYSINFO",
            33 => "AT_SYSINFO_EHDR",
            _ => "AT_???",
        }
    }
}

/// Parses auxv note contents: ulong pairs terminated by AT_NULL.
pub fn read_auxv(s: &mut Stream, size: u32) -> Result<Vec<AuxvEntry>, Box<dyn Error>> {
    let end = s.offset + size as usize;
    let mut entries = Vec::new();
    while s.offset < end {
        let atype = s.read_ulong()?;
        let value = s.read_ulong()?;
        if atype == 0 {
            break;
        }
        entries.push(AuxvEntry { atype, value });
    }
    Ok(entries)
}

/// One row of the NT_FILE table. Unlike a debugger that only wants names we
/// keep the rows exactly as dumped: the page offset of each row is what ties
/// a load segment back to a position inside its backing file.
pub struct MappedFileEntry {
    pub start: u64,
    pub end: u64,

    /// Offset into the backing file, in pages.
    pub page_offset: u64,

    pub path: String,
}

pub fn read_mapped_files(
    s: &mut Stream,
    size: u32,
) -> Result<(u64, Vec<MappedFileEntry>), Box<dyn Error>> {
    let end = s.offset + size as usize;
    let count = s.read_ulong()?;
    let page_size = s.read_ulong()?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = s.read_ulong()?;
        let end_addr = s.read_ulong()?;
        let page_offset = s.read_ulong()?;
        entries.push(MappedFileEntry {
            start,
            end: end_addr,
            page_offset,
            path: String::new(),
        });
    }
    for entry in entries.iter_mut() {
        if s.offset >= end {
            return Err("NT_FILE name table is truncated".into());
        }
        entry.path = s.read_string()?;
    }
    Ok((page_size, entries))
}

/// Register state and signal info for one thread.
pub struct PrStatus {
    /// The signal that stopped the thread.
    pub signal_num: i32,
    pub signal_code: i32,
    pub pid: i32,

    /// General purpose registers, laid out as in the kernel's pt_regs for
    /// the captured architecture. For x86-64 that is 27 values ending with
    /// r15..gs; see
    /// https://elixir.bootlin.com/linux/v4.9/source/arch/x86/include/uapi/asm/ptrace.h#L60
    pub registers: Vec<u64>,
}

pub fn read_prstatus(s: &mut Stream, size: u32) -> Result<PrStatus, Box<dyn Error>> {
    let end = s.offset + size as usize;

    // See elf_prstatus in
    // https://docs.huihoo.com/doxygen/linux/kernel/3.7/uapi_2linux_2elfcore_8h_source.html
    let signal_num = s.read_int()?;
    let signal_code = s.read_int()?;
    let _errno = s.read_int()?;
    let _current_signal = s.read_half()?;
    let _padding = s.read_half()?;
    let _pending_signals = s.read_ulong()?;
    let _held_signals = s.read_ulong()?;
    let pid = s.read_int()?;
    let _ppid = s.read_int()?;
    let _pgrp = s.read_int()?;
    let _sid = s.read_int()?;
    for _ in 0..4 {
        let _tv_sec = s.read_ulong()?; // utime, stime, cutime, cstime
        let _tv_usec = s.read_ulong()?;
    }

    // Whatever remains before pr_fpvalid is the register dump.
    let mut registers = Vec::new();
    let reg_bytes = end.saturating_sub(s.offset).saturating_sub(8);
    let reg_size = if s.reader.sixty_four_bit { 8 } else { 4 };
    for _ in 0..reg_bytes / reg_size {
        registers.push(s.read_ulong()?);
    }

    Ok(PrStatus {
        signal_num,
        signal_code,
        pid,
        registers,
    })
}

impl PrStatus {
    pub fn signal(&self) -> &'static str {
        match self.signal_num {
            1 => "SIGHUP", // see https://man7.org/linux/man-pages/man7/signal.7.html
            2 => "SIGINT",
            3 => "SIGQUIT",
            4 => "SIGILL",
            5 => "SIGTRAP",
            6 => "SIGABRT",
            7 => "SIGBUS",
            8 => "SIGFPE",
            9 => "SIGKILL",
            10 => "SIGUSR1",
            11 => match self.signal_code {
                1 => "SIGSEGV: Address not mapped to object", // SEGV_MAPERR
                2 => "SIGSEGV: Invalid permissions for mapped object", // SEGV_ACCERR
                _ => "SIGSEGV",
            },
            12 => "SIGUSR2",
            13 => "SIGPIPE",
            14 => "SIGALRM",
            15 => "SIGTERM",
            _ => "unknown signal",
        }
    }

    /// x86-64 register names in pt_regs order.
    pub fn register_name(&self, n: usize) -> &'static str {
        match n {
            0 => "r15",
            1 => "r14",
            2 => "r13",
            3 => "r12",
            4 => "rbp",
            5 => "rbx",
            6 => "r11",
            7 => "r10",
            8 => "r9",
            9 => "r8",
            10 => "rax",
            11 => "rcx",
            12 => "rdx",
            13 => "rsi",
            14 => "rdi",
            15 => "orig_rax",
            16 => "rip",
            17 => "cs",
            18 => "eflags",
            19 => "rsp",
            20 => "ss",
            21 => "fs_base",
            22 => "gs_base",
            23 => "ds",
            24 => "es",
            25 => "fs",
            26 => "gs",
            _ => "?",
        }
    }
}
