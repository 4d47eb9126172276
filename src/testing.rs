//! Builds small synthetic core files for tests. Real cores are too big to
//! check in and too opaque to assert against, so tests describe the address
//! space they want and get a well-formed ELF core in the temp directory.
//! The bytes are written by hand here, independent of the dump writer, so
//! reader and writer tests don't validate each other circularly.
use std::path::PathBuf;

pub struct SynthBlock {
    pub vaddr: u64,
    pub mem_size: u64,
    pub flags: u32,

    /// Bytes embedded in the core, may be shorter than mem_size or empty.
    pub origin: Vec<u8>,

    /// Backing file path and page offset for the NT_FILE table.
    pub file: Option<(PathBuf, u64)>,
}

impl SynthBlock {
    /// An anonymous read-write block.
    pub fn anon(vaddr: u64, mem_size: u64, origin: Vec<u8>) -> Self {
        SynthBlock {
            vaddr,
            mem_size,
            flags: crate::elf::READ_FLAG | crate::elf::WRITE_FLAG,
            origin,
            file: None,
        }
    }
}

pub struct SynthCore {
    pub page_size: u64,
    pub blocks: Vec<SynthBlock>,
    pub auxv: Vec<(u64, u64)>,

    /// (pid, signal, registers); registers are padded or truncated to the 27
    /// slots of the x86-64 pt_regs layout.
    pub threads: Vec<(i32, i32, Vec<u64>)>,
}

const NUM_REGS: usize = 27;

impl SynthCore {
    /// An empty x86-64 little-endian core with one thread.
    pub fn x64() -> Self {
        SynthCore {
            page_size: 0x1000,
            blocks: Vec::new(),
            auxv: vec![(crate::elf::AT_PAGESZ, 0x1000)],
            threads: vec![(1234, 11, (0..NUM_REGS as u64).collect())],
        }
    }

    /// Writes the core to the temp directory and returns its path. The name
    /// must be unique per test, tests run concurrently.
    pub fn write(&self, name: &str) -> PathBuf {
        let mut notes = Vec::new();
        for (i, (pid, signal, regs)) in self.threads.iter().enumerate() {
            add_note(&mut notes, "CORE", 1, &prstatus_desc(*pid, *signal, regs));
            if i == 0 {
                add_note(&mut notes, "CORE", 6, &self.auxv_desc());
                if self.blocks.iter().any(|b| b.file.is_some()) {
                    add_note(&mut notes, "CORE", 0x46494c45, &self.nt_file_desc());
                }
            }
        }

        let phnum = 1 + self.blocks.len();
        let note_off = 64 + 56 * phnum as u64;
        let mut bytes = Vec::new();

        // e_ident
        bytes.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        bytes.extend_from_slice(&[0u8; 8]);
        push_u16(&mut bytes, 4); // ET_CORE
        push_u16(&mut bytes, 0x3e); // EM_X86_64
        push_u32(&mut bytes, 1);
        push_u64(&mut bytes, 0); // e_entry
        push_u64(&mut bytes, 64); // e_phoff
        push_u64(&mut bytes, 0); // e_shoff
        push_u32(&mut bytes, 0); // e_flags
        push_u16(&mut bytes, 64);
        push_u16(&mut bytes, 56);
        push_u16(&mut bytes, phnum as u16);
        push_u16(&mut bytes, 0);
        push_u16(&mut bytes, 0);
        push_u16(&mut bytes, 0);
        assert_eq!(bytes.len(), 64);

        push_phdr(&mut bytes, 4, 0, note_off, 0, notes.len() as u64, 0);
        let mut load_off = note_off + notes.len() as u64;
        for b in self.blocks.iter() {
            push_phdr(
                &mut bytes,
                1,
                b.flags,
                load_off,
                b.vaddr,
                b.origin.len() as u64,
                b.mem_size,
            );
            load_off += b.origin.len() as u64;
        }

        bytes.extend_from_slice(&notes);
        for b in self.blocks.iter() {
            bytes.extend_from_slice(&b.origin);
        }

        let path = temp_path(name);
        std::fs::write(&path, &bytes).unwrap();
        path
    }

    fn auxv_desc(&self) -> Vec<u8> {
        let mut desc = Vec::new();
        for (atype, value) in self.auxv.iter() {
            push_u64(&mut desc, *atype);
            push_u64(&mut desc, *value);
        }
        push_u64(&mut desc, 0);
        push_u64(&mut desc, 0);
        desc
    }

    fn nt_file_desc(&self) -> Vec<u8> {
        let backed: Vec<&SynthBlock> = self.blocks.iter().filter(|b| b.file.is_some()).collect();
        let mut desc = Vec::new();
        push_u64(&mut desc, backed.len() as u64);
        push_u64(&mut desc, self.page_size);
        for b in backed.iter() {
            let (_, page_offset) = b.file.as_ref().unwrap();
            push_u64(&mut desc, b.vaddr);
            push_u64(&mut desc, b.vaddr + b.mem_size);
            push_u64(&mut desc, *page_offset);
        }
        for b in backed.iter() {
            let (path, _) = b.file.as_ref().unwrap();
            desc.extend_from_slice(path.to_str().unwrap().as_bytes());
            desc.push(0);
        }
        desc
    }
}

/// The elf_prstatus desc for one x86-64 thread: 112 byte header, 27 general
/// purpose registers, then pr_fpvalid and padding.
fn prstatus_desc(pid: i32, signal: i32, regs: &[u64]) -> Vec<u8> {
    let mut desc = Vec::new();
    push_u32(&mut desc, signal as u32); // si_signo
    push_u32(&mut desc, 1); // si_code
    push_u32(&mut desc, 0); // si_errno
    push_u16(&mut desc, signal as u16); // pr_cursig
    push_u16(&mut desc, 0);
    push_u64(&mut desc, 0); // pr_sigpend
    push_u64(&mut desc, 0); // pr_sighold
    push_u32(&mut desc, pid as u32);
    push_u32(&mut desc, 1); // ppid
    push_u32(&mut desc, pid as u32); // pgrp
    push_u32(&mut desc, pid as u32); // sid
    for _ in 0..8 {
        push_u64(&mut desc, 0); // utime/stime/cutime/cstime
    }
    assert_eq!(desc.len(), 112);
    for i in 0..NUM_REGS {
        push_u64(&mut desc, regs.get(i).copied().unwrap_or(0));
    }
    push_u64(&mut desc, 1); // pr_fpvalid + padding
    desc
}

/// Appends one 4-byte-aligned note record.
pub fn add_note(buf: &mut Vec<u8>, name: &str, ntype: u32, desc: &[u8]) {
    push_u32(buf, name.len() as u32 + 1);
    push_u32(buf, desc.len() as u32);
    push_u32(buf, ntype);
    buf.extend_from_slice(name.as_bytes());
    buf.push(0);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    buf.extend_from_slice(desc);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn push_phdr(buf: &mut Vec<u8>, ptype: u32, flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64) {
    push_u32(buf, ptype);
    push_u32(buf, flags);
    push_u64(buf, offset);
    push_u64(buf, vaddr);
    push_u64(buf, 0); // paddr
    push_u64(buf, filesz);
    push_u64(buf, memsz);
    push_u64(buf, 0x1000); // align
}

pub fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Writes a minimal ET_DYN image with a .dynsym: just enough structure for
/// the symbol reader. Symbols are (name, value, size) triples, all global
/// functions.
pub fn write_min_lib(name: &str, symbols: &[(&str, u64, u64)]) -> PathBuf {
    let mut strtab = vec![0u8];
    let mut name_idx = Vec::new();
    for (sym_name, _, _) in symbols.iter() {
        name_idx.push(strtab.len() as u32);
        strtab.extend_from_slice(sym_name.as_bytes());
        strtab.push(0);
    }

    let symtab_off = (64 + strtab.len()).next_multiple_of(8);
    let mut symtab = vec![0u8; 24]; // the null symbol
    for (i, (_, value, size)) in symbols.iter().enumerate() {
        push_u32(&mut symtab, name_idx[i]);
        symtab.push(0x12); // GLOBAL FUNC
        symtab.push(0);
        push_u16(&mut symtab, 1); // st_shndx, anything defined
        push_u64(&mut symtab, *value);
        push_u64(&mut symtab, *size);
    }
    let shoff = (symtab_off + symtab.len()).next_multiple_of(8);

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    bytes.extend_from_slice(&[0u8; 8]);
    push_u16(&mut bytes, 3); // ET_DYN
    push_u16(&mut bytes, 0x3e);
    push_u32(&mut bytes, 1);
    push_u64(&mut bytes, 0); // e_entry
    push_u64(&mut bytes, 0); // e_phoff
    push_u64(&mut bytes, shoff as u64);
    push_u32(&mut bytes, 0);
    push_u16(&mut bytes, 64);
    push_u16(&mut bytes, 0); // e_phentsize
    push_u16(&mut bytes, 0); // e_phnum
    push_u16(&mut bytes, 64); // e_shentsize
    push_u16(&mut bytes, 3); // null, .dynsym, .dynstr
    push_u16(&mut bytes, 0);
    assert_eq!(bytes.len(), 64);

    bytes.extend_from_slice(&strtab);
    bytes.resize(symtab_off, 0);
    bytes.extend_from_slice(&symtab);
    bytes.resize(shoff, 0);
    push_shdr(&mut bytes, 0, 0, 0, 0, 0, 0); // SHT_NULL
    push_shdr(&mut bytes, 0xb, symtab_off as u64, symtab.len() as u64, 2, 24, 8);
    push_shdr(&mut bytes, 0x3, 64, strtab.len() as u64, 0, 0, 1);

    let path = temp_path(name);
    std::fs::write(&path, &bytes).unwrap();
    path
}

fn push_shdr(buf: &mut Vec<u8>, stype: u32, offset: u64, size: u64, link: u32, entsize: u64, align: u64) {
    push_u32(buf, 0); // sh_name
    push_u32(buf, stype);
    push_u64(buf, 0); // sh_flags
    push_u64(buf, 0); // sh_addr
    push_u64(buf, offset);
    push_u64(buf, size);
    push_u32(buf, link);
    push_u32(buf, 0); // sh_info
    push_u64(buf, align);
    push_u64(buf, entsize);
}

/// Stores a value into a byte buffer at the given offset, little-endian.
pub fn put_u32(buf: &mut [u8], offset: usize, v: u32) {
    buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
}

pub fn put_u64(buf: &mut [u8], offset: usize, v: u64) {
    buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
}

/// A per-process path in the temp directory.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ucore-test-{}-{name}", std::process::id()))
}

/// Writes a backing file for a mapped segment and returns its path.
pub fn write_backing(name: &str, bytes: &[u8]) -> PathBuf {
    let path = temp_path(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Deterministic filler that differs between seeds, so tests can tell which
/// source served a read.
pub fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| ((i as u32 * 7 + seed as u32) % 251) as u8).collect()
}
