//! Turns a [`CoreImage`] into an ELF core on disk. Two passes: first compute
//! every offset from the region table alone, then stream the bytes out. By
//! the time anything is written the layout is final, so a region that turns
//! unreadable mid-dump only costs us its bytes (zero-filled with a warning),
//! never a corrupt file.
use super::{CoreImage, Decision, MemorySource, ThreadState, Vma};
use crate::space::{Error, Result};
use crate::utils;
use std::io::Write;
use std::path::Path;

const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;
const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;

/// Regions are streamed in chunks so a multi-gigabyte heap doesn't need a
/// matching buffer here.
const CHUNK: usize = 64 * 1024;

/// x86-64 pt_regs slots in an NT_PRSTATUS note.
const NUM_REGS: usize = 27;

pub fn write_core<S: MemorySource>(image: &CoreImage, source: &mut S, path: &Path) -> Result<()> {
    match write_inner(image, source, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            // Never leave a half-written core behind.
            let _ = std::fs::remove_file(path);
            Err(err)
        }
    }
}

fn write_inner<S: MemorySource>(image: &CoreImage, source: &mut S, path: &Path) -> Result<()> {
    let included: Vec<(&Vma, Decision)> = image
        .vmas
        .iter()
        .zip(image.decisions.iter())
        .filter(|(_, d)| **d != Decision::Exclude)
        .map(|(v, d)| (v, *d))
        .collect();

    let phnum = 1 + included.len();
    if phnum > 0xffff {
        return Err(Error::ReconstructionFailed(format!(
            "{phnum} segments won't fit a 16-bit phnum"
        )));
    }

    let notes = build_notes(image, &included);
    let note_off = EHDR_SIZE + PHDR_SIZE * phnum as u64;
    let data_off = utils::align_up(note_off + notes.len() as u64, image.page_size);

    let mut header = Vec::with_capacity(data_off as usize);
    push_ehdr(&mut header, image.machine, phnum as u16);
    push_phdr(&mut header, PT_NOTE, 0, note_off, 0, notes.len() as u64, 0, 0);
    let mut offset = data_off;
    for (vma, decision) in included.iter() {
        let filesz = match decision {
            Decision::Capture => vma.len(),
            _ => 0,
        };
        push_phdr(
            &mut header,
            PT_LOAD,
            vma.flags,
            offset,
            vma.start,
            filesz,
            vma.len(),
            image.page_size,
        );
        offset += filesz;
    }
    header.extend_from_slice(&notes);
    header.resize(data_off as usize, 0);

    let file = std::fs::File::create(path)
        .map_err(|err| Error::ReconstructionFailed(format!("can't create {path:?}: {err}")))?;
    let mut out = std::io::BufWriter::new(file);
    let io_err = |err: std::io::Error| Error::ReconstructionFailed(format!("write failed: {err}"));
    out.write_all(&header).map_err(io_err)?;

    let mut buf = vec![0u8; CHUNK];
    for (vma, decision) in included.iter() {
        if *decision != Decision::Capture {
            continue;
        }
        let mut addr = vma.start;
        while addr < vma.end {
            let len = ((vma.end - addr) as usize).min(CHUNK);
            if let Err(err) = source.read(addr, &mut buf[..len]) {
                // The region was readable when we planned the dump. Keep the
                // layout intact and move on.
                utils::warn(&format!("zero-filling {len} bytes at {addr:#x}: {err}"));
                buf[..len].fill(0);
            }
            out.write_all(&buf[..len]).map_err(io_err)?;
            addr += len as u64;
        }
    }
    out.flush().map_err(io_err)?;
    Ok(())
}

fn build_notes(image: &CoreImage, included: &[(&Vma, Decision)]) -> Vec<u8> {
    let mut notes = Vec::new();
    if let Some(main) = image.threads.first() {
        add_note(&mut notes, crate::elf::NT_PRSTATUS, &prstatus_desc(main));
    }
    add_note(&mut notes, crate::elf::NT_AUXV, &image.auxv);

    let files: Vec<&Vma> = included
        .iter()
        .filter(|(v, _)| v.is_file && v.path.is_some())
        .map(|(v, _)| *v)
        .collect();
    if !files.is_empty() {
        let mut desc = Vec::new();
        push_u64(&mut desc, files.len() as u64);
        push_u64(&mut desc, image.page_size);
        for vma in files.iter() {
            push_u64(&mut desc, vma.start);
            push_u64(&mut desc, vma.end);
            push_u64(&mut desc, vma.offset / image.page_size);
        }
        for vma in files.iter() {
            desc.extend_from_slice(vma.path.as_ref().unwrap().as_bytes());
            desc.push(0);
        }
        add_note(&mut notes, crate::elf::NT_FILE, &desc);
    }

    for thread in image.threads.iter().skip(1) {
        add_note(&mut notes, crate::elf::NT_PRSTATUS, &prstatus_desc(thread));
    }
    notes
}

/// elf_prstatus for one thread: the 112-byte header, the register file, then
/// pr_fpvalid. Built field by field so there's no dependence on host struct
/// layout.
fn prstatus_desc(thread: &ThreadState) -> Vec<u8> {
    let mut desc = Vec::new();
    push_u32(&mut desc, thread.signal as u32); // si_signo
    push_u32(&mut desc, 0); // si_code
    push_u32(&mut desc, 0); // si_errno
    push_u16(&mut desc, thread.signal as u16); // pr_cursig
    push_u16(&mut desc, 0);
    push_u64(&mut desc, 0); // pr_sigpend
    push_u64(&mut desc, 0); // pr_sighold
    push_u32(&mut desc, thread.tid as u32);
    push_u32(&mut desc, 0); // ppid
    push_u32(&mut desc, 0); // pgrp
    push_u32(&mut desc, 0); // sid
    for _ in 0..8 {
        push_u64(&mut desc, 0); // pr_utime .. pr_cstime
    }
    for i in 0..NUM_REGS {
        push_u64(&mut desc, thread.registers.get(i).copied().unwrap_or(0));
    }
    push_u64(&mut desc, 0); // pr_fpvalid + padding
    desc
}

fn add_note(buf: &mut Vec<u8>, ntype: u32, desc: &[u8]) {
    let name = b"CORE";
    push_u32(buf, name.len() as u32 + 1);
    push_u32(buf, desc.len() as u32);
    push_u32(buf, ntype);
    buf.extend_from_slice(name);
    buf.push(0);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    buf.extend_from_slice(desc);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn push_ehdr(buf: &mut Vec<u8>, machine: u16, phnum: u16) {
    buf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    buf.extend_from_slice(&[0u8; 8]);
    push_u16(buf, 4); // ET_CORE
    push_u16(buf, machine);
    push_u32(buf, 1);
    push_u64(buf, 0); // e_entry
    push_u64(buf, EHDR_SIZE); // e_phoff
    push_u64(buf, 0); // e_shoff
    push_u32(buf, 0); // e_flags
    push_u16(buf, EHDR_SIZE as u16);
    push_u16(buf, PHDR_SIZE as u16);
    push_u16(buf, phnum);
    push_u16(buf, 0);
    push_u16(buf, 0);
    push_u16(buf, 0);
}

#[allow(clippy::too_many_arguments)]
fn push_phdr(
    buf: &mut Vec<u8>,
    ptype: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
) {
    push_u32(buf, ptype);
    push_u32(buf, flags);
    push_u64(buf, offset);
    push_u64(buf, vaddr);
    push_u64(buf, 0); // paddr
    push_u64(buf, filesz);
    push_u64(buf, memsz);
    push_u64(buf, align);
}

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dump::DefaultFilter;
    use crate::elf::{AT_PAGESZ, CoreFile, READ_FLAG, WRITE_FLAG};
    use crate::space::{AddressSpace, Source};
    use crate::testing::{patterned, temp_path, write_backing};

    /// Serves one contiguous span of fake target memory.
    struct SpanSource {
        start: u64,
        bytes: Vec<u8>,
    }

    impl MemorySource for SpanSource {
        fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
            let end = self.start + self.bytes.len() as u64;
            if addr < self.start || addr + buf.len() as u64 > end {
                return Err(Error::TargetUnreadable(format!("{addr:#x} is gone")));
            }
            let at = (addr - self.start) as usize;
            buf.copy_from_slice(&self.bytes[at..at + buf.len()]);
            Ok(())
        }
    }

    fn auxv_bytes(pairs: &[(u64, u64)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (atype, value) in pairs {
            push_u64(&mut bytes, *atype);
            push_u64(&mut bytes, *value);
        }
        push_u64(&mut bytes, 0);
        push_u64(&mut bytes, 0);
        bytes
    }

    #[test]
    fn round_trips_through_the_loader() {
        let heap = patterned(0x2000, 42);
        let lib_bytes = patterned(0x1000, 17);
        let lib = write_backing("round_trip.so", &lib_bytes);

        let vmas = vec![
            Vma {
                start: 0x10000,
                end: 0x12000,
                offset: 0,
                flags: READ_FLAG | WRITE_FLAG,
                path: None,
                is_file: false,
                readable: true,
            },
            // A big clean file-backed mapping: headers only, recovered from
            // the file by the loader.
            Vma {
                start: 0x7f0000000000,
                end: 0x7f0000000000 + (21 << 20),
                offset: 0,
                flags: READ_FLAG,
                path: Some(lib.to_str().unwrap().to_string()),
                is_file: true,
                readable: true,
            },
        ];
        let threads = vec![
            ThreadState { tid: 100, signal: 6, registers: (0..27).collect() },
            ThreadState { tid: 101, signal: 0, registers: (100..127).collect() },
        ];
        let image = CoreImage::new(
            100,
            0x3e,
            0x1000,
            vmas,
            auxv_bytes(&[(AT_PAGESZ, 0x1000)]),
            threads,
            &DefaultFilter,
        );
        assert_eq!(image.decisions, vec![Decision::Capture, Decision::HeadersOnly]);

        let path = temp_path("round_trip.core");
        let mut source = SpanSource { start: 0x10000, bytes: heap.clone() };
        write_core(&image, &mut source, &path).unwrap();

        let space = AddressSpace::new(CoreFile::new(path).unwrap()).unwrap();
        assert_eq!(space.read_default(0x10100, 16).unwrap(), &heap[0x100..0x110]);

        // The skipped mapping resolves through its backing file.
        let block = space.find_block(0x7f0000000000).unwrap();
        assert_eq!(block.file_size, 0);
        assert_eq!(
            space.read_default(0x7f0000000000, 16).unwrap(),
            &lib_bytes[..16]
        );

        let threads = space.threads();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].pid, 100);
        assert_eq!(threads[0].signal_num, 6);
        assert_eq!(threads[0].registers, (0..27).collect::<Vec<u64>>());
        assert_eq!(threads[1].pid, 101);

        assert_eq!(space.auxval(AT_PAGESZ), Some(0x1000));
        assert_eq!(space.page_size, 0x1000);
    }

    #[test]
    fn unreadable_regions_zero_fill_without_corrupting_layout() {
        let vmas = vec![
            Vma {
                start: 0x10000,
                end: 0x11000,
                offset: 0,
                flags: READ_FLAG,
                path: None,
                is_file: false,
                readable: true,
            },
            Vma {
                start: 0x20000,
                end: 0x21000,
                offset: 0,
                flags: READ_FLAG,
                path: None,
                is_file: false,
                readable: true,
            },
        ];
        let image = CoreImage::new(
            1,
            0x3e,
            0x1000,
            vmas,
            auxv_bytes(&[(AT_PAGESZ, 0x1000)]),
            vec![ThreadState { tid: 1, signal: 0, registers: vec![0; 27] }],
            &DefaultFilter,
        );

        // Only the second region is actually readable.
        let second = patterned(0x1000, 8);
        let mut source = SpanSource { start: 0x20000, bytes: second.clone() };
        let path = temp_path("zero_fill.core");
        write_core(&image, &mut source, &path).unwrap();

        let space = AddressSpace::new(CoreFile::new(path).unwrap()).unwrap();
        assert_eq!(space.read_default(0x10000, 16).unwrap(), vec![0u8; 16]);
        assert_eq!(space.read_default(0x20000, 16).unwrap(), &second[..16]);
    }

    #[test]
    fn failed_writes_leave_no_file_behind() {
        let image = CoreImage::new(
            1,
            0x3e,
            0x1000,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            &DefaultFilter,
        );
        let path = std::env::temp_dir().join("no-such-dir").join("x.core");
        let mut source = SpanSource { start: 0, bytes: Vec::new() };
        match write_core(&image, &mut source, &path) {
            Err(Error::ReconstructionFailed(_)) => (),
            Err(err) => panic!("wrong error: {err}"),
            Ok(_) => panic!("expected ReconstructionFailed"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn excluded_regions_get_no_header() {
        let vmas = vec![
            Vma {
                start: 0x10000,
                end: 0x11000,
                offset: 0,
                flags: 0,
                path: None,
                is_file: false,
                readable: false,
            },
            Vma {
                start: 0x20000,
                end: 0x21000,
                offset: 0,
                flags: READ_FLAG,
                path: None,
                is_file: false,
                readable: true,
            },
        ];
        let image = CoreImage::new(
            1,
            0x3e,
            0x1000,
            vmas,
            auxv_bytes(&[(AT_PAGESZ, 0x1000)]),
            vec![ThreadState { tid: 1, signal: 0, registers: vec![0; 27] }],
            &DefaultFilter,
        );
        let bytes = patterned(0x1000, 3);
        let mut source = SpanSource { start: 0x20000, bytes };
        let path = temp_path("excluded.core");
        write_core(&image, &mut source, &path).unwrap();

        let space = AddressSpace::new(CoreFile::new(path).unwrap()).unwrap();
        assert_eq!(space.blocks().len(), 1);
        assert!(space.find_block(0x10000).is_none());
        assert!(space.find_block(0x20000).is_some());

        // Forcing the origin still works, captured bytes are in the file.
        assert!(space.read(0x20000, 8, &[Source::Origin]).is_ok());
    }
}
