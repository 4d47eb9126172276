//! One load block and the backing sources that can serve bytes for it.
use crate::elf::Reader;
use std::path::PathBuf;
use std::rc::Rc;

/// A backing file shared by every block mapped from it. Opened once per path
/// and memory mapped read-only; blocks index into it with their own offsets.
pub struct FileMap {
    pub path: PathBuf,
    pub mmap: memmap2::Mmap,
}

impl FileMap {
    pub fn new(path: PathBuf) -> Result<Self, std::io::Error> {
        let file = std::fs::File::open(&path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(FileMap { path, mmap })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// A validated ELF view of the file, for symbol table reads. Not every
    /// mapped file is an ELF image (think fonts or jars) so this can fail
    /// where plain byte access works fine.
    pub fn elf_reader(&self) -> Result<Reader, Box<dyn std::error::Error>> {
        Reader::new(&self.path)
    }
}

/// One PT_LOAD range of the target's address space. Bytes for any offset can
/// come from up to three places: the core file itself (origin), the on-disk
/// file that was mapped there (mmap), and session patches (overlay).
pub struct LoadBlock {
    pub vaddr: u64,
    pub mem_size: u64,

    /// PF_X | PF_W | PF_R as dumped.
    pub flags: u32,

    /// Where this block's bytes start inside the core file.
    pub origin_offset: u64,

    /// How many bytes the core actually captured. Zero for blocks the dumper
    /// skipped (typically clean file-backed pages).
    pub file_size: u64,

    /// Path from the NT_FILE table, present even when the file itself
    /// couldn't be opened.
    pub name: Option<String>,

    pub mapped: Option<Rc<FileMap>>,

    /// Byte offset of this block's first byte inside the backing file.
    pub mapped_offset: u64,

    /// Session patches. Materialized on first write, always block-sized.
    pub overlay: Option<Vec<u8>>,
}

impl LoadBlock {
    /// One past the last mapped address.
    pub fn end(&self) -> u64 {
        self.vaddr + self.mem_size
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.vaddr && addr < self.end()
    }

    /// "rwx" style permission string.
    pub fn perms(&self) -> String {
        let mut result = String::with_capacity(3);
        result.push(if self.flags & crate::elf::READ_FLAG != 0 { 'r' } else { '-' });
        result.push(if self.flags & crate::elf::WRITE_FLAG != 0 { 'w' } else { '-' });
        result.push(if self.flags & crate::elf::EXECUTE_FLAG != 0 { 'x' } else { '-' });
        result
    }

    /// Which sources currently have bytes for this block, e.g. "om-" for a
    /// block with origin and mmap backing but no patches.
    pub fn sources(&self) -> String {
        let mut result = String::with_capacity(3);
        result.push(if self.file_size > 0 { 'o' } else { '-' });
        result.push(if self.mapped.is_some() { 'm' } else { '-' });
        result.push(if self.overlay.is_some() { 'v' } else { '-' });
        result
    }

    /// How many bytes the backing file can serve starting at this block's
    /// mapped offset, zero when there's no usable backing.
    pub fn mapped_len(&self) -> u64 {
        match &self.mapped {
            Some(map) => (map.len() as u64).saturating_sub(self.mapped_offset),
            None => 0,
        }
    }
}
