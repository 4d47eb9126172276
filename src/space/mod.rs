//! The reconstructed virtual address space of the captured process. This is
//! the heart of the tool: every higher layer (symbols, disassembly, object
//! graph walks) funnels its memory access through [`AddressSpace::read`].
//!
//! Bytes for an address can exist in three places at once and they can
//! disagree, e.g. when the core skipped clean file-backed pages or when the
//! operator has patched memory for what-if analysis. The resolver tries each
//! source in priority order and returns the first one that covers the whole
//! request. It never stitches a request together from multiple sources and it
//! never zero-fills: a gap is an error the caller gets to see.
pub mod block;
pub mod error;

pub use block::*;
pub use error::*;

use crate::elf::{AuxvEntry, CoreFile, Machine, PrStatus};
use crate::utils;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

pub struct AddressSpace {
    pub core: CoreFile,
    pub machine: Machine,

    /// Sorted by vaddr, non-overlapping.
    blocks: Vec<LoadBlock>,

    /// From the NT_FILE note, falling back to AT_PAGESZ, then 4K.
    pub page_size: u64,

    auxv: Vec<AuxvEntry>,
    threads: Vec<PrStatus>,
}

/// What one source can do for a request against one block.
enum Served {
    Full(Vec<u8>),

    /// The source has some of the requested bytes but not all of them.
    Partial,

    /// The source has nothing at all for this block.
    Absent,
}

impl AddressSpace {
    pub fn new(core: CoreFile) -> Result<Self> {
        let machine = core.header.machine;
        let auxv = core.auxv();
        let threads = core.threads();

        let mut blocks: Vec<LoadBlock> = core
            .loads
            .iter()
            .filter(|ph| ph.mem_size > 0)
            .map(|ph| LoadBlock {
                vaddr: ph.vaddr,
                mem_size: ph.mem_size,
                flags: ph.flags,
                origin_offset: ph.offset,
                file_size: ph.file_size.min(ph.mem_size),
                name: None,
                mapped: None,
                mapped_offset: 0,
                overlay: None,
            })
            .collect();
        blocks.sort_by_key(|b| b.vaddr);
        for pair in blocks.windows(2) {
            if pair[1].vaddr < pair[0].end() {
                return Err(Error::MalformedInput(format!(
                    "load segments at {:#x} and {:#x} overlap",
                    pair[0].vaddr, pair[1].vaddr
                )));
            }
        }

        let mapped_files = core.mapped_files();
        let page_size = match &mapped_files {
            Some((size, _)) if *size > 0 => *size,
            _ => auxv
                .iter()
                .find(|e| e.atype == crate::elf::AT_PAGESZ)
                .map_or(4096, |e| e.value),
        };

        if let Some((_, entries)) = &mapped_files {
            let mut cache: HashMap<String, Option<Rc<FileMap>>> = HashMap::new();
            for b in blocks.iter_mut() {
                let Some(entry) = entries.iter().find(|e| e.start <= b.vaddr && b.vaddr < e.end)
                else {
                    continue;
                };
                b.name = Some(entry.path.clone());
                b.mapped_offset = entry.page_offset * page_size + (b.vaddr - entry.start);
                let map = cache.entry(entry.path.clone()).or_insert_with(|| {
                    match FileMap::new(PathBuf::from(&entry.path)) {
                        Ok(m) => Some(Rc::new(m)),
                        Err(err) => {
                            // Cores move between machines, missing backing
                            // files are routine. The block still resolves
                            // through its other sources.
                            utils::warn(&format!("can't map {}: {err}", entry.path));
                            None
                        }
                    }
                });
                b.mapped = map.clone();
            }
        }

        Ok(AddressSpace {
            core,
            machine,
            blocks,
            page_size,
            auxv,
            threads,
        })
    }

    pub fn blocks(&self) -> &[LoadBlock] {
        &self.blocks
    }

    pub fn auxv(&self) -> &[AuxvEntry] {
        &self.auxv
    }

    pub fn auxval(&self, atype: u64) -> Option<u64> {
        self.auxv.iter().find(|e| e.atype == atype).map(|e| e.value)
    }

    /// One PrStatus per thread, the faulting thread first.
    pub fn threads(&self) -> &[PrStatus] {
        &self.threads
    }

    pub fn ptr_size(&self) -> usize {
        if self.core.reader.sixty_four_bit { 8 } else { 4 }
    }

    pub fn vaddr_mask(&self) -> u64 {
        self.machine.vaddr_mask()
    }

    pub fn pointer_mask(&self) -> u64 {
        self.machine.pointer_mask()
    }

    /// The block containing addr, if any. Blocks are sorted so this is a
    /// binary search; reads happen in tight loops.
    pub fn find_block(&self, addr: u64) -> Option<&LoadBlock> {
        let i = self.blocks.partition_point(|b| b.end() <= addr);
        self.blocks.get(i).filter(|b| b.contains(addr))
    }

    /// Reads `len` bytes at `addr` from the first source in `priority` that
    /// fully covers the range. The whole range must sit inside one load
    /// block: a request crossing a block boundary fails even when the next
    /// block is adjacent, because contiguous addresses in different blocks
    /// were different mappings in the target.
    pub fn read(&self, addr: u64, len: usize, priority: &[Source]) -> Result<Vec<u8>> {
        let block = self.find_block(addr).ok_or(Error::NotMapped(addr))?;
        let end = addr
            .checked_add(len as u64)
            .ok_or(Error::NotMapped(addr))?;
        if end > block.end() {
            return Err(Error::PartiallyUnmapped { addr, end });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut partial = false;
        for source in priority {
            match self.serve(block, *source, addr, len) {
                Served::Full(bytes) => return Ok(bytes),
                Served::Partial => partial = true,
                Served::Absent => (),
            }
        }
        if partial {
            Err(Error::PartiallyUnmapped { addr, end })
        } else {
            Err(Error::SourceUnavailable {
                addr,
                which: *priority.first().unwrap_or(&Source::Origin),
            })
        }
    }

    /// [`AddressSpace::read`] with the default overlay/mmap/origin priority.
    pub fn read_default(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        self.read(addr, len, DEFAULT_PRIORITY)
    }

    /// Reads a pointer-sized value and widens it to 64 bits.
    pub fn read_pointer(&self, addr: u64) -> Result<u64> {
        let bytes = self.read_default(addr, self.ptr_size())?;
        let mut value: u64 = 0;
        if self.core.reader.little_endian {
            for b in bytes.iter().rev() {
                value = (value << 8) | *b as u64;
            }
        } else {
            for b in bytes.iter() {
                value = (value << 8) | *b as u64;
            }
        }
        Ok(value)
    }

    /// Reads a 32-bit value in the target's byte order.
    pub fn read_word(&self, addr: u64) -> Result<u32> {
        let bytes = self.read_default(addr, 4)?;
        let arr: [u8; 4] = bytes.as_slice().try_into().unwrap();
        if self.core.reader.little_endian {
            Ok(u32::from_le_bytes(arr))
        } else {
            Ok(u32::from_be_bytes(arr))
        }
    }

    /// Reads a NUL-terminated string, clamped to `max` bytes and to the end
    /// of the containing block.
    pub fn read_string(&self, addr: u64, max: usize) -> Result<String> {
        let block = self.find_block(addr).ok_or(Error::NotMapped(addr))?;
        let avail = (block.end() - addr).min(max as u64) as usize;
        let bytes = self.read(addr, avail, DEFAULT_PRIORITY)?;
        let s = bytes
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect();
        Ok(s)
    }

    fn serve(&self, block: &LoadBlock, source: Source, addr: u64, len: usize) -> Served {
        let delta = addr - block.vaddr;
        match source {
            Source::Overlay => match &block.overlay {
                // The overlay is always block-sized once it exists.
                Some(bytes) => {
                    Served::Full(bytes[delta as usize..delta as usize + len].to_vec())
                }
                None => Served::Absent,
            },
            Source::Mapped => {
                let avail = block.mapped_len();
                if avail == 0 {
                    return Served::Absent;
                }
                if delta + len as u64 <= avail {
                    let map = block.mapped.as_ref().unwrap();
                    let start = (block.mapped_offset + delta) as usize;
                    Served::Full(map.mmap[start..start + len].to_vec())
                } else if delta < avail {
                    Served::Partial
                } else {
                    Served::Absent
                }
            }
            Source::Origin => {
                if block.file_size == 0 {
                    return Served::Absent;
                }
                if delta + len as u64 <= block.file_size {
                    let start = (block.origin_offset + delta) as usize;
                    match self.core.reader.slice(start, len) {
                        Ok(bytes) => Served::Full(bytes.to_vec()),
                        Err(err) => {
                            // p_filesz promised bytes the file doesn't have.
                            utils::warn(&format!("truncated core: {err}"));
                            Served::Partial
                        }
                    }
                } else if delta < block.file_size {
                    Served::Partial
                } else {
                    Served::Absent
                }
            }
        }
    }

    /// Applies a session patch. Bounds rules match [`AddressSpace::read`]:
    /// the bytes must land inside one block. On the first patch to a block
    /// its overlay is seeded from the block's current best content so that
    /// later overlay reads return unpatched bytes unchanged.
    pub fn patch(&mut self, addr: u64, bytes: &[u8]) -> Result<()> {
        let i = self.blocks.partition_point(|b| b.end() <= addr);
        let block = match self.blocks.get(i) {
            Some(b) if b.contains(addr) => b,
            _ => return Err(Error::NotMapped(addr)),
        };
        let end = addr
            .checked_add(bytes.len() as u64)
            .ok_or(Error::NotMapped(addr))?;
        if end > block.end() {
            return Err(Error::PartiallyUnmapped { addr, end });
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let seed = match block.overlay {
            Some(_) => None,
            None => Some(self.seed_overlay(block)),
        };
        let block = &mut self.blocks[i];
        if let Some(seed) = seed {
            block.overlay = Some(seed);
        }
        let delta = (addr - block.vaddr) as usize;
        let overlay = block.overlay.as_mut().unwrap();
        overlay[delta..delta + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Block-sized copy of the best bytes currently available: origin first,
    /// then mapped bytes on top (the same precedence reads use), zeros where
    /// neither has anything.
    fn seed_overlay(&self, block: &LoadBlock) -> Vec<u8> {
        let mut seed = vec![0u8; block.mem_size as usize];
        if block.file_size > 0 {
            let len = block.file_size as usize;
            match self.core.reader.slice(block.origin_offset as usize, len) {
                Ok(bytes) => seed[..len].copy_from_slice(bytes),
                Err(err) => utils::warn(&format!("truncated core: {err}")),
            }
        }
        let avail = block.mapped_len().min(block.mem_size) as usize;
        if avail > 0 {
            let map = block.mapped.as_ref().unwrap();
            let start = block.mapped_offset as usize;
            seed[..avail].copy_from_slice(&map.mmap[start..start + avail]);
        }
        seed
    }
}
