//! Program headers: how the kernel (or the dumper) described the address
//! space of the captured process.
use super::{Reader, Stream};
use std::error::Error;

pub const EXECUTE_FLAG: u32 = 0x1;
pub const WRITE_FLAG: u32 = 0x2;
pub const READ_FLAG: u32 = 0x4;

pub struct ProgramHeader {
    pub stype: SegmentType,

    /// Offset to the first byte of the segment within the ELF file.
    pub offset: u64,

    /// Virtual address of the first byte in the segment.
    pub vaddr: u64,

    /// Number of bytes present in the file. For cores this is frequently
    /// smaller than mem_size: pages the kernel chose not to dump.
    pub file_size: u64,

    /// Number of bytes the segment occupied in memory.
    pub mem_size: u64,

    /// Read/Write/Execute flags.
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentType {
    /// Not to be used, or not recognized.
    Null,

    /// A captured range of the address space.
    Load,

    /// Dynamic linking information.
    Dynamic,

    /// Path of the run-time interpreter.
    Interpreter,

    /// Process metadata: registers, auxv, mapped files.
    Note,

    /// The program header table itself.
    Phdr,

    /// Thread-local storage template.
    Tls,
}

impl SegmentType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => SegmentType::Load,
            2 => SegmentType::Dynamic,
            3 => SegmentType::Interpreter,
            4 => SegmentType::Note,
            6 => SegmentType::Phdr,
            7 => SegmentType::Tls,
            _ => SegmentType::Null, // includes the OS/CPU reserved ranges
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            SegmentType::Null => 0,
            SegmentType::Load => 1,
            SegmentType::Dynamic => 2,
            SegmentType::Interpreter => 3,
            SegmentType::Note => 4,
            SegmentType::Phdr => 6,
            SegmentType::Tls => 7,
        }
    }
}

impl ProgramHeader {
    pub fn new(reader: &Reader, offset: usize) -> Result<Self, Box<dyn Error>> {
        // Field sizes and order differ between 32-bit and 64-bit ELF files,
        // see https://llvm.org/doxygen/BinaryFormat_2ELF_8h_source.html.
        let mut s = Stream::new(reader, offset);
        if reader.sixty_four_bit {
            let p_type = SegmentType::from_u32(s.read_word()?);
            let p_flags = s.read_word()?;
            let p_offset = s.read_xword()?;
            let p_vaddr = s.read_xword()?;
            let _p_paddr = s.read_xword()?;
            let p_filesz = s.read_xword()?;
            let p_memsz = s.read_xword()?;
            let _p_align = s.read_xword()?;
            Ok(ProgramHeader {
                stype: p_type,
                flags: p_flags,
                offset: p_offset,
                vaddr: p_vaddr,
                file_size: p_filesz,
                mem_size: p_memsz,
            })
        } else {
            let p_type = SegmentType::from_u32(s.read_word()?);
            let p_offset = s.read_word()? as u64;
            let p_vaddr = s.read_word()? as u64;
            let _p_paddr = s.read_word()?;
            let p_filesz = s.read_word()? as u64;
            let p_memsz = s.read_word()? as u64;
            let p_flags = s.read_word()?;
            let _p_align = s.read_word()?;
            Ok(ProgramHeader {
                stype: p_type,
                flags: p_flags,
                offset: p_offset,
                vaddr: p_vaddr,
                file_size: p_filesz,
                mem_size: p_memsz,
            })
        }
    }

    /// "rwx" style string, dashes for missing permissions.
    pub fn flags(flags: u32) -> String {
        let mut result = String::new();
        result.push(if flags & READ_FLAG != 0 { 'r' } else { '-' });
        result.push(if flags & WRITE_FLAG != 0 { 'w' } else { '-' });
        result.push(if flags & EXECUTE_FLAG != 0 { 'x' } else { '-' });
        result
    }
}
