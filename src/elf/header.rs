//! The fixed-size header at the start of every ELF image.
use super::{Reader, Stream};
use std::error::Error;
use std::fmt;

pub struct ElfHeader {
    pub etype: u16,
    pub machine: Machine,
    pub flags: u32,

    /// Offset in the file to the Program Header table.
    pub ph_offset: u64,
    pub ph_entry_size: u16,
    pub num_ph_entries: u16,

    /// Offset in the file to the Section Header table. Zero for most cores.
    pub section_offset: u64,
    pub section_entry_size: u16,
    pub num_section_entries: u16,

    /// Index of the section holding the section name string table.
    pub string_table_index: u16,
}

/// The CPU family the image was captured on. This matters to us because
/// address masking is architecture specific: how many bits of a pointer are
/// actual address, and whether function pointers carry an ISA mode bit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Machine {
    X86,
    X86_64,
    Arm,
    Arm64,
    Riscv64,
    Unknown(u16),
}

impl Machine {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x03 => Machine::X86,
            0x28 => Machine::Arm,
            0x3e => Machine::X86_64,
            0xb7 => Machine::Arm64,
            0xf3 => Machine::Riscv64,
            _ => Machine::Unknown(value),
        }
    }

    /// Mask covering the bits of a pointer that are actual virtual address.
    /// Anything above these is tag or sign extension and must be stripped
    /// before the pointer is used as a memory key.
    pub fn vaddr_mask(&self) -> u64 {
        match self {
            Machine::X86 | Machine::Arm => 0xffff_ffff,
            Machine::Arm64 => (1 << 39) - 1,
            _ => (1 << 48) - 1,
        }
    }

    /// All the pointer bits, including a Thumb mode bit if the architecture
    /// has one. `vaddr & !(pointer_mask & 1)` is wrong; see [`Machine::strip_mode_bit`].
    pub fn pointer_mask(&self) -> u64 {
        match self {
            Machine::X86 | Machine::Arm => 0xffff_ffff,
            _ => u64::MAX,
        }
    }

    /// On 32-bit ARM the low bit of a function pointer selects the Thumb
    /// encoding; it is not part of the address. This is a policy for symbol
    /// consumers: the resolver itself always takes raw addresses.
    pub fn strip_mode_bit(&self, addr: u64) -> u64 {
        match self {
            Machine::Arm => addr & (self.pointer_mask() - 1),
            _ => addr,
        }
    }

    pub fn has_mode_bit(&self) -> bool {
        *self == Machine::Arm
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Machine::X86 => fmt.write_str("x86"),
            Machine::X86_64 => fmt.write_str("x86-64"),
            Machine::Arm => fmt.write_str("arm"),
            Machine::Arm64 => fmt.write_str("arm64"),
            Machine::Riscv64 => fmt.write_str("riscv64"),
            Machine::Unknown(v) => write!(fmt, "unknown ({v:#x})"),
        }
    }
}

impl ElfHeader {
    pub fn new(reader: &Reader) -> Result<Self, Box<dyn Error>> {
        // The identification bytes were validated when the Reader was built.
        let mut s = Stream::new(reader, 0x10);
        let etype = s.read_half()?;
        let machine = Machine::from_u16(s.read_half()?);
        let _version = s.read_word()?;
        let _entry = s.read_addr()?; // meaningless for cores
        let ph_offset = s.read_addr()?;
        let section_offset = s.read_addr()?;
        let flags = s.read_word()?;
        let _eh_size = s.read_half()?;
        let ph_entry_size = s.read_half()?;
        let num_ph_entries = s.read_half()?;
        let section_entry_size = s.read_half()?;
        let num_section_entries = s.read_half()?;
        let string_table_index = s.read_half()?;

        Ok(ElfHeader {
            etype,
            machine,
            flags,
            ph_offset,
            ph_entry_size,
            num_ph_entries,
            section_offset,
            section_entry_size,
            num_section_entries,
            string_table_index,
        })
    }

    pub fn stype(&self) -> &'static str {
        match self.etype {
            0x02 => "exe",
            0x03 => "shared object",
            0x04 => "core",
            _ => "unknown",
        }
    }
}
