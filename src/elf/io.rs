//! Low level reads out of an ELF image. Both the core file itself and the
//! backing files for mapped segments go through a [`Reader`].
use crate::utils;
use memmap2::Mmap;
use std::error::Error;
use std::fs::File;
use std::path::Path;

pub struct Reader {
    pub little_endian: bool,
    pub sixty_four_bit: bool,
    bytes: Mmap,
}

impl Reader {
    /// Note that these functions all return a Result because core files are
    /// sometimes truncated or otherwise damaged and we want to keep limping
    /// along when that happens.
    pub fn new(path: &Path) -> Result<Self, Box<dyn Error>> {
        let file = File::open(path)?;

        // This is unsafe because it has undefined behavior if the underlying
        // file is modified while the memory map is in use.
        let bytes = unsafe { Mmap::map(&file) }?;
        Reader::from_mmap(bytes)
    }

    fn from_mmap(bytes: Mmap) -> Result<Self, Box<dyn Error>> {
        // see https://en.wikipedia.org/wiki/Executable_and_Linkable_Format
        utils::require(bytes.len() > 64, "file is much too small for an ELF image")?;
        let magic = bytes.get(0..4).unwrap();
        utils::require(
            magic[0] == 0x7f && magic[1] == b'E' && magic[2] == b'L' && magic[3] == b'F',
            "not an ELF image (bad magic)",
        )?;

        let ei_class = *bytes.get(0x04).unwrap();
        let ei_data = *bytes.get(0x05).unwrap();
        let ei_version = *bytes.get(0x06).unwrap();
        let e_type = *bytes.get(0x10).unwrap();
        utils::require(ei_version == 1, &format!("bad elf version: {ei_version}"))?;
        utils::require(
            e_type == 0x02 || e_type == 0x03 || e_type == 0x04,
            "bad elf type: not a core, exe, or shared lib",
        )?;

        Ok(Reader {
            bytes,
            sixty_four_bit: ei_class == 2,
            little_endian: ei_data == 1,
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_core(&self) -> bool {
        self.bytes[0x10] == 0x04
    }

    pub fn slice(&self, offset: usize, size: usize) -> Result<&[u8], Box<dyn Error>> {
        if offset.checked_add(size).is_none_or(|end| end > self.bytes.len()) {
            return Err(format!("slice [{offset:#x}, +{size:#x}) is out of bounds").into());
        }
        Ok(&self.bytes[offset..offset + size])
    }

    pub fn read_byte(&self, offset: usize) -> Result<u8, Box<dyn Error>> {
        self.bytes
            .get(offset)
            .ok_or("couldn't read byte at offset".into())
            .copied()
    }

    pub fn read_half(&self, offset: usize) -> Result<u16, Box<dyn Error>> {
        let slice = self.slice(offset, 2)?;
        if self.little_endian {
            Ok(u16::from_le_bytes(slice.try_into()?))
        } else {
            Ok(u16::from_be_bytes(slice.try_into()?))
        }
    }

    pub fn read_word(&self, offset: usize) -> Result<u32, Box<dyn Error>> {
        let slice = self.slice(offset, 4)?;
        if self.little_endian {
            Ok(u32::from_le_bytes(slice.try_into()?))
        } else {
            Ok(u32::from_be_bytes(slice.try_into()?))
        }
    }

    pub fn read_xword(&self, offset: usize) -> Result<u64, Box<dyn Error>> {
        let slice = self.slice(offset, 8)?;
        if self.little_endian {
            Ok(u64::from_le_bytes(slice.try_into()?))
        } else {
            Ok(u64::from_be_bytes(slice.try_into()?))
        }
    }

    /// Read either a u32 or u64 word depending on the ELF class. But, for
    /// sanity, always return the result as 64 bits.
    pub fn read_addr(&self, offset: usize) -> Result<u64, Box<dyn Error>> {
        if self.sixty_four_bit {
            self.read_xword(offset)
        } else {
            Ok(self.read_word(offset)? as u64)
        }
    }
}

pub struct Stream<'a> {
    pub reader: &'a Reader,
    pub offset: usize,
}

impl<'a> Stream<'a> {
    pub fn new(reader: &'a Reader, offset: usize) -> Self {
        Stream { reader, offset }
    }

    pub fn read_byte(&mut self) -> Result<u8, Box<dyn Error>> {
        let byte = self.reader.read_byte(self.offset)?;
        self.offset += 1;
        Ok(byte)
    }

    pub fn read_half(&mut self) -> Result<u16, Box<dyn Error>> {
        let half = self.reader.read_half(self.offset)?;
        self.offset += 2;
        Ok(half)
    }

    pub fn read_word(&mut self) -> Result<u32, Box<dyn Error>> {
        let word = self.reader.read_word(self.offset)?;
        self.offset += 4;
        Ok(word)
    }

    pub fn read_int(&mut self) -> Result<i32, Box<dyn Error>> {
        Ok(self.read_word()? as i32)
    }

    pub fn read_xword(&mut self) -> Result<u64, Box<dyn Error>> {
        let xword = self.reader.read_xword(self.offset)?;
        self.offset += 8;
        Ok(xword)
    }

    /// A u32 or u64 depending on the ELF class, widened to 64 bits.
    pub fn read_addr(&mut self) -> Result<u64, Box<dyn Error>> {
        let addr = self.reader.read_addr(self.offset)?;
        self.offset += if self.reader.sixty_four_bit { 8 } else { 4 };
        Ok(addr)
    }

    /// Corresponds to the kernel's user_long_t.
    pub fn read_ulong(&mut self) -> Result<u64, Box<dyn Error>> {
        self.read_addr()
    }

    /// Read a null-terminated ASCII string.
    pub fn read_string(&mut self) -> Result<String, Box<dyn Error>> {
        let mut s = String::new();
        loop {
            // Kernel documents these as ASCII though I'm not sure I believe that.
            let byte = self.read_byte()?;
            if byte == 0 {
                break;
            }
            s.push(byte as char);
        }
        Ok(s)
    }
}
