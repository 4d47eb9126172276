//! ELF core-image format support. A core file starts with an ELF header,
//! then a program header table:
//! * PT_LOAD headers describe the captured address ranges. p_filesz is often
//!   smaller than p_memsz: the kernel (or whoever dumped the core) skipped
//!   pages it considered recoverable from the backing file.
//! * A PT_NOTE header covers the metadata: per-thread register state
//!   (NT_PRSTATUS), the auxiliary vector (NT_AUXV), and the mapped-file
//!   table (NT_FILE) that ties address ranges back to files on disk.
//!
//! Backing files for mapped segments are ordinary ET_DYN/ET_EXEC images and
//! are read through the same [`Reader`]; sections only come into play for
//! those (symbol tables), cores have none worth reading.
//! Quick ELF reference: https://gist.github.com/x0nu11byt3/bcb35c3de461e5fb66173071a2379779
pub mod core_file;
pub mod header;
pub mod io;
pub mod notes;
pub mod sections;
pub mod segments;

pub use core_file::*;
pub use header::*;
pub use io::*;
pub use notes::*;
pub use sections::*;
pub use segments::*;
