//! `rd`, `patch`, and `disas`: reading, patching, and rendering memory.
use super::Session;
use crate::disasm;
use crate::repl::{DisasArgs, PatchArgs, ReadArgs};
use crate::space::{DEFAULT_PRIORITY, Source};
use crate::utils::{self, Styling, print_styled};
use std::error::Error;

fn source_priority(origin: bool, mmap: bool, overlay: bool) -> &'static [Source] {
    if origin {
        &[Source::Origin]
    } else if mmap {
        &[Source::Mapped]
    } else if overlay {
        &[Source::Overlay]
    } else {
        DEFAULT_PRIORITY
    }
}

pub fn read(session: &Session, args: &ReadArgs) {
    let space = &session.space;
    let addr = args.addr & space.vaddr_mask();
    let Some(block) = space.find_block(addr) else {
        utils::warn(&format!("{addr:#x} is not mapped"));
        return;
    };

    let len = match args.end {
        Some(end) => {
            // An end address is a convenience so it clamps; an explicit
            // count means the caller wants exactly that many bytes.
            let end = (end & space.vaddr_mask()).min(block.end());
            if end <= addr {
                utils::warn("end address is before the start address");
                return;
            }
            (end - addr) as usize
        }
        None => args.num * 8,
    };

    match space.read(addr, len, source_priority(args.origin, args.mmap, args.overlay)) {
        Ok(bytes) => render(session, addr, &bytes, args),
        Err(err) => utils::warn(&err.to_string()),
    }
}

fn render(session: &Session, addr: u64, bytes: &[u8], args: &ReadArgs) {
    if let Some(path) = &args.file {
        match std::fs::write(path, bytes) {
            Ok(()) => println!("wrote {} bytes to {}", bytes.len(), path.display()),
            Err(err) => utils::warn(&format!("couldn't write {}: {err}", path.display())),
        }
    } else if args.string {
        let s: String = bytes
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| if b.is_ascii_graphic() || *b == b' ' { *b as char } else { '.' })
            .collect();
        println!("{}", s.ascii());
    } else if args.inst {
        print_instructions(session, addr, bytes, None);
    } else {
        hex_rows(addr, bytes);
    }
}

/// Classic two-words-per-row dump:
/// 7ffc73ae7000: 00007f3a1c021000 6c2f7273752f2e2e  ........../usr/l
fn hex_rows(addr: u64, bytes: &[u8]) {
    for (i, row) in bytes.chunks(16).enumerate() {
        print_styled!("{:x}: ", addr, addr + i as u64 * 16);
        let mut ascii = String::new();
        for chunk in row.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            let value = u64::from_le_bytes(word);
            print_styled!("{:016x} ", hex, value);
            ascii.push_str(&utils::ascii_chunk(value)[..chunk.len()]);
        }
        if row.len() <= 8 {
            // Keep the ascii column aligned for short rows.
            print!("{}", " ".repeat(17));
        }
        print_styled!(" {}", ascii, ascii);
        println!();
    }
}

pub fn patch(session: &mut Session, args: &PatchArgs) {
    let addr = args.addr & session.space.vaddr_mask();
    let bytes = match byte_str_to_vec(&args.bytes.join(" ")) {
        Ok(bytes) => bytes,
        Err(err) => {
            utils::warn(&err.to_string());
            return;
        }
    };
    if bytes.is_empty() {
        utils::warn("nothing to patch");
        return;
    }
    match session.space.patch(addr, &bytes) {
        Ok(()) => println!("patched {} bytes at {addr:#x}", bytes.len()),
        Err(err) => utils::warn(&err.to_string()),
    }
}

pub fn disas(session: &Session, args: &DisasArgs) {
    let space = &session.space;

    // A location is an address when it parses as one, otherwise a symbol.
    let (addr, size) = if let Ok(addr) = utils::parse_addr(&args.location) {
        (addr & space.vaddr_mask(), None)
    } else {
        let Some(index) = session.index() else {
            return;
        };
        let Some((_, symbol)) = index.lookup_by_name(space, &args.location) else {
            utils::warn(&format!("couldn't find symbol `{}`", args.location));
            return;
        };
        let addr = space.machine.strip_mode_bit(symbol.addr) & space.vaddr_mask();
        (addr, (symbol.size > 0).then_some(symbol.size))
    };

    let Some(block) = space.find_block(addr) else {
        utils::warn(&format!("{addr:#x} is not mapped"));
        return;
    };

    // x86 instructions are at most 15 bytes.
    let wanted = size.unwrap_or(args.num as u64 * 15).min(block.end() - addr);
    let priority = source_priority(args.origin, args.mmap, args.overlay);
    match space.read(addr, wanted as usize, priority) {
        Ok(bytes) => {
            let limit = if size.is_some() { None } else { Some(args.num) };
            print_instructions(session, addr, &bytes, limit);
        }
        Err(err) => utils::warn(&err.to_string()),
    }
}

fn print_instructions(session: &Session, addr: u64, bytes: &[u8], limit: Option<usize>) {
    let space = &session.space;
    if let Some(index) = session.index()
        && let Some(hit) = index.lookup_by_address(space, addr)
    {
        let name = crate::linkmap::demangle(&hit.symbol.name);
        if hit.offset == 0 {
            print_styled!("<{}>:", symbol, name);
        } else {
            print_styled!("<{}+{:#x}>:", symbol, name, hit.offset);
        }
        println!();
    }

    match disasm::disassemble(space.machine, bytes, addr, limit) {
        Ok(instructions) => {
            for inst in instructions.iter() {
                let hex: Vec<String> = inst.bytes.iter().map(|b| format!("{b:02x}")).collect();
                print_styled!("{:x}:  ", addr, inst.addr);
                print_styled!("{:24}", hex, hex.join(" "));
                println!("{}", inst.text);
            }
        }
        Err(err) => utils::warn(&err.to_string()),
    }
}

/// "de ad be ef" or "deadbeef" to bytes.
fn byte_str_to_vec(str: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut result = Vec::new();

    let chars: Vec<char> = str.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ' ' {
            i += 1;
        } else if i + 1 < chars.len()
            && chars[i].is_ascii_hexdigit()
            && chars[i + 1].is_ascii_hexdigit()
        {
            let s = format!("{}{}", chars[i], chars[i + 1]);
            result.push(u8::from_str_radix(&s, 16)?);
            i += 2;
        } else {
            return Err("expected a string of hex bytes with optional spaces between bytes".into());
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_strings() {
        assert_eq!(byte_str_to_vec("de ad be ef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(byte_str_to_vec("deadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(byte_str_to_vec("").unwrap(), Vec::<u8>::new());
        assert!(byte_str_to_vec("xyz").is_err());
        assert!(byte_str_to_vec("a").is_err());
    }
}
