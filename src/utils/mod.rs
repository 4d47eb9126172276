pub mod styles;

pub use styles::*;

use std::error::Error;

pub fn require(predicate: bool, err: &str) -> Result<(), Box<dyn Error>> {
    if predicate { Ok(()) } else { Err(err.into()) }
}

pub fn warn(mesg: &str) {
    eprintln!("{}", mesg.warn());
}

/// Notes require their name and desc fields to be padded out to four bytes.
pub fn align_to_word(n: u32) -> u32 {
    (n + 3) & !3
}

pub fn align_up(n: u64, alignment: u64) -> u64 {
    (n + alignment - 1) & !(alignment - 1)
}

/// Parse an address the way operators type them: hex, with or without the
/// "0x" prefix.
pub fn parse_addr(s: &str) -> Result<u64, String> {
    let t = s.trim_start_matches("0x");
    u64::from_str_radix(t, 16).map_err(|_| format!("`{s}` isn't a hex address"))
}

/// Eight memory bytes rendered the way `rd` shows them: graphic ASCII or a dot.
pub fn ascii_chunk(value: u64) -> String {
    let mut s = String::with_capacity(8);
    for byte in value.to_le_bytes() {
        let ch = byte as char;
        if ch.is_ascii_graphic() {
            s.push(ch);
        } else {
            s.push('.');
        }
    }
    s
}

macro_rules! uwriteln {
    ($out:expr) => {
        writeln!($out).unwrap()
    };
    ($out:expr, $($arg:tt)*) => {
        writeln!($out, $($arg)*).unwrap()
    };
}
pub(crate) use uwriteln;

/// Remove escape sequences from the string (e.g. for colors).
#[cfg(test)]
pub fn strip_escapes(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut escaping = false;

    // Note that escape sequences can be fairly gnarly, e.g. for RGB colors.
    // See https://gist.github.com/fnky/458719343aabd01cfb17a3a4f7296797
    for c in s.chars() {
        if c == '\x1b' {
            escaping = true;
        } else if escaping {
            if c == 'm' {
                escaping = false;
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align_to_word(0), 0);
        assert_eq!(align_to_word(1), 4);
        assert_eq!(align_to_word(4), 4);
        assert_eq!(align_to_word(5), 8);
        assert_eq!(align_up(0x1001, 0x1000), 0x2000);
        assert_eq!(align_up(0x1000, 0x1000), 0x1000);
    }

    #[test]
    fn addresses() {
        assert_eq!(parse_addr("0x7ffc73ae7000").unwrap(), 0x7ffc73ae7000);
        assert_eq!(parse_addr("1000").unwrap(), 0x1000);
        assert!(parse_addr("what").is_err());
    }

    #[test]
    fn ascii() {
        insta::assert_snapshot!(ascii_chunk(0x0230020202020202), @"......0.");
        insta::assert_snapshot!(ascii_chunk(u64::from_le_bytes(*b"linker64")), @"linker64");
    }
}
