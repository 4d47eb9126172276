//! Disassembly of bytes pulled out of the address space. Only the x86
//! family decodes for now; ARM addresses still resolve and read fine, they
//! just can't be rendered as instructions.
use crate::elf::Machine;
use crate::space::{Error, Result};
use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction as IcedInstruction, IntelFormatter};

pub struct Instruction {
    pub addr: u64,
    pub bytes: Vec<u8>,
    pub text: String,
}

/// Decodes up to `limit` instructions (all of `bytes` when None) starting at
/// `addr`. Undecodable bytes come back as `(bad)` and decoding continues,
/// the way objdump does it.
pub fn disassemble(
    machine: Machine,
    bytes: &[u8],
    addr: u64,
    limit: Option<usize>,
) -> Result<Vec<Instruction>> {
    let bitness = match machine {
        Machine::X86_64 => 64,
        Machine::X86 => 32,
        other => {
            return Err(Error::MalformedInput(format!(
                "no disassembler for {other}"
            )));
        }
    };

    let mut decoder = Decoder::with_ip(bitness, bytes, addr, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    formatter.options_mut().set_hex_prefix("0x");
    formatter.options_mut().set_hex_suffix("");
    formatter.options_mut().set_space_after_operand_separator(true);

    let mut result = Vec::new();
    let mut instruction = IcedInstruction::default();
    while decoder.can_decode() {
        if limit.is_some_and(|n| result.len() >= n) {
            break;
        }
        decoder.decode_out(&mut instruction);
        let start = (instruction.ip() - addr) as usize;
        let mut text = String::new();
        if instruction.is_invalid() {
            text.push_str("(bad)");
        } else {
            formatter.format(&instruction, &mut text);
        }
        result.push(Instruction {
            addr: instruction.ip(),
            bytes: bytes[start..start + instruction.len()].to_vec(),
            text,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_x64() {
        // push rbp; mov rbp, rsp; xor eax, eax; ret
        let bytes = [0x55, 0x48, 0x89, 0xe5, 0x31, 0xc0, 0xc3];
        let instructions = disassemble(Machine::X86_64, &bytes, 0x401000, None).unwrap();

        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[0].addr, 0x401000);
        insta::assert_snapshot!(instructions[0].text, @"push rbp");
        insta::assert_snapshot!(instructions[1].text, @"mov rbp, rsp");
        insta::assert_snapshot!(instructions[2].text, @"xor eax, eax");
        insta::assert_snapshot!(instructions[3].text, @"ret");
        assert_eq!(instructions[1].addr, 0x401001);
        assert_eq!(instructions[1].bytes, vec![0x48, 0x89, 0xe5]);
    }

    #[test]
    fn limit_caps_the_count() {
        let bytes = [0x90u8; 16]; // nops
        let instructions = disassemble(Machine::X86_64, &bytes, 0x1000, Some(5)).unwrap();
        assert_eq!(instructions.len(), 5);
    }

    #[test]
    fn arm_is_not_supported() {
        match disassemble(Machine::Arm, &[0u8; 4], 0x1000, None) {
            Err(Error::MalformedInput(msg)) => assert!(msg.contains("arm")),
            _ => panic!("expected an error"),
        }
    }
}
