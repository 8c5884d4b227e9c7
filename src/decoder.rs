use crate::opcodes::{Opcode, get_opcode};

#[derive(Debug, Clone)]
pub struct Instruction {
    /// Raw byte, kept for bytes that name no instruction.
    pub code: u8,
    pub opcode: Option<Opcode>,
    pub offset: usize,
    pub argument: Option<Vec<u8>>,
}

impl Instruction {
    pub fn name(&self) -> String {
        self.opcode
            .map(|op| op.name())
            .unwrap_or_else(|| format!("0x{:02x}", self.code))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub bytecode: Vec<u8>,
    pub instructions: Vec<Instruction>,
    /// `(offset, index)` of every JUMPDEST outside push data, sorted by offset.
    pub jumptable: Vec<(usize, usize)>,
}

impl Bytecode {
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    pub fn resolve_jump(&self, offset: usize) -> Option<usize> {
        let index = self
            .jumptable
            .binary_search_by_key(&offset, |(key, _)| *key)
            .ok()?;
        Some(self.jumptable[index].1)
    }

    /// Index of the instruction starting at byte `offset`. Offsets at or past
    /// the end map to `instructions.len()`; offsets inside push data map to
    /// nothing.
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        if offset >= self.bytecode.len() {
            return Some(self.instructions.len());
        }
        self.instructions
            .binary_search_by_key(&offset, |instruction| instruction.offset)
            .ok()
    }
}

pub struct Decoder;

impl Decoder {
    /// Splits code into instructions. Push data running past the end of the
    /// code reads as zeros.
    pub fn decode(code: &[u8]) -> Bytecode {
        let mut instructions = Vec::new();
        let mut jumptable = Vec::new();

        let mut pos = 0;
        while pos < code.len() {
            let byte = code[pos];
            let opcode = get_opcode(byte);
            let mut instruction = Instruction {
                code: byte,
                opcode,
                offset: pos,
                argument: None,
            };

            if opcode.is_some_and(|op| op.is_jumpdest()) {
                jumptable.push((pos, instructions.len()));
            }

            pos += 1;

            let push_bytes = opcode.map(|op| op.push_len()).unwrap_or_default();
            if push_bytes > 0 {
                let start = pos.min(code.len());
                let end = (pos + push_bytes).min(code.len());
                let mut argument = code[start..end].to_vec();
                argument.resize(push_bytes, 0);
                instruction.argument = Some(argument);
                pos += push_bytes;
            }

            instructions.push(instruction);
        }

        Bytecode {
            bytecode: code.to_vec(),
            instructions,
            jumptable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_data_is_not_a_jumpdest() {
        // PUSH2 0x5b5b JUMPDEST STOP
        let code = Decoder::decode(&[0x61, 0x5b, 0x5b, 0x5b, 0x00]);
        assert_eq!(code.instructions.len(), 3);
        assert_eq!(code.jumptable, vec![(3, 1)]);
        assert_eq!(code.resolve_jump(3), Some(1));
        assert_eq!(code.resolve_jump(1), None);
        assert_eq!(code.resolve_jump(2), None);
    }

    #[test]
    fn test_truncated_push_is_zero_padded() {
        let code = Decoder::decode(&[0x00, 0x63, 0xaa]);
        assert_eq!(code.instructions.len(), 2);
        assert_eq!(
            code.instructions[1].argument,
            Some(vec![0xaa, 0x00, 0x00, 0x00])
        );
    }

    #[test]
    fn test_unknown_bytes_decode() {
        let code = Decoder::decode(&[0x0c, 0xef]);
        assert_eq!(code.instructions.len(), 2);
        assert!(code.instructions[0].opcode.is_none());
        assert_eq!(code.instructions[1].name(), "0xef");
    }

    #[test]
    fn test_offset_to_index() {
        // PUSH1 0x01 PUSH1 0x02 ADD
        let code = Decoder::decode(&[0x60, 0x01, 0x60, 0x02, 0x01]);
        assert_eq!(code.index_of(0), Some(0));
        assert_eq!(code.index_of(2), Some(1));
        assert_eq!(code.index_of(4), Some(2));
        assert_eq!(code.index_of(1), None);
        assert_eq!(code.index_of(5), Some(3));
        assert_eq!(code.index_of(100), Some(3));
    }
}
