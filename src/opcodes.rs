use once_cell::sync::Lazy;

use crate::gas::Fork;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Opcode {
    pub code: u8,
    pub name: &'static str,
    pub n: u8,
    /// Words popped.
    pub inputs: u8,
    /// Words pushed.
    pub outputs: u8,
    /// First fork the instruction is available in.
    pub since: Fork,
}

impl Opcode {
    const fn new(code: u8, name: &'static str, inputs: u8, outputs: u8) -> Self {
        Self {
            code,
            name,
            n: 0,
            inputs,
            outputs,
            since: Fork::Byzantium,
        }
    }

    const fn since(self, fork: Fork) -> Self {
        Self { since: fork, ..self }
    }

    const fn nth(self, n: u8) -> Self {
        Self { n, ..self }
    }

    pub fn name(&self) -> String {
        self.name.replace('_', &self.n.to_string())
    }

    pub fn push_len(&self) -> usize {
        if self.name != "PUSH_" {
            0
        } else {
            self.n as usize
        }
    }

    pub fn is_jumpdest(&self) -> bool {
        self.code == 0x5b
    }
}

static OPCODES: Lazy<[Option<Opcode>; 256]> = Lazy::new(|| {
    use Fork::*;

    let mut table = [None; 256];
    let mut set = |op: Opcode| table[op.code as usize] = Some(op);

    // 0s: Stop and Arithmetic Operations
    set(Opcode::new(0x00, "STOP", 0, 0));
    set(Opcode::new(0x01, "ADD", 2, 1));
    set(Opcode::new(0x02, "MUL", 2, 1));
    set(Opcode::new(0x03, "SUB", 2, 1));
    set(Opcode::new(0x04, "DIV", 2, 1));
    set(Opcode::new(0x05, "SDIV", 2, 1));
    set(Opcode::new(0x06, "MOD", 2, 1));
    set(Opcode::new(0x07, "SMOD", 2, 1));
    set(Opcode::new(0x08, "ADDMOD", 3, 1));
    set(Opcode::new(0x09, "MULMOD", 3, 1));
    set(Opcode::new(0x0a, "EXP", 2, 1));
    set(Opcode::new(0x0b, "SIGNEXTEND", 2, 1));

    // 10s: Comparison & Bitwise Logic Operations
    set(Opcode::new(0x10, "LT", 2, 1));
    set(Opcode::new(0x11, "GT", 2, 1));
    set(Opcode::new(0x12, "SLT", 2, 1));
    set(Opcode::new(0x13, "SGT", 2, 1));
    set(Opcode::new(0x14, "EQ", 2, 1));
    set(Opcode::new(0x15, "ISZERO", 1, 1));
    set(Opcode::new(0x16, "AND", 2, 1));
    set(Opcode::new(0x17, "OR", 2, 1));
    set(Opcode::new(0x18, "XOR", 2, 1));
    set(Opcode::new(0x19, "NOT", 1, 1));
    set(Opcode::new(0x1a, "BYTE", 2, 1));
    set(Opcode::new(0x1b, "SHL", 2, 1).since(Constantinople));
    set(Opcode::new(0x1c, "SHR", 2, 1).since(Constantinople));
    set(Opcode::new(0x1d, "SAR", 2, 1).since(Constantinople));

    // 20s: SHA3
    set(Opcode::new(0x20, "SHA3", 2, 1));

    // 30s: Environmental Information
    set(Opcode::new(0x30, "ADDRESS", 0, 1));
    set(Opcode::new(0x31, "BALANCE", 1, 1));
    set(Opcode::new(0x32, "ORIGIN", 0, 1));
    set(Opcode::new(0x33, "CALLER", 0, 1));
    set(Opcode::new(0x34, "CALLVALUE", 0, 1));
    set(Opcode::new(0x35, "CALLDATALOAD", 1, 1));
    set(Opcode::new(0x36, "CALLDATASIZE", 0, 1));
    set(Opcode::new(0x37, "CALLDATACOPY", 3, 0));
    set(Opcode::new(0x38, "CODESIZE", 0, 1));
    set(Opcode::new(0x39, "CODECOPY", 3, 0));
    set(Opcode::new(0x3a, "GASPRICE", 0, 1));
    set(Opcode::new(0x3b, "EXTCODESIZE", 1, 1));
    set(Opcode::new(0x3c, "EXTCODECOPY", 4, 0));
    set(Opcode::new(0x3d, "RETURNDATASIZE", 0, 1));
    set(Opcode::new(0x3e, "RETURNDATACOPY", 3, 0));
    set(Opcode::new(0x3f, "EXTCODEHASH", 1, 1).since(Constantinople));

    // 40s: Block Information
    set(Opcode::new(0x40, "BLOCKHASH", 1, 1));
    set(Opcode::new(0x41, "COINBASE", 0, 1));
    set(Opcode::new(0x42, "TIMESTAMP", 0, 1));
    set(Opcode::new(0x43, "NUMBER", 0, 1));
    set(Opcode::new(0x44, "DIFFICULTY", 0, 1));
    set(Opcode::new(0x45, "GASLIMIT", 0, 1));
    set(Opcode::new(0x46, "CHAINID", 0, 1).since(Istanbul));
    set(Opcode::new(0x47, "SELFBALANCE", 0, 1).since(Istanbul));
    set(Opcode::new(0x48, "BASEFEE", 0, 1).since(London));
    set(Opcode::new(0x49, "BLOBHASH", 1, 1).since(Cancun));
    set(Opcode::new(0x4a, "BLOBBASEFEE", 0, 1).since(Cancun));

    // 50s: Stack, Memory, Storage and Flow Operations
    set(Opcode::new(0x50, "POP", 1, 0));
    set(Opcode::new(0x51, "MLOAD", 1, 1));
    set(Opcode::new(0x52, "MSTORE", 2, 0));
    set(Opcode::new(0x53, "MSTORE8", 2, 0));
    set(Opcode::new(0x54, "SLOAD", 1, 1));
    set(Opcode::new(0x55, "SSTORE", 2, 0));
    set(Opcode::new(0x56, "JUMP", 1, 0));
    set(Opcode::new(0x57, "JUMPI", 2, 0));
    set(Opcode::new(0x58, "PC", 0, 1));
    set(Opcode::new(0x59, "MSIZE", 0, 1));
    set(Opcode::new(0x5a, "GAS", 0, 1));
    set(Opcode::new(0x5b, "JUMPDEST", 0, 0));
    set(Opcode::new(0x5c, "TLOAD", 1, 1).since(Cancun));
    set(Opcode::new(0x5d, "TSTORE", 2, 0).since(Cancun));
    set(Opcode::new(0x5e, "MCOPY", 3, 0).since(Cancun));
    set(Opcode::new(0x5f, "PUSH0", 0, 1).since(Shanghai));

    // PUSH{1..32}
    for i in 0..32u8 {
        set(Opcode::new(0x60 + i, "PUSH_", 0, 1).nth(i + 1));
    }

    // DUP{1..16}
    for i in 0..16u8 {
        set(Opcode::new(0x80 + i, "DUP_", i + 1, i + 2).nth(i + 1));
    }

    // SWAP{1..16}
    for i in 0..16u8 {
        set(Opcode::new(0x90 + i, "SWAP_", i + 2, i + 2).nth(i + 1));
    }

    // LOG{0..4}
    for i in 0..5u8 {
        set(Opcode::new(0xa0 + i, "LOG_", i + 2, 0).nth(i));
    }

    // f0s: System operations
    set(Opcode::new(0xf0, "CREATE", 3, 1));
    set(Opcode::new(0xf1, "CALL", 7, 1));
    set(Opcode::new(0xf2, "CALLCODE", 7, 1));
    set(Opcode::new(0xf3, "RETURN", 2, 0));
    set(Opcode::new(0xf4, "DELEGATECALL", 6, 1));
    set(Opcode::new(0xf5, "CREATE2", 4, 1).since(Constantinople));
    set(Opcode::new(0xfa, "STATICCALL", 6, 1));
    set(Opcode::new(0xfd, "REVERT", 2, 0));
    set(Opcode::new(0xfe, "INVALID", 0, 0));
    set(Opcode::new(0xff, "SELFDESTRUCT", 1, 0));

    table
});

/// Any byte that names an instruction in some fork.
pub fn get_opcode(value: u8) -> Option<Opcode> {
    OPCODES[value as usize]
}

/// The instruction `value` names under `fork`, if it is enabled there.
pub fn get_opcode_at(value: u8, fork: Fork) -> Option<Opcode> {
    get_opcode(value).filter(|op| op.since <= fork)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_consistent() {
        for i in 0..=0xffu8 {
            if let Some(op) = get_opcode(i) {
                assert_eq!(op.code, i);
                assert!(!op.name.is_empty());
            }
        }
        assert!(get_opcode(0x0c).is_none());
        assert!(get_opcode(0xef).is_none());
    }

    #[test]
    fn test_names_and_push_widths() {
        let push32 = get_opcode(0x7f).expect("PUSH32");
        assert_eq!(push32.name(), "PUSH32");
        assert_eq!(push32.push_len(), 32);
        assert_eq!(get_opcode(0x5f).expect("PUSH0").push_len(), 0);
        assert_eq!(get_opcode(0x8f).expect("DUP16").name(), "DUP16");
        assert_eq!(get_opcode(0xa4).expect("LOG4").inputs, 6);
    }

    #[test]
    fn test_stack_shapes() {
        let dup1 = get_opcode(0x80).expect("DUP1");
        assert_eq!((dup1.inputs, dup1.outputs), (1, 2));
        let swap1 = get_opcode(0x90).expect("SWAP1");
        assert_eq!((swap1.inputs, swap1.outputs), (2, 2));
        let call = get_opcode(0xf1).expect("CALL");
        assert_eq!((call.inputs, call.outputs), (7, 1));
    }

    #[test]
    fn test_fork_gating() {
        assert!(get_opcode_at(0x1b, Fork::Byzantium).is_none());
        assert!(get_opcode_at(0x1b, Fork::Constantinople).is_some());
        assert!(get_opcode_at(0x5f, Fork::London).is_none());
        assert!(get_opcode_at(0x5f, Fork::Shanghai).is_some());
        assert!(get_opcode_at(0x5c, Fork::Shanghai).is_none());
        assert!(get_opcode_at(0x46, Fork::Petersburg).is_none());
        assert!(get_opcode_at(0x01, Fork::Byzantium).is_some());
    }
}
