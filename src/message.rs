//! Call model: the descriptor of one invocation, the enclosing transaction
//! context and the result an invocation produces.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    common::{Hex, Word, address::Address},
    interpreter::Exception,
};

/// One invocation of code. A nested call or create gets its own `Message`
/// built by the parent frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub caller: Address,
    /// Account whose storage and balance the code operates on.
    /// `None` means contract creation.
    pub to: Option<Address>,
    /// Account the code was loaded from, when it differs from `to`
    /// (CALLCODE, DELEGATECALL).
    pub code_address: Option<Address>,
    pub value: Word,
    pub data: Vec<u8>,
    pub code: Vec<u8>,
    pub gas_limit: u64,
    pub depth: usize,
    pub is_static: bool,
    /// CREATE2 salt; plain CREATE derives the address from the caller nonce.
    pub salt: Option<Word>,
    pub selfdestruct: BTreeSet<Address>,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            caller: Address::zero(),
            to: Some(Address::zero()),
            code_address: None,
            value: Word::zero(),
            data: Vec::new(),
            code: Vec::new(),
            gas_limit: 0,
            depth: 0,
            is_static: false,
            salt: None,
            selfdestruct: BTreeSet::new(),
        }
    }
}

impl Message {
    pub fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// Account executing the code; zero for a creation whose address has
    /// not been derived yet.
    pub fn address(&self) -> Address {
        self.to.unwrap_or_default()
    }

    /// Account the code belongs to, which is where precompiles are looked up.
    pub fn code_address(&self) -> Address {
        self.code_address.unwrap_or_else(|| self.address())
    }
}

/// Values fixed for the whole transaction and shared by every frame.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TxContext {
    #[serde(rename = "gasPrice")]
    pub gas_price: Word,
    pub origin: Address,
}

impl TxContext {
    pub fn new(gas_price: Word, origin: Address) -> Self {
        Self { gas_price, origin }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Word>,
    pub data: Hex,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Halt {
    Stop,
    Return,
    SelfDestruct,
}

/// How a frame ended.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Halted(Halt),
    Reverted,
    Faulted(Exception),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Halted(_))
    }

    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Outcome::Faulted(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(rename = "gasUsed")]
    pub gas_used: u64,
    /// Refund counter accrued by the frame and its successful children.
    #[serde(rename = "gasRefund")]
    pub gas_refund: i64,
    #[serde(rename = "returnValue")]
    pub return_value: Hex,
    pub outcome: Outcome,
    pub logs: Vec<Log>,
    pub selfdestruct: BTreeSet<Address>,
    #[serde(rename = "createdAddress", skip_serializing_if = "Option::is_none")]
    pub created_address: Option<Address>,
}

impl ExecutionResult {
    /// Result of a frame that faulted: every unit of gas is gone and
    /// nothing the frame did survives.
    pub fn faulted(message: &Message, exception: Exception) -> Self {
        Self {
            gas_used: message.gas_limit,
            gas_refund: 0,
            return_value: Hex::default(),
            outcome: Outcome::Faulted(exception),
            logs: Vec::new(),
            selfdestruct: message.selfdestruct.clone(),
            created_address: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn exception(&self) -> Option<&Exception> {
        self.outcome.exception()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults() {
        let message = Message::default();
        assert!(!message.is_create());
        assert_eq!(message.address(), Address::zero());
        assert_eq!(message.depth, 0);
        assert!(!message.is_static);
        assert!(message.code.is_empty());
        assert!(message.selfdestruct.is_empty());
    }

    #[test]
    fn test_code_address_falls_back_to_recipient() {
        let message = Message {
            to: Some(Address::low(0xaa)),
            ..Default::default()
        };
        assert_eq!(message.code_address(), Address::low(0xaa));

        let message = Message {
            code_address: Some(Address::low(0x07)),
            ..message
        };
        assert_eq!(message.code_address(), Address::low(0x07));
        assert_eq!(message.address(), Address::low(0xaa));
    }

    #[test]
    fn test_faulted_result_consumes_all_gas() {
        let message = Message {
            gas_limit: 1000,
            ..Default::default()
        };
        let result = ExecutionResult::faulted(&message, Exception::OutOfGas);
        assert_eq!(result.gas_used, 1000);
        assert!(!result.is_success());
        assert_eq!(result.exception(), Some(&Exception::OutOfGas));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::Halted(Halt::Stop)).expect("json");
        assert_eq!(json, r#"{"status":"halted","reason":"stop"}"#);
        let json = serde_json::to_string(&Outcome::Reverted).expect("json");
        assert_eq!(json, r#"{"status":"reverted"}"#);
    }
}
