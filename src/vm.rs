use std::collections::BTreeSet;

use crate::{
    common::{Word, address::Address, block::BlockContext},
    gas::Fork,
    interpreter::{Interpreter, VmError},
    message::{ExecutionResult, Message, TxContext},
    precompiles::PrecompileSet,
    state::StateManager,
    storage::StorageReader,
    tracer::{Event, EventTracer},
};

/// Gas limit of a run that does not name one.
pub const DEFAULT_GAS_LIMIT: u64 = 0xffffff;

/// Sparse options of a single code run. Everything left out falls back to
/// a documented default:
///
/// * `block`: `BlockContext::default()`
/// * `tx`: built from `gas_price` (zero) and `origin` (the caller, else zero)
/// * `message`: built from the remaining fields
/// * `gas_limit`: [`DEFAULT_GAS_LIMIT`]
/// * `address`, `caller`, `value`: zero
/// * `depth`: 0, `is_static`: false, `selfdestruct`: empty, `pc`: 0
#[derive(Clone, Debug, Default)]
pub struct RunCodeOpts {
    pub block: Option<BlockContext>,
    pub tx: Option<TxContext>,
    pub gas_price: Option<Word>,
    pub origin: Option<Address>,
    pub message: Option<Message>,
    pub caller: Option<Address>,
    pub code: Option<Vec<u8>>,
    pub data: Option<Vec<u8>>,
    pub gas_limit: Option<u64>,
    pub value: Option<Word>,
    pub depth: Option<usize>,
    pub is_static: Option<bool>,
    pub selfdestruct: Option<BTreeSet<Address>>,
    pub address: Option<Address>,
    pub pc: Option<usize>,
}

impl RunCodeOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block(mut self, block: BlockContext) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_tx(mut self, tx: TxContext) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn with_gas_price(mut self, gas_price: Word) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_origin(mut self, origin: Address) -> Self {
        self.origin = Some(origin);
        self
    }

    /// A pre-built message wins over every per-field option below.
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_caller(mut self, caller: Address) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn with_code(mut self, code: Vec<u8>) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_value(mut self, value: Word) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = Some(is_static);
        self
    }

    pub fn with_selfdestruct(mut self, selfdestruct: BTreeSet<Address>) -> Self {
        self.selfdestruct = Some(selfdestruct);
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_pc(mut self, pc: usize) -> Self {
        self.pc = Some(pc);
        self
    }

    fn tx_context(&self) -> TxContext {
        if let Some(tx) = &self.tx {
            return tx.clone();
        }
        let origin = self.origin.or(self.caller).unwrap_or_default();
        TxContext::new(self.gas_price.unwrap_or_default(), origin)
    }

    fn into_message(self) -> Message {
        if let Some(message) = self.message {
            return message;
        }
        Message {
            caller: self.caller.unwrap_or_default(),
            to: Some(self.address.unwrap_or_default()),
            code_address: None,
            value: self.value.unwrap_or_default(),
            data: self.data.unwrap_or_default(),
            code: self.code.unwrap_or_default(),
            gas_limit: self.gas_limit.unwrap_or(DEFAULT_GAS_LIMIT),
            depth: self.depth.unwrap_or_default(),
            is_static: self.is_static.unwrap_or_default(),
            salt: None,
            selfdestruct: self.selfdestruct.unwrap_or_default(),
        }
    }
}

/// Owns the state and the protocol configuration; every run gets a fresh
/// read cache and interpreter.
#[derive(Debug)]
pub struct Vm<S> {
    state: S,
    fork: Fork,
    precompiles: PrecompileSet,
}

impl<S: StateManager> Vm<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            fork: Fork::default(),
            precompiles: PrecompileSet::default(),
        }
    }

    pub fn with_fork(self, fork: Fork) -> Self {
        Self { fork, ..self }
    }

    pub fn with_precompiles(self, precompiles: PrecompileSet) -> Self {
        Self {
            precompiles,
            ..self
        }
    }

    pub fn fork(&self) -> Fork {
        self.fork
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    fn interpreter(&mut self, opts: &RunCodeOpts) -> Interpreter<&mut S> {
        Interpreter::new(
            StorageReader::new(&mut self.state),
            opts.block.clone().unwrap_or_default(),
            opts.tx_context(),
            self.fork,
            self.precompiles.clone(),
        )
    }

    /// Runs `opts.code` (or `opts.message`) to completion.
    pub async fn run_code(&mut self, opts: RunCodeOpts) -> Result<ExecutionResult, VmError> {
        self.interpreter(&opts).run_code(opts).await
    }

    /// Same as [`Vm::run_code`], also returning what `tracer` recorded.
    pub async fn trace_code<T: EventTracer>(
        &mut self,
        opts: RunCodeOpts,
        tracer: T,
    ) -> Result<(ExecutionResult, Vec<Event>), VmError> {
        let mut interpreter = self.interpreter(&opts).with_tracer(tracer);
        let pc = opts.pc.unwrap_or_default();
        let result = interpreter.run_message(opts.into_message(), pc).await?;
        Ok((result, interpreter.take_events()))
    }
}

impl<S: StateManager, T: EventTracer> Interpreter<S, T> {
    /// Runs with a pre-built interpreter. Block and transaction options are
    /// ignored, the interpreter already carries both.
    pub async fn run_code(mut self, opts: RunCodeOpts) -> Result<ExecutionResult, VmError> {
        let pc = opts.pc.unwrap_or_default();
        let message = opts.into_message();
        tracing::debug!(
            "RUN: fork={} gas={} code={} bytes",
            self.fork(),
            message.gas_limit,
            message.code.len()
        );
        self.run_message(message, pc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::Outcome, state::MemoryState};

    #[test]
    fn test_default_message() {
        let message = RunCodeOpts::new().with_code(vec![0x00]).into_message();
        assert_eq!(message.gas_limit, DEFAULT_GAS_LIMIT);
        assert_eq!(message.to, Some(Address::zero()));
        assert_eq!(message.depth, 0);
        assert!(!message.is_static);
    }

    #[test]
    fn test_origin_falls_back_to_caller() {
        let caller = Address::low(0x11);
        let tx = RunCodeOpts::new().with_caller(caller).tx_context();
        assert_eq!(tx.origin, caller);

        let tx = RunCodeOpts::new()
            .with_caller(caller)
            .with_origin(Address::low(0x22))
            .tx_context();
        assert_eq!(tx.origin, Address::low(0x22));
        assert_eq!(tx.gas_price, Word::zero());
    }

    #[test]
    fn test_prebuilt_message_wins() {
        let message = Message {
            gas_limit: 7,
            ..Default::default()
        };
        let built = RunCodeOpts::new()
            .with_gas_limit(100)
            .with_message(message.clone())
            .into_message();
        assert_eq!(built, message);
    }

    #[tokio::test]
    async fn test_prebuilt_interpreter() -> eyre::Result<()> {
        let mut state = MemoryState::new();
        let interpreter = Interpreter::new(
            StorageReader::new(&mut state),
            BlockContext::default(),
            TxContext::default(),
            Fork::Cancun,
            PrecompileSet::default(),
        );
        // PUSH0 STOP
        let opts = RunCodeOpts::new().with_code(vec![0x5f, 0x00]).with_gas_limit(10);
        let result = interpreter.run_code(opts).await?;
        assert_eq!(result.outcome, Outcome::Halted(crate::message::Halt::Stop));
        assert_eq!(result.gas_used, 2);
        Ok(())
    }
}
