use std::collections::{BTreeSet, HashMap, HashSet};

use i256::I256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    common::{Word, account::Account, address::Address, block::BlockContext, hash::keccak256},
    decoder::{Bytecode, Decoder, Instruction},
    gas::{
        CALL_DEPTH_LIMIT, Cost, Fork, Gas, MAX_CODE_SIZE, MAX_INITCODE_SIZE, STACK_LIMIT,
        all_but_one_64th, cost,
    },
    memory::{self, Memory},
    message::{ExecutionResult, Halt, Log, Message, Outcome, TxContext},
    opcodes::get_opcode_at,
    precompiles::{PrecompileInput, PrecompileSet},
    state::StateManager,
    storage::StorageReader,
    tracer::{CallType, Event, EventData, EventTracer, NoopTracer},
};

/// Why a frame stopped abnormally. Carried inside `Outcome::Faulted`.
#[derive(Error, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exception {
    #[error("Out of gas")]
    OutOfGas,
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Invalid jump destination")]
    InvalidJumpDestination,
    #[error("State change in static context")]
    StaticStateChangeViolation,
    #[error("Return data out of bounds")]
    ReturnDataOutOfBounds,
    #[error("Contract address collision")]
    CreateCollision,
    #[error("Deployed code size exceeds the limit")]
    CodeSizeExceeded,
    #[error("Deployed code starts with 0xef")]
    InvalidCodePrefix,
    #[error("Init code size exceeds the limit")]
    InitCodeSizeExceeded,
    #[error("Insufficient balance for transfer")]
    InsufficientBalance,
    #[error("Nonce overflow")]
    NonceOverflow,
}

/// Failures outside the machine itself. These abort the whole execution.
#[derive(Error, Debug)]
pub enum VmError {
    #[error("{0}")]
    State(#[from] eyre::Report),
}

/// Anything that stops an instruction half way.
enum Interrupt {
    Exception(Exception),
    Internal(VmError),
}

impl From<Exception> for Interrupt {
    fn from(e: Exception) -> Self {
        Self::Exception(e)
    }
}

impl From<VmError> for Interrupt {
    fn from(e: VmError) -> Self {
        Self::Internal(e)
    }
}

impl From<eyre::Report> for Interrupt {
    fn from(e: eyre::Report) -> Self {
        Self::Internal(e.into())
    }
}

enum Control {
    Continue,
    Jump(usize),
    Halt(Halt),
    Revert,
    /// Suspend the frame until a nested message returns.
    Call(Box<Call>),
}

/// A nested message requested by a CALL or CREATE family instruction.
struct Call {
    message: Message,
    kind: CallType,
    resume: Resume,
}

/// What the suspended parent needs once the nested message returns.
struct Resume {
    /// Gas handed to the child, stipend included.
    gas: u64,
    target: Target,
    step: Option<StepTrace>,
}

enum Target {
    Call {
        ret_offset: usize,
        ret_size: usize,
        checkpoint: usize,
    },
    Create,
}

/// Step event of a suspended instruction, emitted once the child returns.
struct StepTrace {
    pc: usize,
    op: u8,
    name: String,
    used: u64,
}

/// A frame together with the message it runs.
struct Context {
    message: Message,
    code: Bytecode,
    frame: Frame,
    checkpoint: usize,
    /// Address and checkpoint of a contract being deployed.
    create: Option<(Address, usize)>,
    resume: Option<Resume>,
}

enum Suspend {
    Call(Box<Call>),
    Exit(Outcome),
}

/// Previous values of everything the execution wrote, undone on failure.
#[derive(Debug)]
enum Change {
    Account(Address, Account),
    Code(Address, Vec<u8>),
    Storage(Address, Word, Word),
    Transient(Address, Word, Word),
    WarmAddress(Address),
    WarmSlot(Address, Word),
}

/// Machine state of one message.
#[derive(Debug, Default)]
struct Frame {
    stack: Vec<Word>,
    memory: Memory,
    gas: Gas,
    /// Index into the decoded instructions, not a byte offset.
    pc: usize,
    /// Return data of the most recent sub-call.
    ret: Vec<u8>,
    output: Vec<u8>,
    refund: i64,
    logs: Vec<Log>,
    selfdestruct: BTreeSet<Address>,
}

impl Frame {
    fn new(message: &Message) -> Self {
        Self {
            gas: Gas::new(message.gas_limit),
            selfdestruct: message.selfdestruct.clone(),
            ..Default::default()
        }
    }

    fn push(&mut self, value: Word) -> Result<(), Exception> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(Exception::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Word, Exception> {
        self.stack.pop().ok_or(Exception::StackUnderflow)
    }

    fn pop_address(&mut self) -> Result<Address, Exception> {
        Ok((&self.pop()?).into())
    }

    /// Pops `offset` and `size` and pays for the memory they cover.
    fn pop_region(&mut self, fork: Fork) -> Result<(usize, usize), Exception> {
        let offset = self.pop()?;
        let size = self.pop()?;
        let (offset, size) = memory::region(&offset, &size)?;
        self.expand(fork, offset, size)?;
        Ok((offset, size))
    }

    fn expand(&mut self, fork: Fork, offset: usize, size: usize) -> Result<(), Exception> {
        self.gas
            .sub(self.memory.expansion_cost(fork, offset, size))?;
        self.memory.expand(offset, size);
        Ok(())
    }
}

fn ensure_mutable(message: &Message) -> Result<(), Exception> {
    if message.is_static {
        return Err(Exception::StaticStateChangeViolation);
    }
    Ok(())
}

fn signed(word: &Word) -> I256 {
    I256::from_be_bytes(word.into_bytes())
}

fn abs(word: &Word) -> Word {
    if word.is_negative() {
        word.negate()
    } else {
        *word
    }
}

fn copy_cost(fork: Fork, base: Cost, size: usize) -> u64 {
    let words = size.div_ceil(32) as u64;
    cost(fork, base) + cost(fork, Cost::Copy) * words
}

/// Executes messages against the state behind a [`StorageReader`].
///
/// One interpreter serves one top-level invocation: the read cache, the
/// access lists, transient storage and the journal all live here and are
/// shared by every nested frame.
pub struct Interpreter<S, T = NoopTracer> {
    storage: StorageReader<S>,
    block: BlockContext,
    tx: TxContext,
    fork: Fork,
    precompiles: PrecompileSet,
    tracer: T,
    warm_addresses: HashSet<Address>,
    warm_slots: HashSet<(Address, Word)>,
    transient: HashMap<(Address, Word), Word>,
    journal: Vec<Change>,
}

impl<S: StateManager> Interpreter<S, NoopTracer> {
    pub fn new(
        storage: StorageReader<S>,
        block: BlockContext,
        tx: TxContext,
        fork: Fork,
        precompiles: PrecompileSet,
    ) -> Self {
        Self {
            storage,
            block,
            tx,
            fork,
            precompiles,
            tracer: NoopTracer,
            warm_addresses: HashSet::new(),
            warm_slots: HashSet::new(),
            transient: HashMap::new(),
            journal: Vec::new(),
        }
    }
}

impl<S: StateManager, T: EventTracer> Interpreter<S, T> {
    pub fn with_tracer<G: EventTracer>(self, tracer: G) -> Interpreter<S, G> {
        Interpreter {
            storage: self.storage,
            block: self.block,
            tx: self.tx,
            fork: self.fork,
            precompiles: self.precompiles,
            tracer,
            warm_addresses: self.warm_addresses,
            warm_slots: self.warm_slots,
            transient: self.transient,
            journal: self.journal,
        }
    }

    pub fn fork(&self) -> Fork {
        self.fork
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.tracer.take()
    }

    pub fn into_storage(self) -> StorageReader<S> {
        self.storage
    }

    /// Runs a top-level message starting at byte offset `pc` of its code.
    ///
    /// No value moves at this level: the caller of a top-level message is
    /// expected to have settled balances already.
    ///
    /// Nested messages run from an explicit stack of suspended frames, so
    /// call depth does not grow the native stack.
    pub async fn run_message(
        &mut self,
        message: Message,
        pc: usize,
    ) -> Result<ExecutionResult, VmError> {
        if self.fork.has_access_lists() {
            let mut warm = vec![self.tx.origin, message.caller, message.address()];
            warm.extend(self.precompiles.addresses(self.fork));
            if self.fork >= Fork::Shanghai {
                warm.push(self.block.coinbase);
            }
            self.warm_addresses.extend(warm);
        }
        let kind = if message.is_create() {
            if message.salt.is_some() {
                CallType::Create2
            } else {
                CallType::Create
            }
        } else {
            CallType::Call
        };

        let mut frames: Vec<Context> = Vec::new();
        let mut returned = self.enter(message, kind, pc, &mut frames).await?;
        while let Some(mut context) = frames.pop() {
            if let Some(result) = returned.take() {
                self.resume(&mut context, result).await?;
            }
            match self.run(&mut context).await? {
                Suspend::Call(call) => {
                    let Call {
                        message,
                        kind,
                        resume,
                    } = *call;
                    context.resume = Some(resume);
                    frames.push(context);
                    returned = self.enter(message, kind, 0, &mut frames).await?;
                }
                Suspend::Exit(outcome) => {
                    returned = Some(self.finish(context, outcome).await?);
                }
            }
        }
        returned.ok_or_else(|| VmError::State(eyre::eyre!("execution ended without a result")))
    }

    /// Starts a message. A frame with code to run is pushed onto `frames`,
    /// anything that completes right away is returned.
    async fn enter(
        &mut self,
        message: Message,
        kind: CallType,
        pc: usize,
        frames: &mut Vec<Context>,
    ) -> Result<Option<ExecutionResult>, VmError> {
        let depth = message.depth;
        tracing::debug!(
            "ENTER: depth={depth} {kind:?} from={} to={:?} gas={}",
            message.caller,
            message.to,
            message.gas_limit
        );
        if self.tracer.is_enabled() {
            self.tracer.push(Event {
                data: EventData::Call {
                    r#type: kind,
                    from: message.caller,
                    to: message.to,
                    value: message.value,
                    gas: message.gas_limit,
                    data: message.data.clone().into(),
                },
                depth,
            });
        }

        let mut create = None;
        let message = if message.is_create() {
            match self.begin_create(message).await? {
                Ok((message, address, checkpoint)) => {
                    create = Some((address, checkpoint));
                    message
                }
                Err(result) => return Ok(Some(self.exit(depth, result))),
            }
        } else if self.precompiles.contains(&message.code_address(), self.fork) {
            let result = self.precompile(message);
            return Ok(Some(self.exit(depth, result)));
        } else {
            message
        };

        let mut context = Context {
            code: Decoder::decode(&message.code),
            frame: Frame::new(&message),
            checkpoint: self.journal.len(),
            message,
            create,
            resume: None,
        };
        match context.code.index_of(pc) {
            Some(index) => {
                context.frame.pc = index;
                frames.push(context);
                Ok(None)
            }
            None => {
                let outcome = Outcome::Faulted(Exception::InvalidJumpDestination);
                Ok(Some(self.finish(context, outcome).await?))
            }
        }
    }

    fn exit(&mut self, depth: usize, result: ExecutionResult) -> ExecutionResult {
        tracing::debug!(
            "EXIT: depth={depth} gas={} outcome={:?}",
            result.gas_used,
            result.outcome
        );
        self.tracer.push(Event {
            data: EventData::Exit {
                gas_used: result.gas_used,
                outcome: result.outcome.clone(),
            },
            depth,
        });
        result
    }

    fn precompile(&mut self, message: Message) -> ExecutionResult {
        let address = message.code_address();
        let input = PrecompileInput {
            data: &message.data,
            gas_limit: message.gas_limit,
            fork: self.fork,
        };
        let Some(result) = self.precompiles.run(&address, &input) else {
            return ExecutionResult::faulted(&message, Exception::OutOfGas);
        };
        self.tracer.push(Event {
            data: EventData::Precompile {
                address,
                gas_used: result.gas_used,
                success: result.success,
            },
            depth: message.depth,
        });
        if !result.success {
            return ExecutionResult::faulted(&message, Exception::OutOfGas);
        }
        ExecutionResult {
            gas_used: result.gas_used,
            gas_refund: 0,
            return_value: result.output.into(),
            outcome: Outcome::Halted(Halt::Return),
            logs: Vec::new(),
            selfdestruct: message.selfdestruct,
            created_address: None,
        }
    }

    /// Derives the new address and installs the account. The inner `Err`
    /// is the result of a create that failed before any init code ran.
    async fn begin_create(
        &mut self,
        message: Message,
    ) -> Result<Result<(Message, Address, usize), ExecutionResult>, VmError> {
        let caller = message.caller;
        let mut account = self.storage.account(&caller).await?;
        let nonce = account.nonce;
        // EIP-2681
        let Some(next) = nonce.checked_add(1) else {
            return Ok(Err(ExecutionResult::faulted(
                &message,
                Exception::NonceOverflow,
            )));
        };
        let address = match &message.salt {
            Some(salt) => caller.create2(salt, &message.code),
            None => caller.create(nonce),
        };

        account.nonce = next;
        self.put_account(&caller, account).await?;
        if self.fork.has_access_lists() && self.warm_addresses.insert(address) {
            self.journal.push(Change::WarmAddress(address));
        }

        let checkpoint = self.journal.len();
        let message = Message {
            to: Some(address),
            ..message
        };

        let target = self.storage.account(&address).await?;
        if target.nonce != 0 || target.has_code() {
            return Ok(Err(ExecutionResult::faulted(
                &message,
                Exception::CreateCollision,
            )));
        }
        self.put_account(
            &address,
            Account {
                nonce: 1,
                ..target
            },
        )
        .await?;
        if !self.transfer(&caller, &address, &message.value).await? {
            self.rollback(checkpoint).await?;
            return Ok(Err(ExecutionResult::faulted(
                &message,
                Exception::InsufficientBalance,
            )));
        }
        Ok(Ok((message, address, checkpoint)))
    }

    /// Stores the code returned by successful init code.
    async fn deploy(
        &mut self,
        message: &Message,
        address: Address,
        checkpoint: usize,
        mut result: ExecutionResult,
    ) -> Result<ExecutionResult, VmError> {
        if !result.is_success() {
            self.rollback(checkpoint).await?;
            return Ok(result);
        }

        let code = std::mem::take(&mut result.return_value).into_bytes();
        let deposit = cost(self.fork, Cost::CodeDeposit) * code.len() as u64;
        let failure = if code.len() > MAX_CODE_SIZE {
            Some(Exception::CodeSizeExceeded)
        } else if self.fork >= Fork::London && code.first() == Some(&0xef) {
            Some(Exception::InvalidCodePrefix)
        } else if deposit > message.gas_limit - result.gas_used {
            Some(Exception::OutOfGas)
        } else {
            None
        };
        if let Some(e) = failure {
            self.rollback(checkpoint).await?;
            return Ok(ExecutionResult::faulted(message, e));
        }

        result.gas_used += deposit;
        let mut account = self.storage.account(&address).await?;
        account.code_hash = Word::from_bytes(&keccak256(&code));
        self.put_account(&address, account).await?;
        self.put_code(&address, code).await?;
        result.created_address = Some(address);
        Ok(result)
    }

    /// Steps the frame until it exits or asks for a nested message.
    async fn run(&mut self, context: &mut Context) -> Result<Suspend, VmError> {
        let Context {
            message,
            code,
            frame,
            ..
        } = context;
        loop {
            match self.step(frame, message, code).await {
                Ok(Control::Continue) => frame.pc += 1,
                Ok(Control::Jump(index)) => frame.pc = index,
                Ok(Control::Call(call)) => {
                    frame.pc += 1;
                    return Ok(Suspend::Call(call));
                }
                Ok(Control::Halt(halt)) => return Ok(Suspend::Exit(Outcome::Halted(halt))),
                Ok(Control::Revert) => return Ok(Suspend::Exit(Outcome::Reverted)),
                Err(Interrupt::Exception(e)) => return Ok(Suspend::Exit(Outcome::Faulted(e))),
                Err(Interrupt::Internal(e)) => return Err(e),
            }
        }
    }

    /// Turns the outcome of a frame into its result. On failure everything
    /// the frame wrote is rolled back.
    async fn finish(
        &mut self,
        context: Context,
        outcome: Outcome,
    ) -> Result<ExecutionResult, VmError> {
        let Context {
            message,
            frame,
            checkpoint,
            create,
            ..
        } = context;
        let result = match outcome {
            Outcome::Halted(halt) => ExecutionResult {
                gas_used: frame.gas.used,
                gas_refund: frame.refund,
                return_value: frame.output.into(),
                outcome: Outcome::Halted(halt),
                logs: frame.logs,
                selfdestruct: frame.selfdestruct,
                created_address: None,
            },
            Outcome::Reverted => {
                self.rollback(checkpoint).await?;
                ExecutionResult {
                    gas_used: frame.gas.used,
                    gas_refund: 0,
                    return_value: frame.output.into(),
                    outcome: Outcome::Reverted,
                    logs: Vec::new(),
                    selfdestruct: message.selfdestruct.clone(),
                    created_address: None,
                }
            }
            Outcome::Faulted(e) => {
                tracing::debug!("FAULT: depth={} {e}", message.depth);
                self.rollback(checkpoint).await?;
                ExecutionResult::faulted(&message, e)
            }
        };
        let result = match create {
            Some((address, checkpoint)) => {
                self.deploy(&message, address, checkpoint, result).await?
            }
            None => result,
        };
        Ok(self.exit(message.depth, result))
    }

    /// Hands a nested result back to the frame that was waiting for it.
    async fn resume(
        &mut self,
        context: &mut Context,
        result: ExecutionResult,
    ) -> Result<(), VmError> {
        let Some(resume) = context.resume.take() else {
            return Ok(());
        };
        let frame = &mut context.frame;
        frame.gas.add(resume.gas.saturating_sub(result.gas_used));

        // The suspended instruction popped its operands, so the push fits.
        match resume.target {
            Target::Call {
                ret_offset,
                ret_size,
                checkpoint,
            } => {
                let success = result.is_success();
                if success {
                    frame.refund += result.gas_refund;
                    frame.logs.extend(result.logs);
                    frame.selfdestruct.extend(result.selfdestruct);
                } else {
                    self.rollback(checkpoint).await?;
                }
                let output = result.return_value.into_bytes();
                let n = ret_size.min(output.len());
                frame.memory.store(ret_offset, &output[..n]);
                frame.ret = output;
                frame.stack.push(Word::from(success));
            }
            Target::Create => match (&result.outcome, result.created_address) {
                (Outcome::Halted(_), Some(address)) => {
                    frame.refund += result.gas_refund;
                    frame.logs.extend(result.logs);
                    frame.selfdestruct.extend(result.selfdestruct);
                    frame.stack.push(address.as_word());
                }
                (Outcome::Reverted, _) => {
                    frame.ret = result.return_value.into_bytes();
                    frame.stack.push(Word::zero());
                }
                _ => frame.stack.push(Word::zero()),
            },
        }

        if let Some(trace) = resume.step {
            self.trace_step(&context.frame, context.message.depth, trace);
        }
        Ok(())
    }

    fn trace_step(&mut self, frame: &Frame, depth: usize, trace: StepTrace) {
        self.tracer.push(Event {
            data: EventData::Step {
                pc: trace.pc,
                op: trace.op,
                name: trace.name,
                gas_cost: frame.gas.used.saturating_sub(trace.used),
                gas_used: frame.gas.used,
                gas_remaining: frame.gas.remaining(),
            },
            depth,
        });
    }

    async fn step(
        &mut self,
        frame: &mut Frame,
        message: &Message,
        code: &Bytecode,
    ) -> Result<Control, Interrupt> {
        let Some(instruction) = code.instructions.get(frame.pc) else {
            return Ok(Control::Halt(Halt::Stop));
        };
        let Some(opcode) = get_opcode_at(instruction.code, self.fork) else {
            return Err(Exception::InvalidOpcode(instruction.code).into());
        };
        let inputs = opcode.inputs as usize;
        let outputs = opcode.outputs as usize;
        if frame.stack.len() < inputs {
            return Err(Exception::StackUnderflow.into());
        }
        if frame.stack.len() - inputs + outputs > STACK_LIMIT {
            return Err(Exception::StackOverflow.into());
        }

        let used = frame.gas.used;
        let mut control = self
            .execute_instruction(frame, message, code, instruction)
            .await?;

        tracing::trace!(
            "{:#06x}: {} gas={}",
            instruction.offset,
            opcode.name(),
            frame.gas.remaining()
        );
        if self.tracer.is_enabled() {
            let trace = StepTrace {
                pc: instruction.offset,
                op: instruction.code,
                name: opcode.name(),
                used,
            };
            match &mut control {
                Control::Call(call) => call.resume.step = Some(trace),
                _ => self.trace_step(frame, message.depth, trace),
            }
        }
        Ok(control)
    }

    async fn execute_instruction(
        &mut self,
        frame: &mut Frame,
        message: &Message,
        code: &Bytecode,
        instruction: &Instruction,
    ) -> Result<Control, Interrupt> {
        let fork = self.fork;
        let this = message.address();

        match instruction.code {
            0x00 => {
                // STOP
                return Ok(Control::Halt(Halt::Stop));
            }

            // 0x01..0x0b: Arithmetic Operations
            0x01 => {
                // ADD
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                let (res, _) = a.overflowing_add(b);
                frame.push(res)?;
            }
            0x02 => {
                // MUL
                frame.gas.sub(cost(fork, Cost::Low))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                let (res, _) = a.overflowing_mul(b);
                frame.push(res)?;
            }
            0x03 => {
                // SUB
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                let (res, _) = a.overflowing_sub(b);
                frame.push(res)?;
            }
            0x04 => {
                // DIV
                frame.gas.sub(cost(fork, Cost::Low))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(if b.is_zero() { Word::zero() } else { a / b })?;
            }
            0x05 => {
                // SDIV
                frame.gas.sub(cost(fork, Cost::Low))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                let res = if b.is_zero() {
                    Word::zero()
                } else {
                    let res = abs(&a) / abs(&b);
                    if a.is_negative() != b.is_negative() {
                        res.negate()
                    } else {
                        res
                    }
                };
                frame.push(res)?;
            }
            0x06 => {
                // MOD
                frame.gas.sub(cost(fork, Cost::Low))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(if b.is_zero() { Word::zero() } else { a % b })?;
            }
            0x07 => {
                // SMOD: sign follows the dividend
                frame.gas.sub(cost(fork, Cost::Low))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                let res = if b.is_zero() {
                    Word::zero()
                } else {
                    let res = abs(&a) % abs(&b);
                    if a.is_negative() { res.negate() } else { res }
                };
                frame.push(res)?;
            }
            0x08 => {
                // ADDMOD
                frame.gas.sub(cost(fork, Cost::Mid))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                let n = frame.pop()?;
                frame.push(a.add_modulo(&b, &n))?;
            }
            0x09 => {
                // MULMOD
                frame.gas.sub(cost(fork, Cost::Mid))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                let n = frame.pop()?;
                frame.push(a.mul_modulo(&b, &n))?;
            }
            0x0a => {
                // EXP
                let base = frame.pop()?;
                let exponent = frame.pop()?;
                let exp_bytes = exponent.bits().div_ceil(8) as u64;
                frame
                    .gas
                    .sub(cost(fork, Cost::Exp) + cost(fork, Cost::ExpByte) * exp_bytes)?;
                frame.push(base.pow(exponent))?;
            }
            0x0b => {
                // SIGNEXTEND
                frame.gas.sub(cost(fork, Cost::Low))?;
                let byte = frame.pop()?;
                let value = frame.pop()?;
                frame.push(value.sign_extend(&byte))?;
            }

            // 0x10s: Comparison & Bitwise Logic
            0x10 => {
                // LT
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(Word::from(a < b))?;
            }
            0x11 => {
                // GT
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(Word::from(a > b))?;
            }
            0x12 => {
                // SLT
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(Word::from(signed(&a) < signed(&b)))?;
            }
            0x13 => {
                // SGT
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(Word::from(signed(&a) > signed(&b)))?;
            }
            0x14 => {
                // EQ
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(Word::from(a == b))?;
            }
            0x15 => {
                // ISZERO
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                frame.push(Word::from(a.is_zero()))?;
            }
            0x16 => {
                // AND
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a & b)?;
            }
            0x17 => {
                // OR
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a | b)?;
            }
            0x18 => {
                // XOR
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a ^ b)?;
            }
            0x19 => {
                // NOT
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let a = frame.pop()?;
                frame.push(!a)?;
            }
            0x1a => {
                // BYTE
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let index = frame.pop()?;
                let value = frame.pop()?;
                frame.push(Word::from(value.byte(index.as_usize())))?;
            }
            0x1b => {
                // SHL
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let shift = frame.pop()?.as_usize();
                let value = frame.pop()?;
                frame.push(value << shift)?;
            }
            0x1c => {
                // SHR
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let shift = frame.pop()?.as_usize();
                let value = frame.pop()?;
                frame.push(value >> shift)?;
            }
            0x1d => {
                // SAR
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let shift = frame.pop()?.as_usize();
                let value = frame.pop()?;
                let res = if shift >= 256 {
                    if value.is_negative() {
                        Word::max()
                    } else {
                        Word::zero()
                    }
                } else {
                    Word::from_bytes(&(signed(&value) >> shift).to_be_bytes())
                };
                frame.push(res)?;
            }

            0x20 => {
                // SHA3
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (offset, size) = memory::region(&offset, &size)?;
                let words = size.div_ceil(32) as u64;
                frame
                    .gas
                    .sub(cost(fork, Cost::Keccak) + cost(fork, Cost::KeccakWord) * words)?;
                frame.expand(fork, offset, size)?;
                let hash = keccak256(&frame.memory.read(offset, size));
                frame.push(Word::from_bytes(&hash))?;
            }

            // 0x30s: Environmental Information
            0x30 => {
                // ADDRESS
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(this.as_word())?;
            }
            0x31 => {
                // BALANCE
                let address = frame.pop_address()?;
                let access = self.access_address(&address);
                frame.gas.sub(cost(fork, Cost::Balance) + access)?;
                let account = self.storage.account(&address).await?;
                frame.push(account.balance)?;
            }
            0x32 => {
                // ORIGIN
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(self.tx.origin.as_word())?;
            }
            0x33 => {
                // CALLER
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(message.caller.as_word())?;
            }
            0x34 => {
                // CALLVALUE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(message.value)?;
            }
            0x35 => {
                // CALLDATALOAD
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let offset = frame.pop()?;
                let mut data = [0u8; 32];
                if let Some(offset) = offset.to_usize().filter(|o| *o < message.data.len()) {
                    let n = (message.data.len() - offset).min(32);
                    data[..n].copy_from_slice(&message.data[offset..offset + n]);
                }
                frame.push(Word::from_bytes(&data))?;
            }
            0x36 => {
                // CALLDATASIZE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(message.data.len()))?;
            }
            0x37 => {
                // CALLDATACOPY
                let dest_offset = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (dest_offset, size) = memory::region(&dest_offset, &size)?;
                frame.gas.sub(copy_cost(fork, Cost::VeryLow, size))?;
                frame.expand(fork, dest_offset, size)?;
                frame
                    .memory
                    .copy_from(dest_offset, &message.data, &offset, size);
            }
            0x38 => {
                // CODESIZE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(code.len()))?;
            }
            0x39 => {
                // CODECOPY
                let dest_offset = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (dest_offset, size) = memory::region(&dest_offset, &size)?;
                frame.gas.sub(copy_cost(fork, Cost::VeryLow, size))?;
                frame.expand(fork, dest_offset, size)?;
                frame
                    .memory
                    .copy_from(dest_offset, &code.bytecode, &offset, size);
            }
            0x3a => {
                // GASPRICE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(self.tx.gas_price)?;
            }
            0x3b => {
                // EXTCODESIZE
                let address = frame.pop_address()?;
                let access = self.access_address(&address);
                frame.gas.sub(cost(fork, Cost::ExtCodeSize) + access)?;
                let len = self.storage.code(&address).await?.len();
                frame.push(Word::from(len))?;
            }
            0x3c => {
                // EXTCODECOPY
                let address = frame.pop_address()?;
                let dest_offset = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (dest_offset, size) = memory::region(&dest_offset, &size)?;
                let access = self.access_address(&address);
                frame
                    .gas
                    .sub(copy_cost(fork, Cost::ExtCodeCopy, size) + access)?;
                frame.expand(fork, dest_offset, size)?;
                let ext = self.storage.code(&address).await?;
                frame.memory.copy_from(dest_offset, &ext, &offset, size);
            }
            0x3d => {
                // RETURNDATASIZE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(frame.ret.len()))?;
            }
            0x3e => {
                // RETURNDATACOPY
                let dest_offset = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let end = offset
                    .checked_add(size)
                    .and_then(|end| end.to_usize())
                    .filter(|end| *end <= frame.ret.len())
                    .ok_or(Exception::ReturnDataOutOfBounds)?;
                let (dest_offset, size) = memory::region(&dest_offset, &size)?;
                frame.gas.sub(copy_cost(fork, Cost::VeryLow, size))?;
                frame.expand(fork, dest_offset, size)?;
                let start = end - size;
                let data = frame.ret[start..end].to_vec();
                frame.memory.store(dest_offset, &data);
            }
            0x3f => {
                // EXTCODEHASH
                let address = frame.pop_address()?;
                let access = self.access_address(&address);
                frame.gas.sub(cost(fork, Cost::ExtCodeHash) + access)?;
                let account = self.storage.account(&address).await?;
                let hash = if account.is_empty() {
                    Word::zero()
                } else {
                    account.code_hash
                };
                frame.push(hash)?;
            }

            // 0x40s: Block Information
            0x40 => {
                // BLOCKHASH
                frame.gas.sub(cost(fork, Cost::BlockHash))?;
                let number = frame.pop()?;
                frame.push(self.block.block_hash(&number))?;
            }
            0x41 => {
                // COINBASE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(self.block.coinbase.as_word())?;
            }
            0x42 => {
                // TIMESTAMP
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(self.block.timestamp))?;
            }
            0x43 => {
                // NUMBER
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(self.block.number))?;
            }
            0x44 => {
                // DIFFICULTY / PREVRANDAO
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(self.block.prevrandao)?;
            }
            0x45 => {
                // GASLIMIT
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(self.block.gas_limit))?;
            }
            0x46 => {
                // CHAINID
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(self.block.chain_id))?;
            }
            0x47 => {
                // SELFBALANCE
                frame.gas.sub(cost(fork, Cost::Low))?;
                let account = self.storage.account(&this).await?;
                frame.push(account.balance)?;
            }
            0x48 => {
                // BASEFEE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(self.block.base_fee)?;
            }
            0x49 => {
                // BLOBHASH
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let index = frame.pop()?;
                let hash = index
                    .to_usize()
                    .and_then(|index| self.block.blob_hashes.get(index))
                    .copied()
                    .unwrap_or_default();
                frame.push(hash)?;
            }
            0x4a => {
                // BLOBBASEFEE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(self.block.blob_base_fee)?;
            }

            // 0x50s: Stack, Memory, Storage and Flow Operations
            0x50 => {
                // POP
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.pop()?;
            }
            0x51 => {
                // MLOAD
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let offset = frame.pop()?;
                let (offset, _) = memory::region(&offset, &Word::from(32u64))?;
                frame.expand(fork, offset, 32)?;
                let value = frame.memory.load(offset);
                frame.push(value)?;
            }
            0x52 => {
                // MSTORE
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let offset = frame.pop()?;
                let value = frame.pop()?;
                let (offset, _) = memory::region(&offset, &Word::from(32u64))?;
                frame.expand(fork, offset, 32)?;
                frame.memory.store(offset, &value.into_bytes());
            }
            0x53 => {
                // MSTORE8
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let offset = frame.pop()?;
                let value = frame.pop()?;
                let (offset, _) = memory::region(&offset, &Word::one())?;
                frame.expand(fork, offset, 1)?;
                frame.memory.store(offset, &[value.byte(31)]);
            }
            0x54 => {
                // SLOAD
                let key = frame.pop()?;
                let access = if fork.has_access_lists() {
                    if self.access_slot(&this, &key) {
                        cost(fork, Cost::ColdSload)
                    } else {
                        cost(fork, Cost::WarmAccess)
                    }
                } else {
                    0
                };
                frame.gas.sub(cost(fork, Cost::Sload) + access)?;
                let value = self.storage.get(&this, &key).await?;
                frame.push(value)?;
            }
            0x55 => {
                // SSTORE
                ensure_mutable(message)?;
                self.sstore(frame, &this).await?;
            }
            0x56 => {
                // JUMP
                frame.gas.sub(cost(fork, Cost::Mid))?;
                let dest = frame.pop()?;
                let index = dest
                    .to_usize()
                    .and_then(|dest| code.resolve_jump(dest))
                    .ok_or(Exception::InvalidJumpDestination)?;
                return Ok(Control::Jump(index));
            }
            0x57 => {
                // JUMPI
                frame.gas.sub(cost(fork, Cost::High))?;
                let dest = frame.pop()?;
                let cond = frame.pop()?;
                if !cond.is_zero() {
                    let index = dest
                        .to_usize()
                        .and_then(|dest| code.resolve_jump(dest))
                        .ok_or(Exception::InvalidJumpDestination)?;
                    return Ok(Control::Jump(index));
                }
            }
            0x58 => {
                // PC
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(instruction.offset))?;
            }
            0x59 => {
                // MSIZE
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(frame.memory.len()))?;
            }
            0x5a => {
                // GAS
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::from(frame.gas.remaining()))?;
            }
            0x5b => {
                // JUMPDEST
                frame.gas.sub(cost(fork, Cost::JumpDest))?;
            }
            0x5c => {
                // TLOAD
                frame.gas.sub(cost(fork, Cost::TransientAccess))?;
                let key = frame.pop()?;
                let value = self
                    .transient
                    .get(&(this, key))
                    .copied()
                    .unwrap_or_default();
                frame.push(value)?;
            }
            0x5d => {
                // TSTORE
                ensure_mutable(message)?;
                frame.gas.sub(cost(fork, Cost::TransientAccess))?;
                let key = frame.pop()?;
                let value = frame.pop()?;
                let previous = if value.is_zero() {
                    self.transient.remove(&(this, key))
                } else {
                    self.transient.insert((this, key), value)
                };
                self.journal
                    .push(Change::Transient(this, key, previous.unwrap_or_default()));
            }
            0x5e => {
                // MCOPY
                let dest_offset = frame.pop()?;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (dest_offset, len) = memory::region(&dest_offset, &size)?;
                let (offset, size) = memory::region(&offset, &size)?;
                frame.gas.sub(copy_cost(fork, Cost::VeryLow, size))?;
                frame.expand(fork, dest_offset.max(offset), len)?;
                frame.memory.copy_within(offset, dest_offset, size);
            }
            0x5f => {
                // PUSH0
                frame.gas.sub(cost(fork, Cost::Base))?;
                frame.push(Word::zero())?;
            }

            0x60..=0x7f => {
                // PUSH1..PUSH32
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let arg = instruction.argument.as_deref().unwrap_or_default();
                frame.push(Word::from_bytes(arg))?;
            }

            0x80..=0x8f => {
                // DUP1..DUP16
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let n = (instruction.code - 0x7f) as usize;
                let value = frame.stack[frame.stack.len() - n];
                frame.push(value)?;
            }

            0x90..=0x9f => {
                // SWAP1..SWAP16
                frame.gas.sub(cost(fork, Cost::VeryLow))?;
                let n = (instruction.code - 0x8f) as usize;
                let top = frame.stack.len() - 1;
                frame.stack.swap(top, top - n);
            }

            0xa0..=0xa4 => {
                // LOG0..LOG4
                ensure_mutable(message)?;
                let n = (instruction.code - 0xa0) as usize;
                let offset = frame.pop()?;
                let size = frame.pop()?;
                let (offset, size) = memory::region(&offset, &size)?;
                let mut topics = Vec::with_capacity(n);
                for _ in 0..n {
                    topics.push(frame.pop()?);
                }
                frame.gas.sub(
                    cost(fork, Cost::Log)
                        + cost(fork, Cost::LogTopic) * n as u64
                        + cost(fork, Cost::LogData) * size as u64,
                )?;
                frame.expand(fork, offset, size)?;
                frame.logs.push(Log {
                    address: this,
                    topics,
                    data: frame.memory.read(offset, size).into(),
                });
            }

            0xf0 | 0xf5 => {
                // CREATE | CREATE2
                ensure_mutable(message)?;
                return self
                    .create_op(frame, message, instruction.code == 0xf5)
                    .await;
            }
            0xf1 => {
                // CALL
                return self.call_op(frame, message, CallType::Call).await;
            }
            0xf2 => {
                // CALLCODE
                return self.call_op(frame, message, CallType::Code).await;
            }
            0xf3 | 0xfd => {
                // RETURN | REVERT
                let (offset, size) = frame.pop_region(fork)?;
                frame.output = frame.memory.read(offset, size);
                return Ok(if instruction.code == 0xf3 {
                    Control::Halt(Halt::Return)
                } else {
                    Control::Revert
                });
            }
            0xf4 => {
                // DELEGATECALL
                return self.call_op(frame, message, CallType::Delegate).await;
            }
            0xfa => {
                // STATICCALL
                return self.call_op(frame, message, CallType::Static).await;
            }
            0xff => {
                // SELFDESTRUCT
                ensure_mutable(message)?;
                self.selfdestruct(frame, &this).await?;
                return Ok(Control::Halt(Halt::SelfDestruct));
            }
            byte => {
                // 0xfe INVALID
                return Err(Exception::InvalidOpcode(byte).into());
            }
        }

        Ok(Control::Continue)
    }

    async fn sstore(&mut self, frame: &mut Frame, this: &Address) -> Result<(), Interrupt> {
        let fork = self.fork;
        // EIP-2200: never store with only the stipend left.
        if fork >= Fork::Istanbul && frame.gas.remaining() <= cost(fork, Cost::SstoreSentry) {
            return Err(Exception::OutOfGas.into());
        }
        let key = frame.pop()?;
        let new = frame.pop()?;
        let current = self.storage.get(this, &key).await?;
        let original = self.storage.original(this, &key).await?;

        let clear = cost(fork, Cost::SstoreClearRefund) as i64;
        let set = cost(fork, Cost::SstoreSet);
        let reset = cost(fork, Cost::SstoreReset);
        let dirty = cost(fork, Cost::SstoreDirty);

        let mut refund = 0i64;
        let mut gas = if matches!(fork, Fork::Byzantium | Fork::Petersburg) {
            if !current.is_zero() && new.is_zero() {
                refund += clear;
            }
            if current.is_zero() && !new.is_zero() {
                set
            } else {
                reset
            }
        } else if current == new {
            dirty
        } else if original == current {
            if !original.is_zero() && new.is_zero() {
                refund += clear;
            }
            if original.is_zero() { set } else { reset }
        } else {
            if !original.is_zero() {
                if current.is_zero() {
                    refund -= clear;
                } else if new.is_zero() {
                    refund += clear;
                }
            }
            if original == new {
                refund += if original.is_zero() {
                    (set - dirty) as i64
                } else {
                    (reset - dirty) as i64
                };
            }
            dirty
        };
        if fork.has_access_lists() && self.access_slot(this, &key) {
            gas += cost(fork, Cost::ColdSload);
        }
        frame.gas.sub(gas)?;

        if current != new {
            self.put_storage(this, key, new).await?;
        }
        frame.refund += refund;
        Ok(())
    }

    async fn call_op(
        &mut self,
        frame: &mut Frame,
        message: &Message,
        kind: CallType,
    ) -> Result<Control, Interrupt> {
        let fork = self.fork;
        let this = message.address();

        let gas = frame.pop()?;
        let target = frame.pop_address()?;
        let value = if matches!(kind, CallType::Call | CallType::Code) {
            frame.pop()?
        } else {
            Word::zero()
        };
        let args_offset = frame.pop()?;
        let args_size = frame.pop()?;
        let ret_offset = frame.pop()?;
        let ret_size = frame.pop()?;
        let (args_offset, args_size) = memory::region(&args_offset, &args_size)?;
        let (ret_offset, ret_size) = memory::region(&ret_offset, &ret_size)?;

        if kind == CallType::Call && !value.is_zero() {
            ensure_mutable(message)?;
        }

        let mut charge = cost(fork, Cost::Call) + self.access_address(&target);
        if !value.is_zero() {
            charge += cost(fork, Cost::CallValue);
            if kind == CallType::Call && self.storage.account(&target).await?.is_empty() {
                charge += cost(fork, Cost::NewAccount);
            }
        }
        let expansion = frame
            .memory
            .expansion_cost(fork, args_offset, args_size)
            .max(frame.memory.expansion_cost(fork, ret_offset, ret_size));
        frame.gas.sub(charge + expansion)?;
        frame.memory.expand(args_offset, args_size);
        frame.memory.expand(ret_offset, ret_size);

        let available = all_but_one_64th(frame.gas.remaining());
        let mut child_gas = gas.to_u64().map_or(available, |gas| gas.min(available));
        frame.gas.sub(child_gas)?;
        if !value.is_zero() {
            child_gas += cost(fork, Cost::CallStipend);
        }
        frame.ret.clear();

        let balance = self.storage.account(&this).await?.balance;
        if message.depth + 1 > CALL_DEPTH_LIMIT || balance < value {
            tracing::debug!("CALL: soft failure at depth={}", message.depth);
            frame.gas.add(child_gas);
            frame.push(Word::zero())?;
            return Ok(Control::Continue);
        }

        let (caller, to, apparent) = match kind {
            CallType::Delegate => (message.caller, this, message.value),
            CallType::Code => (this, this, value),
            _ => (this, target, value),
        };
        let child = Message {
            caller,
            to: Some(to),
            code_address: matches!(kind, CallType::Code | CallType::Delegate).then_some(target),
            value: apparent,
            data: frame.memory.read(args_offset, args_size),
            code: self.storage.code(&target).await?,
            gas_limit: child_gas,
            depth: message.depth + 1,
            is_static: message.is_static || kind == CallType::Static,
            salt: None,
            selfdestruct: frame.selfdestruct.clone(),
        };

        let checkpoint = self.journal.len();
        if matches!(kind, CallType::Call) {
            self.transfer(&this, &target, &value).await?;
        }
        Ok(Control::Call(Box::new(Call {
            message: child,
            kind,
            resume: Resume {
                gas: child_gas,
                target: Target::Call {
                    ret_offset,
                    ret_size,
                    checkpoint,
                },
                step: None,
            },
        })))
    }

    async fn create_op(
        &mut self,
        frame: &mut Frame,
        message: &Message,
        create2: bool,
    ) -> Result<Control, Interrupt> {
        let fork = self.fork;
        let this = message.address();

        let value = frame.pop()?;
        let offset = frame.pop()?;
        let size = frame.pop()?;
        let salt = if create2 { Some(frame.pop()?) } else { None };
        let (offset, size) = memory::region(&offset, &size)?;

        if fork >= Fork::Shanghai && size > MAX_INITCODE_SIZE {
            return Err(Exception::InitCodeSizeExceeded.into());
        }
        let words = size.div_ceil(32) as u64;
        let mut charge = cost(fork, Cost::Create) + cost(fork, Cost::InitCodeWord) * words;
        if create2 {
            charge += cost(fork, Cost::KeccakWord) * words;
        }
        frame.gas.sub(charge)?;
        frame.expand(fork, offset, size)?;
        let init = frame.memory.read(offset, size);
        frame.ret.clear();

        let account = self.storage.account(&this).await?;
        if message.depth + 1 > CALL_DEPTH_LIMIT
            || account.balance < value
            || account.nonce == u64::MAX
        {
            tracing::debug!("CREATE: soft failure at depth={}", message.depth);
            frame.push(Word::zero())?;
            return Ok(Control::Continue);
        }

        let child_gas = all_but_one_64th(frame.gas.remaining());
        frame.gas.sub(child_gas)?;
        let child = Message {
            caller: this,
            to: None,
            code_address: None,
            value,
            data: Vec::new(),
            code: init,
            gas_limit: child_gas,
            depth: message.depth + 1,
            is_static: false,
            salt,
            selfdestruct: frame.selfdestruct.clone(),
        };
        let kind = if create2 {
            CallType::Create2
        } else {
            CallType::Create
        };
        Ok(Control::Call(Box::new(Call {
            message: child,
            kind,
            resume: Resume {
                gas: child_gas,
                target: Target::Create,
                step: None,
            },
        })))
    }

    async fn selfdestruct(&mut self, frame: &mut Frame, this: &Address) -> Result<(), Interrupt> {
        let fork = self.fork;
        let beneficiary = frame.pop_address()?;

        let mut charge = cost(fork, Cost::SelfDestruct);
        if fork.has_access_lists() && self.warm_addresses.insert(beneficiary) {
            self.journal.push(Change::WarmAddress(beneficiary));
            charge += cost(fork, Cost::ColdAccountAccess);
        }
        let balance = self.storage.account(this).await?.balance;
        if !balance.is_zero() && self.storage.account(&beneficiary).await?.is_empty() {
            charge += cost(fork, Cost::NewAccount);
        }
        frame.gas.sub(charge)?;

        if !frame.selfdestruct.contains(this) {
            frame.refund += cost(fork, Cost::SelfDestructRefund) as i64;
        }
        if beneficiary != *this && !balance.is_zero() {
            self.transfer(this, &beneficiary, &balance).await?;
        }
        frame.selfdestruct.insert(*this);
        Ok(())
    }

    /// Access surcharge for `address`, marking it warm.
    fn access_address(&mut self, address: &Address) -> u64 {
        if !self.fork.has_access_lists() {
            return 0;
        }
        if self.warm_addresses.insert(*address) {
            self.journal.push(Change::WarmAddress(*address));
            cost(self.fork, Cost::ColdAccountAccess)
        } else {
            cost(self.fork, Cost::WarmAccess)
        }
    }

    /// Marks the slot warm, returning whether it was cold.
    fn access_slot(&mut self, address: &Address, key: &Word) -> bool {
        let cold = self.warm_slots.insert((*address, *key));
        if cold {
            self.journal.push(Change::WarmSlot(*address, *key));
        }
        cold
    }

    /// Moves `value` between accounts; `false` when the sender cannot pay.
    async fn transfer(&mut self, from: &Address, to: &Address, value: &Word) -> eyre::Result<bool> {
        if value.is_zero() {
            return Ok(true);
        }
        let mut sender = self.storage.account(from).await?;
        let Some(balance) = sender.balance.checked_sub(*value) else {
            return Ok(false);
        };
        if from == to {
            return Ok(true);
        }
        sender.balance = balance;
        self.put_account(from, sender).await?;

        let mut recipient = self.storage.account(to).await?;
        let (balance, _) = recipient.balance.overflowing_add(*value);
        recipient.balance = balance;
        self.put_account(to, recipient).await?;
        Ok(true)
    }

    async fn put_account(&mut self, address: &Address, account: Account) -> eyre::Result<()> {
        let previous = self.storage.account(address).await?;
        self.journal.push(Change::Account(*address, previous));
        self.storage.put_account(address, account).await
    }

    async fn put_code(&mut self, address: &Address, code: Vec<u8>) -> eyre::Result<()> {
        let previous = self.storage.code(address).await?;
        self.journal.push(Change::Code(*address, previous));
        self.storage.put_code(address, code).await
    }

    async fn put_storage(&mut self, address: &Address, key: Word, val: Word) -> eyre::Result<()> {
        let previous = self.storage.get(address, &key).await?;
        self.journal.push(Change::Storage(*address, key, previous));
        self.storage.put(address, key, val).await
    }

    /// Undoes every change recorded after `checkpoint`, newest first.
    async fn rollback(&mut self, checkpoint: usize) -> eyre::Result<()> {
        if checkpoint >= self.journal.len() {
            return Ok(());
        }
        let changes = self.journal.split_off(checkpoint);
        tracing::trace!("ROLLBACK: {} changes", changes.len());
        for change in changes.into_iter().rev() {
            match change {
                Change::Account(address, account) => {
                    self.storage.put_account(&address, account).await?;
                }
                Change::Code(address, code) => {
                    self.storage.put_code(&address, code).await?;
                }
                Change::Storage(address, key, val) => {
                    self.storage.put(&address, key, val).await?;
                }
                Change::Transient(address, key, val) => {
                    if val.is_zero() {
                        self.transient.remove(&(address, key));
                    } else {
                        self.transient.insert((address, key), val);
                    }
                }
                Change::WarmAddress(address) => {
                    self.warm_addresses.remove(&address);
                }
                Change::WarmSlot(address, key) => {
                    self.warm_slots.remove(&(address, key));
                }
            }
        }
        Ok(())
    }
}
