pub mod common;
pub mod decoder;
pub mod gas;
pub mod interpreter;
pub mod memory;
pub mod message;
pub mod opcodes;
pub mod precompiles;
pub mod state;
pub mod storage;
pub mod tracer;
pub mod vm;

pub use gas::Fork;
pub use interpreter::{Exception, Interpreter, VmError};
pub use message::{ExecutionResult, Halt, Message, Outcome, TxContext};
pub use precompiles::{CurveOps, PrecompileSet};
pub use state::{MemoryState, StateManager};
pub use vm::{RunCodeOpts, Vm};
