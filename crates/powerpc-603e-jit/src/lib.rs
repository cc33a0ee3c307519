//! Dynamic recompiler: translates guest PowerPC 603e instructions to host x86-32 code,
//! dispatches between translated blocks, and runs the scheduler loop that ties cycle
//! accounting to the guest timebase/decrementer.
//!
//! This crate owns everything downstream of "decode one instruction" — that part is
//! shared with the plain interpreter in `powerpc-603e-interp`, which this crate calls
//! back into for every opcode category the translator does not inline (see
//! [`translator`]'s module docs). What's unique here is the two-level dispatch table
//! ([`dispatch`]), the block compiler that walks guest code and emits host code
//! ([`block`], [`translator`]), the pre-compiled exception-entry stubs ([`prologue`]),
//! and the scheduler that ties cycle budgets to the guest timebase ([`scheduler`]).

pub mod block;
pub mod dispatch;
pub mod helpers;
pub mod prologue;
pub mod scheduler;
pub mod translator;

pub use block::{BlockCompiler, CompileError, CompiledBlock};
pub use dispatch::{DispatchTables, Slot};
pub use prologue::ExceptionPrologues;
pub use scheduler::{BlockRunner, NativeBlockRunner, QuantumOutcome, Scheduler};
pub use translator::Translator;
