//! Host code generation: the x86-32 instruction emitter and the executable code cache it
//! fills. This crate has no notion of the PowerPC ISA; the translator in
//! `powerpc-603e-jit` is the only caller that knows what guest instruction a given
//! sequence of [`Emitter`] calls implements.

mod cache;
mod emitter;
mod opcode;
mod reg;

pub use cache::{CodeCache, CodeCacheError};
pub use emitter::{Emitter, JumpTarget};
pub use opcode::GenOp;
pub use reg::{Reg, Reg8, XmmReg};
