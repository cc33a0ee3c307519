//! Reference interpreter for the PowerPC 603e core.
//!
//! Every opcode this workspace supports executes here in plain Rust, instruction by
//! instruction, against an [`ArchState`] and a [`MemoryBus`]. The JIT crate calls back
//! into these same functions for the paths it does not inline into generated x86 (`OE`-
//! suffixed arithmetic, floating point, CR logicals, and cold SPR access), and the test
//! suite uses [`step`] directly as the oracle a translated block's output is checked
//! against.

pub mod control;
pub mod decode;
pub mod float;
pub mod integer;
pub mod memory;
pub mod step;
pub mod system;

pub use step::{step, StepOutcome};
pub use system::Exception;
