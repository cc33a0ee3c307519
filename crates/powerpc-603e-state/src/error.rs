use std::fmt;

use crate::model::CpuModel;

/// Errors detected before any guest code has run, and therefore reportable through a
/// normal `Result` rather than a fatal abort.
///
/// Every other failure category the DRC can encounter (code-cache overflow, invalid
/// opcode, fetch from an unmapped region, unknown SPR access) can only be detected once
/// compiled code is already executing, with no caller left to hand a `Result` back to;
/// those go through [`crate::fatal`] instead.
#[derive(Debug)]
pub enum DrcError {
    UnsupportedPllConfiguration {
        model: CpuModel,
        bus_frequency: u8,
        bus_multiplier: u8,
    },
    CodeCacheAllocation(std::io::Error),
}

impl fmt::Display for DrcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedPllConfiguration { model, bus_frequency, bus_multiplier } => write!(
                f,
                "invalid bus/multiplier combination for {model:?} (bus frequency = {bus_frequency}, multiplier byte = {bus_multiplier:#04x})"
            ),
            Self::CodeCacheAllocation(err) => write!(f, "failed to allocate executable code cache: {err}"),
        }
    }
}

impl std::error::Error for DrcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CodeCacheAllocation(err) => Some(err),
            Self::UnsupportedPllConfiguration { .. } => None,
        }
    }
}

/// Emits a `tracing::error!` event carrying the same text as the abort, then terminates
/// the process. Used for the architectural-grade failures described in the crate's error
/// handling design: once compiled code or an interpreter helper is already running against
/// a live [`crate::ArchState`], there is no caller to unwind a `Result` to.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!("{message}");
        eprintln!("fatal: {message}");
        std::process::abort();
    }};
}
