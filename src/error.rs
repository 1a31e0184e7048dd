//! Lifecycle error taxonomy (SPEC_FULL.md §7).
use std::path::PathBuf;

/// Errors that can abort process construction/start, per the "I/O fatal at start" taxonomy entry.
/// The "Configuration fatal" entries (missing executable, unknown interposition method) are
/// unrepresentable by construction instead: `Process::new` takes `exeName`/`exePath` as required,
/// non-optional arguments and panics if either is absent (SPEC_FULL.md §4.1's `new` contract), and
/// `InterposeMethod` is a closed two-variant enum with no "unknown" case to reach at runtime.
/// Guest exit codes and blocked-guest states are *not* represented here either: they are not
/// errors in the propagation sense, only in the colloquial sense used by the taxonomy's headings
/// (see SPEC_FULL.md §7).
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("process '{name}' could not open log file '{path}': {source}")]
    LogFileOpen {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("process '{name}' failed to spawn '{exe_path}': {source}")]
    Spawn {
        name: String,
        exe_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("process '{name}' ptrace supervision failed: {source}")]
    Ptrace {
        name: String,
        #[source]
        source: nix::Error,
    },
}
