//! The slice of the (out-of-scope) host object model this core consumes: a data directory for
//! per-process log files, and the CPU/tracker counters that [`crate::cpu::CpuAccounting`] feeds
//! (SPEC_FULL.md §1, §4.4).
use std::path::Path;

use crate::scheduler::SimulationTime;

pub trait Host {
    /// Human-readable host name, used to build a process's `"{host}.{exe}.{pid}"` name.
    fn name(&self) -> &str;

    /// Directory under which per-process stdout/stderr log files are created.
    fn data_dir(&self) -> &Path;

    /// Adds `delay` virtual-time ticks to the host's CPU model, per §4.4.
    fn cpu_add_delay(&self, delay: SimulationTime);

    /// Adds `delay` virtual-time ticks to the host tracker's processing-time counter, per §4.4.
    fn tracker_add_processing_time(&self, delay: SimulationTime);
}
