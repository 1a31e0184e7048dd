//! CPU accounting: every entry into guest code is wrapped so that the real wall-clock cost of
//! running it is converted into virtual time and pushed into the host's CPU model (SPEC_FULL.md
//! §4.4). This is the mechanism by which slow guests fall behind faster ones in virtual time.
use std::time::Instant;

use crate::host::Host;
use crate::process::Process;
use crate::scheduler::SimulationTime;

/// Virtual-time ticks charged per wall-clock second of guest execution. A real deployment would
/// make this configurable (e.g. to model a faster/slower simulated CPU); it is a constant here
/// since runtime-tunable scaling is part of the (out-of-scope) configuration-loading layer.
pub const VIRTUAL_TICKS_PER_WALL_SECOND: f64 = 1_000_000.0;

pub struct CpuAccounting;

impl CpuAccounting {
    /// Runs `f`, which must perform exactly one span of guest execution (a `thread.run`,
    /// `thread.resume`, or `thread.terminate` call), then charges the elapsed wall time against
    /// `host` and `process` before returning `f`'s result.
    pub fn time<T>(host: &dyn Host, process: &Process, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed().as_secs_f64();

        let delay = (elapsed * VIRTUAL_TICKS_PER_WALL_SECOND).round() as SimulationTime;
        host.cpu_add_delay(delay);
        host.tracker_add_processing_time(delay);
        process.add_runtime(elapsed);

        result
    }
}
