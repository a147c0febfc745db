mod clock;
mod console;
mod loop_runner;
mod metrics;

pub use clock::{SimClock, SimInstant};
pub use console::{
    parse_arg, require_arg_count, require_no_args, tokenize_line, CommandParseError,
    ConsoleCommandRegistry, ConsoleRegistryError, RemoteConsoleLinePump,
};
pub use loop_runner::{run_headless, LoopConfig, LoopControl, LoopSummary, Simulation};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
