use std::process::ExitCode;

use engine::{run_headless, MetricsHandle};
use tracing::info;

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        config,
        mut runtime,
    } = app;
    let metrics = MetricsHandle::default();
    let summary = run_headless(&config, &mut runtime, &metrics);
    let snapshot = metrics.snapshot();
    info!(
        ticks_run = summary.ticks_run,
        dropped_backlog_ms = summary.dropped_backlog.as_millis() as u64,
        last_tps = snapshot.tps,
        sim_time_ms = runtime.session().now().as_ms(),
        "run_finished"
    );
    ExitCode::SUCCESS
}
