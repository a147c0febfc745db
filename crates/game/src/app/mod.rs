mod bootstrap;
mod dev_thruport;
mod loop_runner;
mod runtime;

use std::process::ExitCode;

use tracing::error;

pub use bootstrap::BootstrapError;

/// Boots the headless game from the environment and runs it until quit.
pub fn run_from_env() -> ExitCode {
    match bootstrap::build_app() {
        Ok(app) => loop_runner::run(app),
        Err(err) => {
            error!(error = %err, "startup_failed");
            eprintln!("startup failed: {err}");
            ExitCode::FAILURE
        }
    }
}
