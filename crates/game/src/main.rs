use std::process::ExitCode;

fn main() -> ExitCode {
    game::app::run_from_env()
}
