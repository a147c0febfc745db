use std::io::{self, BufRead};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use engine::{LoopControl, RemoteConsoleLinePump, Simulation};
use tracing::{info, warn};

use crate::debug::DebugConsole;
use crate::session::GameSession;

const REMOTE_STATUS_COMMAND: &str = "thruport.status";

/// Where console lines come from on the host side.
pub(crate) enum LineSource {
    Stdin(Receiver<String>),
    Closed,
}

impl LineSource {
    /// Reads stdin on a named thread so the loop never blocks on it.
    pub(crate) fn spawn_stdin() -> Self {
        let (sender, receiver) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("stdin-console".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else {
                        break;
                    };
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            });
        match spawned {
            Ok(_) => Self::Stdin(receiver),
            Err(error) => {
                warn!(error = %error, "stdin_console_spawn_failed");
                Self::Closed
            }
        }
    }

    /// Collects pending lines. Returns false once the source has hung up.
    fn drain(&mut self, out: &mut Vec<String>) -> bool {
        let Self::Stdin(receiver) = self else {
            return false;
        };
        loop {
            match receiver.try_recv() {
                Ok(line) => out.push(line),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    *self = Self::Closed;
                    return false;
                }
            }
        }
    }
}

/// Drives a [`GameSession`] from the fixed-step loop and routes console traffic.
pub(crate) struct GameRuntime<P> {
    session: GameSession,
    console: DebugConsole,
    local: LineSource,
    remote: P,
    remote_enabled: bool,
    exit_requested: bool,
    local_output: Vec<String>,
}

impl<P: RemoteConsoleLinePump> GameRuntime<P> {
    pub(crate) fn new(
        session: GameSession,
        console: DebugConsole,
        local: LineSource,
        remote: P,
        remote_enabled: bool,
    ) -> Self {
        Self {
            session,
            console,
            local,
            remote,
            remote_enabled,
            exit_requested: false,
            local_output: Vec::new(),
        }
    }

    pub(crate) fn session(&self) -> &GameSession {
        &self.session
    }

    /// Output produced for the local console since the last call.
    pub(crate) fn take_local_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.local_output)
    }

    fn pump_local(&mut self) {
        let mut lines = Vec::new();
        let open = self.local.drain(&mut lines);
        for line in lines {
            let reply = self.console.handle_line(&mut self.session, &line);
            self.local_output.extend(reply.lines);
            self.exit_requested |= reply.quit;
        }
        if !open && !self.remote_enabled && !self.exit_requested {
            info!("local_console_closed");
            self.exit_requested = true;
        }
    }

    fn pump_remote(&mut self) {
        let mut lines = Vec::new();
        self.remote.poll_lines(&mut lines);
        for line in lines {
            if line.trim() == REMOTE_STATUS_COMMAND {
                let status = self.remote.status_line();
                self.remote.send_output_lines(&[status]);
                continue;
            }
            let reply = self.console.handle_line(&mut self.session, &line);
            self.remote.send_output_lines(&reply.lines);
            self.exit_requested |= reply.quit;
        }
        if self.remote.take_disconnect_reset_requested() {
            info!("remote_console_reset");
        }
    }
}

impl<P: RemoteConsoleLinePump> Simulation for GameRuntime<P> {
    fn tick(&mut self, dt_ms: u64) {
        self.session.update(dt_ms);
    }

    fn poll(&mut self) -> LoopControl {
        self.pump_local();
        self.pump_remote();
        for line in self.take_local_output() {
            println!("{line}");
        }
        if self.exit_requested {
            LoopControl::Exit
        } else {
            LoopControl::Continue
        }
    }

    fn shutdown(&mut self) {
        let state = self.session.state();
        info!(
            now_ms = self.session.now().as_ms(),
            zone = state.zones.active_zone().key(),
            "session_shutdown"
        );
    }
}
