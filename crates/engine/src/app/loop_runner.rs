use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::metrics::MetricsAccumulator;
use super::MetricsHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// A fixed-timestep simulation driven by [`run_headless`].
pub trait Simulation {
    /// Advances the simulation by exactly one fixed step.
    fn tick(&mut self, dt_ms: u64);

    /// Runs once per loop iteration before any ticks, e.g. to drain console input.
    fn poll(&mut self) -> LoopControl {
        LoopControl::Continue
    }

    fn shutdown(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    /// Stop after this many ticks; `None` runs until the simulation asks to exit.
    pub max_total_ticks: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 20,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(5),
            max_total_ticks: None,
        }
    }
}

impl LoopConfig {
    pub fn fixed_dt_ms(&self) -> u64 {
        (1000 / self.target_tps.max(1) as u64).max(1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks_run: u64,
    pub dropped_backlog: Duration,
}

pub fn run_headless<S: Simulation>(
    config: &LoopConfig,
    simulation: &mut S,
    metrics_handle: &MetricsHandle,
) -> LoopSummary {
    let fixed_dt_ms = config.fixed_dt_ms();
    let fixed_dt = Duration::from_millis(fixed_dt_ms);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(5));

    info!(
        target_tps = config.target_tps.max(1),
        fixed_dt_ms,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        max_total_ticks = ?config.max_total_ticks,
        "loop_config"
    );

    let mut summary = LoopSummary::default();
    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut metrics_accumulator = MetricsAccumulator::new(metrics_log_interval);

    'frames: loop {
        if simulation.poll() == LoopControl::Exit {
            info!(reason = "simulation_request", "shutdown_requested");
            break;
        }

        let now = Instant::now();
        let raw_frame_dt = now.saturating_duration_since(last_frame_instant);
        last_frame_instant = now;
        accumulator = accumulator.saturating_add(clamp_frame_delta(raw_frame_dt, max_frame_delta));

        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        for _ in 0..step_plan.ticks_to_run {
            if tick_limit_reached(config.max_total_ticks, summary.ticks_run) {
                info!(ticks_run = summary.ticks_run, "tick_limit_reached");
                break 'frames;
            }
            let tick_start = Instant::now();
            simulation.tick(fixed_dt_ms);
            metrics_accumulator.record_tick(tick_start.elapsed());
            summary.ticks_run = summary.ticks_run.saturating_add(1);
        }
        accumulator = step_plan.remaining_accumulator;

        if step_plan.dropped_backlog > Duration::ZERO {
            summary.dropped_backlog = summary
                .dropped_backlog
                .saturating_add(step_plan.dropped_backlog);
            metrics_accumulator.record_dropped_backlog(step_plan.dropped_backlog);
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "sim_clamp_triggered"
            );
        }

        if let Some(snapshot) = metrics_accumulator.maybe_snapshot(Instant::now()) {
            metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                tick_time_ms = snapshot.tick_time_ms,
                total_ticks = snapshot.total_ticks,
                "loop_metrics"
            );
        }

        let idle = compute_idle_sleep(accumulator, fixed_dt);
        if idle > Duration::ZERO {
            thread::sleep(idle);
        }
    }

    simulation.shutdown();
    info!(ticks_run = summary.ticks_run, "shutdown");
    summary
}

fn tick_limit_reached(limit: Option<u64>, ticks_run: u64) -> bool {
    limit.is_some_and(|max| ticks_run >= max)
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn compute_idle_sleep(accumulator: Duration, fixed_dt: Duration) -> Duration {
    fixed_dt.saturating_sub(accumulator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSim {
        ticks: u64,
        elapsed_ms: u64,
        exit_after: Option<u64>,
        shut_down: bool,
    }

    impl Simulation for CountingSim {
        fn tick(&mut self, dt_ms: u64) {
            self.ticks += 1;
            self.elapsed_ms += dt_ms;
        }

        fn poll(&mut self) -> LoopControl {
            match self.exit_after {
                Some(limit) if self.ticks >= limit => LoopControl::Exit,
                _ => LoopControl::Continue,
            }
        }

        fn shutdown(&mut self) {
            self.shut_down = true;
        }
    }

    fn fast_config() -> LoopConfig {
        LoopConfig {
            target_tps: 1000,
            ..LoopConfig::default()
        }
    }

    #[test]
    fn clamp_frame_delta_caps_large_frame() {
        let max_frame_delta = Duration::from_millis(250);
        assert_eq!(
            clamp_frame_delta(Duration::from_millis(600), max_frame_delta),
            max_frame_delta
        );
    }

    #[test]
    fn plan_sim_steps_runs_expected_ticks_without_drop() {
        let result = plan_sim_steps(Duration::from_millis(150), Duration::from_millis(50), 5);

        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::ZERO);
    }

    #[test]
    fn plan_sim_steps_drops_backlog_when_tick_cap_hit() {
        let result = plan_sim_steps(Duration::from_millis(400), Duration::from_millis(50), 3);

        assert_eq!(result.ticks_to_run, 3);
        assert_eq!(result.remaining_accumulator, Duration::ZERO);
        assert_eq!(result.dropped_backlog, Duration::from_millis(250));
    }

    #[test]
    fn fixed_dt_is_whole_milliseconds_and_never_zero() {
        assert_eq!(LoopConfig::default().fixed_dt_ms(), 50);
        let config = LoopConfig {
            target_tps: 5000,
            ..LoopConfig::default()
        };
        assert_eq!(config.fixed_dt_ms(), 1);
        let config = LoopConfig {
            target_tps: 0,
            ..LoopConfig::default()
        };
        assert_eq!(config.fixed_dt_ms(), 1000);
    }

    #[test]
    fn idle_sleep_waits_only_for_the_missing_part_of_a_step() {
        let fixed = Duration::from_millis(50);
        assert_eq!(compute_idle_sleep(Duration::from_millis(20), fixed), Duration::from_millis(30));
        assert_eq!(compute_idle_sleep(Duration::from_millis(70), fixed), Duration::ZERO);
    }

    #[test]
    fn run_headless_stops_at_tick_limit_and_shuts_down() {
        let config = LoopConfig {
            max_total_ticks: Some(4),
            ..fast_config()
        };
        let mut sim = CountingSim::default();
        let summary = run_headless(&config, &mut sim, &MetricsHandle::default());

        assert_eq!(summary.ticks_run, 4);
        assert_eq!(sim.ticks, 4);
        assert_eq!(sim.elapsed_ms, 4);
        assert!(sim.shut_down);
    }

    #[test]
    fn run_headless_honors_simulation_exit_request() {
        let mut sim = CountingSim {
            exit_after: Some(2),
            ..CountingSim::default()
        };
        let summary = run_headless(&fast_config(), &mut sim, &MetricsHandle::default());

        assert!(summary.ticks_run >= 2);
        assert!(sim.shut_down);
    }
}
