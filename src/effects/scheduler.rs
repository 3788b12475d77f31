//! Per-device pulse scheduler
//!
//! Each device key owns at most one live job. A job is a tokio task that
//! ticks at a fixed period, alternating between a low and a high intensity,
//! until its deadline passes and it leaves the light at a steady level.
//!
//! Every transition for a key happens with the job map locked: `start` and
//! `stop` remove and abort the previous job, and a tick only emits a command
//! after confirming (under the same lock) that its generation is still the
//! registered one. Once `stop` or a superseding `start` returns, the old job
//! can never emit again. The lock is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use super::theme::{HIGH_LEVEL, LOW_LEVEL, STEADY_LEVEL, Theme};
use crate::devices::{DeviceCommand, SharedTransport, spawn_best_effort};

/// Shortest accepted toggle period
const MIN_PERIOD: Duration = Duration::from_millis(1);

type JobMap = Arc<Mutex<HashMap<String, EffectJob>>>;

/// Snapshot of a running job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
    pub theme: Theme,
    pub started_at: Instant,
    pub deadline: Instant,
    pub period: Duration,
}

struct EffectJob {
    generation: u64,
    info: JobInfo,
    timer: JoinHandle<()>,
    /// Prepare sequence and most recent tick command still in flight
    in_flight: Vec<AbortHandle>,
}

impl EffectJob {
    fn cancel(self) {
        self.timer.abort();
        for send in self.in_flight {
            send.abort();
        }
    }
}

/// Owns the active animation job for every device key
pub struct EffectScheduler {
    transport: SharedTransport,
    jobs: JobMap,
    next_generation: AtomicU64,
}

impl EffectScheduler {
    /// Create a scheduler that drives devices through `transport`
    #[must_use]
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Start pulsing a device, replacing any job already running for it
    ///
    /// Returns immediately; the animation runs in the background until
    /// `duration` elapses. The preparatory "power on, colour mode" commands
    /// are best-effort: a failure there does not abort the animation.
    pub fn start(
        &self,
        device_id: &str,
        theme: Theme,
        duration: Duration,
        period: Duration,
    ) -> JobInfo {
        let period = period.max(MIN_PERIOD);
        let started_at = Instant::now();
        let info = JobInfo {
            theme,
            started_at,
            deadline: started_at + duration,
            period,
        };
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut jobs = lock(&self.jobs);
        if let Some(previous) = jobs.remove(device_id) {
            tracing::debug!(device_id, "superseding running effect");
            previous.cancel();
        }

        let prepare = spawn_best_effort(
            self.transport.clone(),
            device_id.to_string(),
            vec![
                vec![DeviceCommand::switch_led(true)],
                vec![DeviceCommand::colour_mode()],
            ],
            "prepare",
        );

        let timer = tokio::spawn(run_pulse(
            self.jobs.clone(),
            self.transport.clone(),
            device_id.to_string(),
            generation,
            info,
        ));

        jobs.insert(
            device_id.to_string(),
            EffectJob {
                generation,
                info,
                timer,
                in_flight: vec![prepare.abort_handle()],
            },
        );
        drop(jobs);

        tracing::info!(
            device_id,
            theme = %theme,
            duration = ?duration,
            period = ?period,
            "effect started"
        );
        info
    }

    /// Cancel the job for a device, if any
    ///
    /// Does not change the device state; callers send an explicit off
    /// command when the light should go dark. Returns whether a job existed.
    pub fn stop(&self, device_id: &str) -> bool {
        let Some(job) = lock(&self.jobs).remove(device_id) else {
            return false;
        };
        job.cancel();
        tracing::debug!(device_id, "effect stopped");
        true
    }

    /// Whether a job is running for the device
    #[must_use]
    pub fn is_active(&self, device_id: &str) -> bool {
        lock(&self.jobs).contains_key(device_id)
    }

    /// Snapshot of the job running for the device
    #[must_use]
    pub fn job(&self, device_id: &str) -> Option<JobInfo> {
        lock(&self.jobs).get(device_id).map(|job| job.info)
    }

    /// Device keys with a running job
    #[must_use]
    pub fn active_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = lock(&self.jobs).keys().cloned().collect();
        devices.sort_unstable();
        devices
    }

    /// Cancel every job
    pub fn shutdown(&self) {
        let drained: Vec<EffectJob> = lock(&self.jobs).drain().map(|(_, job)| job).collect();
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "cancelling running effects");
        }
        for job in drained {
            job.cancel();
        }
    }
}

impl Drop for EffectScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EffectScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScheduler")
            .field("provider", &self.transport.provider())
            .field("active", &self.active_devices())
            .finish_non_exhaustive()
    }
}

enum Tick {
    Continue,
    Finished,
}

async fn run_pulse(
    jobs: JobMap,
    transport: SharedTransport,
    device_id: String,
    generation: u64,
    info: JobInfo,
) {
    let mut ticker = tokio::time::interval_at(info.started_at + info.period, info.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut dim = false;

    loop {
        ticker.tick().await;
        match tick(&jobs, &transport, &device_id, generation, info, &mut dim) {
            Tick::Continue => {}
            Tick::Finished => return,
        }
    }
}

/// One timer firing; runs entirely under the job map lock
fn tick(
    jobs: &JobMap,
    transport: &SharedTransport,
    device_id: &str,
    generation: u64,
    info: JobInfo,
    dim: &mut bool,
) -> Tick {
    let mut jobs = lock(jobs);
    let Some(job) = jobs.get_mut(device_id).filter(|job| job.generation == generation) else {
        // Superseded or stopped between the timer firing and taking the lock
        return Tick::Finished;
    };

    if Instant::now() >= info.deadline {
        jobs.remove(device_id);
        spawn_best_effort(
            transport.clone(),
            device_id.to_string(),
            vec![vec![DeviceCommand::colour(info.theme.at(STEADY_LEVEL))]],
            "steady",
        );
        tracing::debug!(device_id, "effect reached deadline");
        return Tick::Finished;
    }

    *dim = !*dim;
    let level = if *dim { LOW_LEVEL } else { HIGH_LEVEL };
    let send = spawn_best_effort(
        transport.clone(),
        device_id.to_string(),
        vec![vec![DeviceCommand::colour(info.theme.at(level))]],
        "tick",
    );
    job.in_flight.retain(|handle| !handle.is_finished());
    job.in_flight.push(send.abort_handle());
    Tick::Continue
}

fn lock(jobs: &Mutex<HashMap<String, EffectJob>>) -> MutexGuard<'_, HashMap<String, EffectJob>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}
