//! The pausable experiment run loop.

use crate::core::{CaptureSource, MotionDevice, WellPoint};
use crate::error::{AppResult, ScanError};
use crate::experiment::ExperimentRecord;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Idle cadence while paused or waiting at a boundary.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Budget for the per-well motion-complete barrier. Matches the worst-case
/// command timeout so a stuck stage fails the run instead of hanging it.
const MOTION_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runner lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Configured,
    Running,
    Paused,
    Stopped,
    Completed,
    Errored,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Idle => "Idle",
            RunStatus::Configured => "Configured",
            RunStatus::Running => "Running",
            RunStatus::Paused => "Paused",
            RunStatus::Stopped => "Stopped",
            RunStatus::Completed => "Completed",
            RunStatus::Errored => "Errored",
        };
        write!(f, "{}", name)
    }
}

/// Parameters for one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Imaging path in visit order
    pub path: Vec<WellPoint>,
    /// Dwell at each well before capture
    pub pause_time: Duration,
    /// Overall run budget; iterations repeat until it is exhausted
    pub duration: Duration,
    /// Output directory (created on configure; parent must exist)
    pub save_folder: PathBuf,
    /// Image filename prefix ("" for none)
    pub file_prefix: String,
    /// Image extension handed to the encoder ("jpg", "png")
    pub image_format: String,
}

/// Status line sink.
pub type StatusSink = Box<dyn Fn(&str) + Send + Sync>;
/// Progress sink: (completed iterations, estimated total).
pub type ProgressSink = Box<dyn Fn(u32, u32) + Send + Sync>;
/// Error sink; invoked at most once per run.
pub type ErrorSink = Box<dyn Fn(&str) + Send + Sync>;

/// Notification sinks. The runner makes no assumptions about consumers;
/// a GUI wires these to widgets, tests wire them to counters.
#[derive(Default)]
pub struct Callbacks {
    pub status: Option<StatusSink>,
    pub progress: Option<ProgressSink>,
    pub error: Option<ErrorSink>,
}

struct Shared {
    status: Mutex<RunStatus>,
    pause_flag: AtomicBool,
    stop_flag: AtomicBool,
    current_iteration: AtomicU32,
    total_iterations: AtomicU32,
    callbacks: Mutex<Callbacks>,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new(RunStatus::Idle),
            pause_flag: AtomicBool::new(false),
            stop_flag: AtomicBool::new(false),
            current_iteration: AtomicU32::new(0),
            total_iterations: AtomicU32::new(0),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    async fn notify_status(&self, status: RunStatus) {
        if let Some(callback) = self.callbacks.lock().await.status.as_ref() {
            callback(&status.to_string());
        }
    }

    async fn set_status(&self, status: RunStatus) {
        *self.status.lock().await = status;
        self.notify_status(status).await;
    }

    async fn emit_progress(&self, current: u32) {
        let total = self.total_iterations.load(Ordering::SeqCst);
        if let Some(callback) = self.callbacks.lock().await.progress.as_ref() {
            callback(current, total);
        }
    }

    async fn emit_error(&self, message: &str) {
        if let Some(callback) = self.callbacks.lock().await.error.as_ref() {
            callback(message);
        }
    }
}

/// Long-running plate imaging job.
///
/// The run loop executes on an independent tokio task so callers never
/// block; control flows through cooperative flags and the status mutex.
pub struct ExperimentRunner {
    motion: Arc<Mutex<Box<dyn MotionDevice>>>,
    capture: Arc<Mutex<Box<dyn CaptureSource>>>,
    shared: Arc<Shared>,
    config: Option<RunConfig>,
    task_handle: Option<JoinHandle<()>>,
}

impl ExperimentRunner {
    /// Build a runner over the given hardware seams.
    pub fn new(motion: Box<dyn MotionDevice>, capture: Box<dyn CaptureSource>) -> Self {
        Self {
            motion: Arc::new(Mutex::new(motion)),
            capture: Arc::new(Mutex::new(capture)),
            shared: Arc::new(Shared::new()),
            config: None,
            task_handle: None,
        }
    }

    /// Install notification sinks. Replaces any previous set.
    pub async fn set_callbacks(&self, callbacks: Callbacks) {
        *self.shared.callbacks.lock().await = callbacks;
    }

    /// Current lifecycle state.
    pub async fn status(&self) -> RunStatus {
        *self.shared.status.lock().await
    }

    /// (completed iterations, estimated total). The total is
    /// duration / pause_time, for display only.
    pub fn progress(&self) -> (u32, u32) {
        (
            self.shared.current_iteration.load(Ordering::SeqCst),
            self.shared.total_iterations.load(Ordering::SeqCst),
        )
    }

    /// Validate and persist a run configuration.
    ///
    /// Creates the save folder, writes `experiment_config.json`, and moves
    /// to `Configured`. Fails with the first violated constraint; a failed
    /// configure leaves the previous configuration untouched.
    pub async fn configure(&mut self, config: RunConfig) -> AppResult<()> {
        {
            let status = *self.shared.status.lock().await;
            if status == RunStatus::Running || status == RunStatus::Paused {
                return Err(ScanError::Configuration(
                    "cannot reconfigure while a run is active".to_string(),
                ));
            }
        }

        if config.path.is_empty() {
            return Err(ScanError::Configuration("path is empty".to_string()));
        }
        if config.pause_time.is_zero() {
            return Err(ScanError::Configuration(
                "pause_time must be positive".to_string(),
            ));
        }
        if config.duration.is_zero() {
            return Err(ScanError::Configuration(
                "duration must be positive".to_string(),
            ));
        }
        if let Some(parent) = config.save_folder.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ScanError::Configuration(format!(
                    "save folder parent '{}' does not exist",
                    parent.display()
                )));
            }
        }

        std::fs::create_dir_all(&config.save_folder)?;

        let record = ExperimentRecord {
            path_points: config.path.clone(),
            pause_time: config.pause_time.as_secs_f64(),
            duration: config.duration.as_secs_f64(),
            file_prefix: config.file_prefix.clone(),
            timestamp: Utc::now(),
        };
        record.save(&config.save_folder)?;

        info!(
            "Configured run: {} wells, dwell {:?}, budget {:?}, saving to {}",
            config.path.len(),
            config.pause_time,
            config.duration,
            config.save_folder.display()
        );

        self.config = Some(config);
        self.shared.current_iteration.store(0, Ordering::SeqCst);
        self.shared.total_iterations.store(0, Ordering::SeqCst);
        self.shared.set_status(RunStatus::Configured).await;
        Ok(())
    }

    /// Launch the run loop. No-op (with a warning) when already running;
    /// terminal states require a fresh `configure` first.
    pub async fn start(&mut self) -> AppResult<()> {
        {
            let status = *self.shared.status.lock().await;
            match status {
                RunStatus::Running | RunStatus::Paused => {
                    warn!("Run already in progress; start ignored");
                    return Ok(());
                }
                RunStatus::Configured => {}
                other => {
                    return Err(ScanError::Run(format!(
                        "cannot start from state {}; configure a run first",
                        other
                    )));
                }
            }
        }

        let config = self
            .config
            .clone()
            .ok_or_else(|| ScanError::Run("runner is not configured".to_string()))?;

        let total = (config.duration.as_secs_f64() / config.pause_time.as_secs_f64())
            .floor()
            .max(1.0) as u32;
        self.shared.stop_flag.store(false, Ordering::SeqCst);
        self.shared.pause_flag.store(false, Ordering::SeqCst);
        self.shared.current_iteration.store(0, Ordering::SeqCst);
        self.shared.total_iterations.store(total, Ordering::SeqCst);
        self.shared.set_status(RunStatus::Running).await;

        info!("Run started: {} wells per iteration", config.path.len());

        let motion = Arc::clone(&self.motion);
        let capture = Arc::clone(&self.capture);
        let shared = Arc::clone(&self.shared);
        self.task_handle = Some(tokio::spawn(run_loop(motion, capture, config, shared)));
        Ok(())
    }

    /// Request a pause. Takes effect at the next well-visit boundary; the
    /// in-flight visit always completes.
    pub async fn pause(&self) {
        let mut status = self.shared.status.lock().await;
        if *status == RunStatus::Running {
            self.shared.pause_flag.store(true, Ordering::SeqCst);
            *status = RunStatus::Paused;
            drop(status);
            self.shared.notify_status(RunStatus::Paused).await;
            info!("Run paused");
        }
    }

    /// Resume a paused run.
    pub async fn resume(&self) {
        let mut status = self.shared.status.lock().await;
        if *status == RunStatus::Paused {
            self.shared.pause_flag.store(false, Ordering::SeqCst);
            *status = RunStatus::Running;
            drop(status);
            self.shared.notify_status(RunStatus::Running).await;
            info!("Run resumed");
        }
    }

    /// Request a stop. Cooperative: the loop finishes the in-flight visit,
    /// then transitions to `Stopped`. Idempotent; stopping a runner that is
    /// not running does nothing and emits no callbacks.
    pub async fn stop(&self) {
        let status = *self.shared.status.lock().await;
        if status == RunStatus::Running || status == RunStatus::Paused {
            info!("Stop requested");
            self.shared.stop_flag.store(true, Ordering::SeqCst);
            self.shared.pause_flag.store(false, Ordering::SeqCst);
        }
    }

    /// Wait for the run task to finish. Intended for tests and shutdown.
    pub async fn join(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn run_loop(
    motion: Arc<Mutex<Box<dyn MotionDevice>>>,
    capture: Arc<Mutex<Box<dyn CaptureSource>>>,
    config: RunConfig,
    shared: Arc<Shared>,
) {
    let started = Instant::now();

    loop {
        if shared.stop_flag.load(Ordering::SeqCst) {
            info!("Run stopped");
            shared.set_status(RunStatus::Stopped).await;
            return;
        }
        if started.elapsed() >= config.duration {
            info!("Run completed: duration budget exhausted");
            shared.set_status(RunStatus::Completed).await;
            return;
        }
        if shared.pause_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(PAUSE_POLL).await;
            continue;
        }

        let iteration = shared.current_iteration.load(Ordering::SeqCst);
        for point in &config.path {
            // Boundary: honor pause/stop between visits, never within one.
            while shared.pause_flag.load(Ordering::SeqCst)
                && !shared.stop_flag.load(Ordering::SeqCst)
            {
                tokio::time::sleep(PAUSE_POLL).await;
            }
            if shared.stop_flag.load(Ordering::SeqCst) {
                info!("Run stopped");
                shared.set_status(RunStatus::Stopped).await;
                return;
            }

            if let Err(cause) = visit_well(&motion, &capture, &config, point, iteration).await {
                warn!("Run failed: {}", cause);
                shared.set_status(RunStatus::Errored).await;
                shared.emit_error(&cause).await;
                return;
            }
        }

        let completed = shared.current_iteration.fetch_add(1, Ordering::SeqCst) + 1;
        shared.emit_progress(completed).await;
        debug!("Iteration {} complete", completed);
    }
}

/// One well visit: move, settle, dwell, capture, persist.
///
/// Any failure aborts the run with a human-readable cause.
async fn visit_well(
    motion: &Arc<Mutex<Box<dyn MotionDevice>>>,
    capture: &Arc<Mutex<Box<dyn CaptureSource>>>,
    config: &RunConfig,
    point: &WellPoint,
    iteration: u32,
) -> Result<(), String> {
    let target = point.position;

    let accepted = motion
        .lock()
        .await
        .move_to(target.x, target.y, target.z)
        .await
        .map_err(|e| format!("Motion failure at well {}: {:#}", point.well, e))?;
    if !accepted {
        return Err(format!("Stage rejected move to well {}", point.well));
    }

    motion
        .lock()
        .await
        .wait_motion_complete(MOTION_SETTLE_TIMEOUT)
        .await
        .map_err(|e| format!("Motion did not settle at well {}: {:#}", point.well, e))?;

    tokio::time::sleep(config.pause_time).await;

    let frame = capture
        .lock()
        .await
        .grab_frame()
        .await
        .ok_or_else(|| format!("Frame grab failed at well {}", point.well))?;

    let filename = image_filename(
        &config.file_prefix,
        &point.well,
        iteration,
        &frame.timestamp,
        &config.image_format,
    );
    let destination = config.save_folder.join(filename);
    frame
        .save(&destination)
        .map_err(|e| format!("Failed to write {}: {}", destination.display(), e))?;

    debug!("Captured {}", destination.display());
    Ok(())
}

/// Deterministic image name: `{well}_{iteration:04}_{timestamp}.{ext}`,
/// prefix-qualified when a prefix is configured.
fn image_filename(
    prefix: &str,
    well: &str,
    iteration: u32,
    timestamp: &DateTime<Utc>,
    extension: &str,
) -> String {
    let stamp = timestamp.format("%Y%m%d_%H%M%S");
    if prefix.is_empty() {
        format!("{}_{:04}_{}.{}", well, iteration, stamp, extension)
    } else {
        format!("{}_{}_{:04}_{}.{}", prefix, well, iteration, stamp, extension)
    }
}
