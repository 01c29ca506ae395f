//! Control surface for callers outside the run thread: submit a timeline,
//! request a stop, read the status.
//!
//! A [`PuncherService`] owns the machine and is shared behind an `Arc` with
//! whatever serves requests (see [`http::HttpServer`]).

pub mod http;

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{error, info};
use serde::Serialize;

pub use http::HttpServer;

use crate::error::Result;
use crate::music::{self, Keyboard, NoteTimeline, PunchOptions};
use crate::puncher::{MusicPuncher, RunControl};

const RUN_PANICKED: &str = "run thread panicked";

/// Answer to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    Accepted,
    AlreadyActive,
}

/// Snapshot reported to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PuncherStatus {
    pub active: bool,
    pub position: i64,
    /// Fraction of the current file's holes already punched.
    pub progress: f64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// The machine plus the bookkeeping needed to run it in the background.
pub struct PuncherService {
    puncher: Arc<Mutex<MusicPuncher>>,
    control: Arc<RunControl>,
    keyboard: Keyboard,
    current_file: Mutex<Option<String>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PuncherService {
    pub fn new(puncher: MusicPuncher) -> Self {
        Self {
            control: puncher.control(),
            keyboard: puncher.keyboard().clone(),
            puncher: Arc::new(Mutex::new(puncher)),
            current_file: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn keyboard(&self) -> &Keyboard {
        &self.keyboard
    }

    /// Decode a MIDI file and fit it onto the keyboard.
    pub fn prepare(&self, midi: &[u8], options: &PunchOptions) -> Result<NoteTimeline> {
        let timeline = music::parse_midi(midi)?;
        music::prepare(&timeline, &self.keyboard, options)
    }

    /// Start punching `timeline` on a background thread unless a run is
    /// already in progress.
    pub fn submit(&self, timeline: NoteTimeline, label: Option<String>) -> Result<SubmitResult> {
        if !self.control.try_begin() {
            return Ok(SubmitResult::AlreadyActive);
        }
        info!(
            "accepted {} ({} events)",
            label.as_deref().unwrap_or("unnamed file"),
            timeline.len()
        );
        *lock(&self.current_file) = label;

        let mut worker = lock(&self.worker);
        if let Some(previous) = worker.take() {
            let _ = previous.join();
        }

        let puncher = Arc::clone(&self.puncher);
        let control = Arc::clone(&self.control);
        let spawned = thread::Builder::new()
            .name("puncher-run".into())
            .spawn(move || {
                let mut claim = RunClaim {
                    control,
                    error: None,
                };
                let result = lock(&puncher).run(&timeline);
                match result {
                    Ok(outcome) => info!("run finished: {outcome:?}"),
                    Err(e) => {
                        error!("run failed: {e}");
                        claim.error = Some(e.to_string());
                    }
                }
            });
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(SubmitResult::Accepted)
            }
            Err(e) => {
                self.control.finish(Some(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Ask the current run to stop after the hole in progress.
    pub fn stop(&self) {
        info!("stop requested");
        self.control.request_stop();
    }

    pub fn status(&self) -> PuncherStatus {
        let active = self.control.is_active();
        PuncherStatus {
            active,
            position: self.control.position(),
            progress: self.control.progress(),
            error: self.control.error(),
            file: if active {
                lock(&self.current_file).clone()
            } else {
                None
            },
        }
    }

    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }

    /// Block until the current run, if any, has finished.
    pub fn wait(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Holds the run slot for the run thread and gives it back when the thread
/// ends, also when it unwinds.
struct RunClaim {
    control: Arc<RunControl>,
    error: Option<String>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("run thread panicked");
            self.control.finish(Some(RUN_PANICKED.into()));
        } else {
            self.control.finish(self.error.take());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PuncherConfig;
    use crate::hardware::SimulatedPulseService;
    use crate::motion::PreparedMove;
    use crate::music::NoteEvent;
    use crate::puncher::{Actuator, PulseActuator, Status};

    fn fast_config() -> PuncherConfig {
        let mut config = PuncherConfig::default();
        for stepper in [&mut config.feed_stepper, &mut config.tone_stepper] {
            stepper.min_sps = 20_000.0;
            stepper.max_sps = 40_000.0;
            stepper.acceleration = 1_000_000_000.0;
        }
        config.puncher.on_length = 0.001;
        config.puncher.off_length = 0.001;
        config.cutter.on_length = 0.001;
        config.cutter.off_length = 0.001;
        config
    }

    fn service(config: PuncherConfig) -> PuncherService {
        let actuator = PulseActuator::new(SimulatedPulseService::new(5), &config).unwrap();
        PuncherService::new(MusicPuncher::new(config, Box::new(actuator)).unwrap())
    }

    fn short_timeline() -> NoteTimeline {
        NoteTimeline::new(vec![NoteEvent::new(0.0, [60]), NoteEvent::new(0.1, [64])])
    }

    #[test]
    fn idle_status() {
        let svc = service(fast_config());
        let status = svc.status();
        assert!(!status.active);
        assert_eq!(status.position, 0);
        assert_eq!(status.error, None);
        assert_eq!(status.file, None);
    }

    #[test]
    fn run_completes_in_background() {
        let svc = service(fast_config());
        let result = svc
            .submit(short_timeline(), Some("song.mid".into()))
            .unwrap();
        assert_eq!(result, SubmitResult::Accepted);
        svc.wait();
        let status = svc.status();
        assert!(!status.active);
        assert_eq!(status.error, None);
        assert_eq!(status.position, 0);
    }

    #[test]
    fn second_submit_is_rejected_while_active() {
        let mut config = fast_config();
        // a slow punch keeps the first run busy
        config.puncher.on_length = 0.2;
        let svc = service(config);
        assert_eq!(
            svc.submit(short_timeline(), Some("a.mid".into())).unwrap(),
            SubmitResult::Accepted
        );
        assert_eq!(
            svc.submit(short_timeline(), None).unwrap(),
            SubmitResult::AlreadyActive
        );
        let status = svc.status();
        assert!(status.active);
        assert_eq!(status.file.as_deref(), Some("a.mid"));
        svc.wait();
        assert!(!svc.is_active());
    }

    #[test]
    fn failed_run_reports_error() {
        let svc = service(fast_config());
        let bad = NoteTimeline::new(vec![NoteEvent::new(0.0, [61])]);
        svc.submit(bad, None).unwrap();
        svc.wait();
        let status = svc.status();
        assert!(!status.active);
        assert_eq!(status.error.as_deref(), Some("note 61 is not on the keyboard"));
    }

    /// A machine whose punch blows up.
    struct BrokenPunch;

    impl Actuator for BrokenPunch {
        fn enable(&mut self) -> Result<()> {
            Ok(())
        }
        fn disable(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_status(&mut self, _status: Status) -> Result<()> {
            Ok(())
        }
        fn has_home_sensor(&self) -> bool {
            false
        }
        fn seek_home(&mut self) -> Result<()> {
            Ok(())
        }
        fn start_move(&mut self, _prepared: &PreparedMove) -> Result<()> {
            Ok(())
        }
        fn wait_move(&mut self) -> Result<()> {
            Ok(())
        }
        fn punch(&mut self) -> Result<()> {
            panic!("solenoid driver exploded");
        }
        fn cut(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn panicking_run_releases_the_machine() {
        let puncher = MusicPuncher::new(fast_config(), Box::new(BrokenPunch)).unwrap();
        let svc = PuncherService::new(puncher);
        assert_eq!(
            svc.submit(short_timeline(), None).unwrap(),
            SubmitResult::Accepted
        );
        svc.wait();

        let status = svc.status();
        assert!(!status.active);
        assert_eq!(status.error.as_deref(), Some(RUN_PANICKED));
        assert_eq!(
            svc.submit(short_timeline(), None).unwrap(),
            SubmitResult::Accepted
        );
        svc.wait();
    }

    #[test]
    fn completed_run_reports_full_progress() {
        let svc = service(fast_config());
        svc.submit(short_timeline(), None).unwrap();
        svc.wait();
        assert_eq!(svc.status().progress, 1.0);
    }

    #[test]
    fn status_serializes_to_json() {
        let status = PuncherStatus {
            active: false,
            position: 12,
            progress: 0.5,
            error: None,
            file: None,
        };
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#"{"active":false,"position":12,"progress":0.5,"error":null}"#
        );
    }
}
