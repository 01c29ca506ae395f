//! musicpuncher — punch a MIDI file, preview how it would be punched, or
//! serve the HTTP control surface.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use musicpuncher::control::{HttpServer, PuncherService};
use musicpuncher::music::{self, NoteTimeline, PunchOptions};
use musicpuncher::puncher::{build_actuator, ActuatorKind, RunControl};
use musicpuncher::{MusicPuncher, PuncherConfig, PuncherError, Result, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "musicpuncher", version, about = "Punch MIDI files into music box strips")]
struct Cli {
    /// MIDI file to punch
    #[arg(required_unless_present_any = ["serve", "calibrate"])]
    file: Option<PathBuf>,

    /// Machine configuration (default: ~/.musicpuncher/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// pigpio daemon address, overrides the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// pigpio daemon port, overrides the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Octave adjustments, e.g. "48+,84--"
    #[arg(long)]
    adjust: Option<String>,

    /// Shift by this many semitones and fold notes onto the keyboard by octave
    #[arg(long, allow_hyphen_values = true)]
    autofit: Option<i32>,

    /// Write the fitted notes to this MIDI file instead of punching
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log the machine actions instead of driving hardware
    #[arg(long)]
    no_act: bool,

    /// With --no-act, take as long as the machine would
    #[arg(long)]
    timed: bool,

    /// Drive an in-process simulation of the pigpio daemon
    #[arg(long)]
    simulate: bool,

    /// Serve the HTTP control surface
    #[arg(long)]
    serve: bool,

    /// Punch the alignment pattern
    #[arg(long)]
    calibrate: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn actuator_kind(&self, config: &PuncherConfig) -> ActuatorKind {
        if self.no_act {
            ActuatorKind::Debug { timed: self.timed }
        } else if self.simulate {
            ActuatorKind::Simulated { seed: 0 }
        } else {
            ActuatorKind::Pigpio {
                address: self
                    .address
                    .clone()
                    .unwrap_or_else(|| config.pigpio.address.clone()),
                port: self.port.unwrap_or(config.pigpio.port),
            }
        }
    }

    fn punch_options(&self) -> PunchOptions {
        PunchOptions {
            adjust: self.adjust.clone(),
            autofit: self.autofit.is_some(),
            transpose: self.autofit.unwrap_or(0),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(PuncherConfig::default_path);
    let config = if config_path.exists() || cli.config.is_some() {
        PuncherConfig::load(&config_path)?
    } else {
        warn!(
            "{} not found, using the built-in configuration",
            config_path.display()
        );
        PuncherConfig::default()
    };
    let keyboard = config.build_keyboard()?;

    // Preview only: no machine needed.
    if let Some(output) = &cli.output {
        let timeline = load_timeline(&cli, &keyboard)?;
        std::fs::write(output, music::write_midi(&timeline)?)?;
        info!("wrote {}", output.display());
        return Ok(());
    }

    let control = Arc::new(RunControl::new());
    let kind = cli.actuator_kind(&config);
    let actuator = build_actuator(&kind, &config)?;
    let mut puncher =
        MusicPuncher::new(config.clone(), actuator)?.with_control(Arc::clone(&control));

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_control = Arc::clone(&control);
    let handler_shutdown = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("interrupted, stopping after the current hole");
        handler_control.request_stop();
        handler_shutdown.store(true, Ordering::SeqCst);
    }) {
        warn!("could not install the Ctrl-C handler: {e}");
    }

    if cli.calibrate {
        return puncher.calibrate();
    }

    if cli.serve {
        let service = Arc::new(PuncherService::new(puncher));
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let server = HttpServer::start(&addr, Arc::clone(&service))?;
        while !shutdown.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
        }
        drop(server);
        service.wait();
        return Ok(());
    }

    let timeline = load_timeline(&cli, &keyboard)?;
    match puncher.run(&timeline)? {
        RunOutcome::Completed => info!("done"),
        RunOutcome::Cancelled => warn!("stopped before the end of the file"),
    }
    Ok(())
}

fn load_timeline(cli: &Cli, keyboard: &music::Keyboard) -> Result<NoteTimeline> {
    let path = cli.file.as_ref().ok_or_else(|| {
        PuncherError::Io(io::Error::new(io::ErrorKind::InvalidInput, "no MIDI file given"))
    })?;
    let bytes = std::fs::read(path)?;
    let timeline = music::parse_midi(&bytes)?;
    music::prepare(&timeline, keyboard, &cli.punch_options())
}
