// SPDX-License-Identifier: MPL-2.0
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use lens_player::config::{self, FrameDropMode, SessionConfig, SyncMode};
use lens_player::error::{Error, Result};
use lens_player::infrastructure::FfmpegBackend;
use lens_player::player::event::{self, EventSender};
use lens_player::player::{
    action_for_key, HeadlessRenderer, Key, PlayerEvent, Presenter, Session, TerminationReason,
};

/// Exit status after a terminating signal.
const SIGNAL_EXIT_CODE: u8 = 123;

/// Command-line overrides; unset options keep the configured value.
#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    source: String,
    config_dir: Option<PathBuf>,
    sync: Option<SyncMode>,
    framedrop: Option<FrameDropMode>,
    loop_count: Option<u32>,
    start_time: Option<f64>,
    duration: Option<f64>,
    seek_by_bytes: bool,
    autoexit: bool,
    volume: Option<u8>,
    audio_disable: bool,
    video_disable: bool,
    subtitle_disable: bool,
    infinite_buffer: bool,
    show_status: bool,
}

impl CliArgs {
    fn parse(mut args: pico_args::Arguments) -> Result<Self> {
        let invalid = |e: pico_args::Error| Error::Config(e.to_string());

        let framedrop = if args.contains("--noframedrop") {
            Some(FrameDropMode::Never)
        } else if args.contains("--framedrop") {
            Some(FrameDropMode::Always)
        } else {
            None
        };

        let parsed = Self {
            config_dir: args.opt_value_from_str("--config-dir").map_err(invalid)?,
            sync: args.opt_value_from_str("--sync").map_err(invalid)?,
            framedrop,
            loop_count: args.opt_value_from_str("--loop").map_err(invalid)?,
            start_time: args.opt_value_from_str("--ss").map_err(invalid)?,
            duration: args.opt_value_from_str("--t").map_err(invalid)?,
            seek_by_bytes: args.contains("--bytes"),
            autoexit: args.contains("--autoexit"),
            volume: args.opt_value_from_str("--volume").map_err(invalid)?,
            audio_disable: args.contains("--an"),
            video_disable: args.contains("--vn"),
            subtitle_disable: args.contains("--sn"),
            infinite_buffer: args.contains("--infbuf"),
            show_status: args.contains("--stats"),
            source: String::new(),
        };

        let mut rest = args.finish().into_iter();
        let source = rest
            .next()
            .and_then(|s| s.into_string().ok())
            .ok_or_else(|| Error::Config("missing media source".to_string()))?;
        if let Some(extra) = rest.next() {
            return Err(Error::Config(format!("unexpected argument {extra:?}")));
        }
        Ok(Self { source, ..parsed })
    }

    fn apply(&self, config: &mut SessionConfig) {
        let playback = &mut config.playback;
        if let Some(sync) = self.sync {
            playback.sync = sync;
        }
        if let Some(framedrop) = self.framedrop {
            playback.framedrop = framedrop;
        }
        if let Some(loop_count) = self.loop_count {
            playback.loop_count = loop_count;
        }
        if self.start_time.is_some() {
            playback.start_time = self.start_time;
        }
        if self.duration.is_some() {
            playback.duration = self.duration;
        }
        if self.seek_by_bytes {
            playback.seek_by_bytes = Some(true);
        }
        if self.infinite_buffer {
            playback.infinite_buffer = Some(true);
        }
        playback.autoexit |= self.autoexit;
        playback.show_status |= self.show_status;

        if let Some(volume) = self.volume {
            config.audio.volume = volume.min(100);
        }
        let streams = &mut config.streams;
        streams.audio_disable |= self.audio_disable;
        streams.video_disable |= self.video_disable;
        streams.subtitle_disable |= self.subtitle_disable;
    }
}

/// Maps typed characters on stdin to player actions.
fn spawn_key_reader(events: EventSender, seek_interval: f64) {
    let spawned = thread::Builder::new().name("keys".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let keys: Vec<Key> = if line.is_empty() {
                vec![Key::Space]
            } else {
                line.chars().map(Key::Char).collect()
            };
            for key in keys {
                if let Some(action) = action_for_key(key, seek_interval) {
                    if events.send(PlayerEvent::Action(action)).is_err() {
                        return;
                    }
                }
            }
        }
    });
    if let Err(e) = spawned {
        log::warn!("keyboard input unavailable: {e}");
    }
}

/// Asks the presentation loop to stop. Returns false once the session is gone.
fn post_interrupt(events: &EventSender) -> bool {
    let sent = events.send(PlayerEvent::Terminated {
        reason: TerminationReason::Interrupted,
    });
    if sent.is_err() {
        log::debug!("interrupt after the session ended");
    }
    sent.is_ok()
}

#[cfg(feature = "audio-output")]
fn audio_device() -> Option<Box<dyn lens_player::application::port::AudioDevice>> {
    Some(Box::new(lens_player::player::CpalOutput::new()))
}

#[cfg(not(feature = "audio-output"))]
fn audio_device() -> Option<Box<dyn lens_player::application::port::AudioDevice>> {
    None
}

fn run(cli: &CliArgs) -> Result<TerminationReason> {
    let (mut config, warning) = config::load_with_override(cli.config_dir.clone());
    if let Some(warning) = warning {
        log::warn!("{warning}");
    }
    cli.apply(&mut config);

    let (events, receiver) = event::channel();
    let signal_events = events.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down");
        post_interrupt(&signal_events);
    }) {
        log::warn!("could not install signal handler: {e}");
    }

    let seek_interval = config.playback.seek_interval;
    let device = if config.streams.audio_disable {
        None
    } else {
        audio_device()
    };
    let session = Session::open(
        &FfmpegBackend,
        &cli.source,
        config,
        Box::new(HeadlessRenderer::default()),
        device,
        events.clone(),
    )?;
    spawn_key_reader(events, seek_interval);

    Ok(Presenter::new(session, receiver).run())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = match CliArgs::parse(pico_args::Arguments::from_env()) {
        Ok(cli) => cli,
        Err(e) => {
            log::error!("{e}");
            eprintln!("usage: lens-player [options] <source>");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(TerminationReason::Interrupted) => ExitCode::from(SIGNAL_EXIT_CODE),
        Ok(TerminationReason::ReadError(message)) => {
            log::error!("{}: {message}", cli.source);
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
