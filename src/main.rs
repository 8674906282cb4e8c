#![warn(clippy::pedantic)]

mod config;
mod decode;
mod error;
mod gemini;
mod normalize;
mod playback;
mod reader;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::TtsError;
use crate::gemini::GeminiClient;
use crate::playback::{Player, SessionState, Transition};
use crate::reader::{DocumentSource, Outcome, Reader};
use crate::storage::AudioStore;

/// The note file standing in for the host editor: `read` takes the whole
/// document, `read N-M` a line-range selection. Re-read on every request so
/// edits between requests are picked up.
struct FileDocument {
    path: PathBuf,
    lines: Option<(usize, usize)>,
}

impl DocumentSource for FileDocument {
    fn selection(&self) -> Option<String> {
        let (start, end) = self.lines?;
        let text = std::fs::read_to_string(&self.path).ok()?;
        let selected: Vec<&str> = text
            .lines()
            .skip(start.saturating_sub(1))
            .take(end.saturating_sub(start) + 1)
            .collect();
        Some(selected.join("\n"))
    }

    fn document(&self) -> Result<String, TtsError> {
        Ok(std::fs::read_to_string(&self.path)?)
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| "note".to_string(), |s| s.to_string_lossy().into_owned())
    }
}

/// Opens the real audio device when possible; otherwise falls back to the
/// null device and asks the orchestrator to keep generated audio on disk.
fn open_device() -> (Box<dyn playback::PlaybackDevice>, bool) {
    #[cfg(feature = "playback")]
    match playback::rodio::RodioDevice::new() {
        Ok(device) => return (Box::new(device), false),
        Err(e) => tracing::warn!("{e}; keeping generated audio on disk instead"),
    }

    #[cfg(not(feature = "playback"))]
    info!("built without the playback feature; keeping generated audio on disk");

    (Box::new(playback::NullDevice::default()), true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    config::init()?;
    let config = config::get();

    let note = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: note-tts <note.md>")?;
    anyhow::ensure!(note.is_file(), "{} is not a file", note.display());

    let (device, force_save) = open_device();
    let player = Arc::new(Mutex::new(Player::new(device)));
    let reader = Arc::new(Reader::new(
        Box::new(GeminiClient::new()),
        AudioStore::new(&config.save_dir),
        config.autosave || force_save,
    ));

    println!("note-tts: {} loaded; type 'help' for commands", note.display());

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {
                let transition = player.lock().await.tick();
                match transition {
                    Some(Transition::Started { duration_secs }) => match duration_secs {
                        Some(d) => info!("playing ({d:.1}s)"),
                        None => info!("playing"),
                    },
                    Some(Transition::Ended) => info!("playback finished"),
                    Some(Transition::Errored(message)) => error!("playback failed: {message}"),
                    None => {}
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !dispatch(line.trim(), &note, &reader, &player).await {
                    break;
                }
            }
        }
    }

    player.lock().await.stop();
    Ok(())
}

/// Handles one transport command; returns false to quit.
async fn dispatch(
    line: &str,
    note: &std::path::Path,
    reader: &Arc<Reader>,
    player: &Arc<Mutex<Player>>,
) -> bool {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return true;
    };
    let argument = words.next();

    match command {
        "read" => {
            let lines = match argument.map(parse_line_range) {
                Some(Some(range)) => Some(range),
                Some(None) => {
                    error!("usage: read [START-END]");
                    return true;
                }
                None => None,
            };

            let document = FileDocument {
                path: note.to_path_buf(),
                lines,
            };
            let reader = reader.clone();
            let player = player.clone();
            tokio::spawn(async move {
                match reader.read_aloud(&document, &player).await {
                    Ok(Outcome::Started) => {}
                    Ok(Outcome::Superseded) => info!("request superseded by a newer one"),
                    Err(e) => error!("{e}"),
                }
            });
        }
        "stop" => {
            if player.lock().await.stop() {
                info!("stopped");
            }
        }
        "pause" => player.lock().await.pause(),
        "resume" => player.lock().await.resume(),
        "seek" => match argument.and_then(|s| s.parse::<f64>().ok()) {
            Some(seconds) => player.lock().await.seek(seconds),
            None => error!("usage: seek SECONDS"),
        },
        "volume" => match argument.and_then(|s| s.parse::<f32>().ok()) {
            Some(volume) => player.lock().await.set_volume(volume),
            None => error!("usage: volume 0.0-1.0"),
        },
        "speed" => match argument.and_then(|s| s.parse::<f32>().ok()) {
            Some(rate) => player.lock().await.set_rate(rate),
            None => error!("usage: speed RATE"),
        },
        "loop" => match argument {
            Some("on") => player.lock().await.set_loop(true),
            Some("off") => player.lock().await.set_loop(false),
            _ => error!("usage: loop on|off"),
        },
        "save" => match reader.save_last() {
            Ok(Some(path)) => println!("saved {}", path.display()),
            Ok(None) => println!("nothing generated yet"),
            Err(e) => error!("{e}"),
        },
        "list" => match reader.store().list() {
            Ok(files) if files.is_empty() => println!("no saved audio"),
            Ok(files) => {
                for (i, file) in files.iter().enumerate() {
                    println!("{:>3}  {}", i + 1, file.path.display());
                }
            }
            Err(e) => error!("{e}"),
        },
        "delete" => match argument.and_then(|s| s.parse::<usize>().ok()) {
            Some(index) => match reader.store().list() {
                Ok(files) => match index.checked_sub(1).and_then(|i| files.get(i)) {
                    Some(file) => match reader.store().delete(&file.path) {
                        Ok(()) => println!("deleted {}", file.path.display()),
                        Err(e) => error!("{e}"),
                    },
                    None => error!("no saved file #{index}; see 'list'"),
                },
                Err(e) => error!("{e}"),
            },
            None => error!("usage: delete NUMBER"),
        },
        "status" => {
            let mut player = player.lock().await;
            let state = match player.state() {
                None => "idle".to_string(),
                Some(SessionState::Loading) => "loading".to_string(),
                Some(state) => {
                    let name = if state == SessionState::Paused {
                        "paused"
                    } else {
                        "playing"
                    };
                    match (player.position(), player.duration()) {
                        (Some(pos), Some(dur)) => format!("{name} {pos:.1}s / {dur:.1}s"),
                        (Some(pos), None) => format!("{name} {pos:.1}s"),
                        _ => name.to_string(),
                    }
                }
            };
            println!(
                "{state}; volume {:.2}, speed {:.2}, loop {}",
                player.volume(),
                player.rate(),
                if player.looped() { "on" } else { "off" },
            );
        }
        "help" => {
            println!("read [START-END]   speak the note (or a line range) aloud");
            println!("stop | pause | resume");
            println!("seek SECONDS | volume 0.0-1.0 | speed RATE | loop on|off");
            println!("save | list | delete NUMBER");
            println!("status | help | quit");
        }
        "quit" | "exit" => return false,
        other => error!("unknown command '{other}'; type 'help'"),
    }

    true
}

fn parse_line_range(s: &str) -> Option<(usize, usize)> {
    let (start, end) = s.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    (start >= 1 && end >= start).then_some((start, end))
}
