use std::io::Cursor;
use std::sync::mpsc;
use std::time::Duration;

use bytes::Bytes;
use rodio::{OutputStream, Sink, Source};
use tracing::{debug, warn};

use super::{DeviceEvent, PlaybackDevice, SourceId};
use crate::decode::DecodedAudio;
use crate::error::TtsError;

/// Playback device backed by a dedicated player thread.
///
/// The rodio `OutputStream` is not `Send`, so it lives on its own thread;
/// this handle talks to it over a command channel and drains an event
/// channel. Dropping the handle closes the command channel, which shuts the
/// thread down and with it the output stream.
#[derive(Debug)]
pub struct RodioDevice {
    commands: mpsc::Sender<Command>,
    events: mpsc::Receiver<(SourceId, DeviceEvent)>,
}

#[derive(Debug)]
enum Command {
    Load { id: SourceId, bytes: Bytes },
    Play(SourceId),
    Pause(SourceId),
    Restart(SourceId),
    Seek(SourceId, f64),
    Volume(SourceId, f32),
    Rate(SourceId, f32),
    Release(SourceId),
    Position(SourceId, mpsc::Sender<Option<f64>>),
}

impl RodioDevice {
    /// Fails if no audio output device can be opened, so the caller can fall
    /// back to the null device.
    pub fn new() -> Result<Self, TtsError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        std::thread::Builder::new()
            .name("audio-player".to_string())
            .spawn(move || run_player_thread(&command_rx, &event_tx, &ready_tx))
            .map_err(|e| TtsError::Playback(format!("failed to spawn player thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| TtsError::Playback("player thread died during startup".to_string()))?
            .map_err(|e| TtsError::Playback(format!("no audio output device: {e}")))?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
        })
    }

    fn send(&self, command: Command) {
        // A closed channel means the player thread is gone; the resulting
        // silence is reported through the event channel drying up.
        if self.commands.send(command).is_err() {
            warn!("player thread is gone; command dropped");
        }
    }
}

impl PlaybackDevice for RodioDevice {
    fn load(&mut self, id: SourceId, audio: &DecodedAudio) -> Result<(), TtsError> {
        self.send(Command::Load {
            id,
            bytes: audio.bytes.clone(),
        });
        Ok(())
    }

    fn play(&mut self, id: SourceId) {
        self.send(Command::Play(id));
    }

    fn pause(&mut self, id: SourceId) {
        self.send(Command::Pause(id));
    }

    fn restart(&mut self, id: SourceId) {
        self.send(Command::Restart(id));
    }

    fn seek(&mut self, id: SourceId, seconds: f64) {
        self.send(Command::Seek(id, seconds));
    }

    fn set_volume(&mut self, id: SourceId, volume: f32) {
        self.send(Command::Volume(id, volume));
    }

    fn set_rate(&mut self, id: SourceId, rate: f32) {
        self.send(Command::Rate(id, rate));
    }

    fn position(&mut self, id: SourceId) -> Option<f64> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(Command::Position(id, reply_tx));
        reply_rx.recv_timeout(Duration::from_millis(100)).ok()?
    }

    fn release(&mut self, id: SourceId) {
        self.send(Command::Release(id));
    }

    fn poll_event(&mut self) -> Option<(SourceId, DeviceEvent)> {
        self.events.try_recv().ok()
    }
}

struct LoadedSource {
    id: SourceId,
    bytes: Bytes,
    sink: Sink,
    /// Set once a decoder has been appended; `Play` after that only resumes.
    appended: bool,
    /// Natural completion still pending an `Ended` event.
    playing: bool,
}

fn run_player_thread(
    commands: &mpsc::Receiver<Command>,
    events: &mpsc::Sender<(SourceId, DeviceEvent)>,
    ready: &mpsc::Sender<Result<(), String>>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut current: Option<LoadedSource> = None;

    loop {
        let command = match commands.recv_timeout(Duration::from_millis(50)) {
            Ok(command) => command,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Natural completion is only observable by polling the sink.
                if let Some(source) = current.as_mut() {
                    if source.playing && source.sink.empty() {
                        source.playing = false;
                        let _ = events.send((source.id, DeviceEvent::Ended));
                    }
                }
                continue;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        match command {
            Command::Load { id, bytes } => match Sink::try_new(&handle) {
                Ok(sink) => {
                    sink.pause();
                    current = Some(LoadedSource {
                        id,
                        bytes,
                        sink,
                        appended: false,
                        playing: false,
                    });
                }
                Err(e) => {
                    let _ = events.send((id, DeviceEvent::Errored(e.to_string())));
                }
            },
            Command::Play(id) => {
                let Some(source) = current.as_mut().filter(|s| s.id == id) else {
                    continue;
                };
                if source.appended {
                    source.sink.play();
                    continue;
                }
                match rodio::Decoder::new(Cursor::new(source.bytes.clone())) {
                    Ok(decoder) => {
                        let duration_secs =
                            decoder.total_duration().map(|d| d.as_secs_f64());
                        source.sink.append(decoder);
                        source.sink.play();
                        source.appended = true;
                        source.playing = true;
                        let _ = events.send((id, DeviceEvent::Ready { duration_secs }));
                    }
                    Err(e) => {
                        let _ = events.send((id, DeviceEvent::Errored(e.to_string())));
                    }
                }
            }
            Command::Pause(id) => {
                if let Some(source) = current.as_ref().filter(|s| s.id == id) {
                    source.sink.pause();
                }
            }
            Command::Restart(id) => {
                let Some(source) = current.as_mut().filter(|s| s.id == id) else {
                    continue;
                };
                source.sink.stop();
                match rodio::Decoder::new(Cursor::new(source.bytes.clone())) {
                    Ok(decoder) => {
                        source.sink.append(decoder);
                        source.sink.play();
                        source.playing = true;
                    }
                    Err(e) => {
                        let _ = events.send((id, DeviceEvent::Errored(e.to_string())));
                    }
                }
            }
            Command::Seek(id, seconds) => {
                if let Some(source) = current.as_ref().filter(|s| s.id == id) {
                    // mp3/ogg sources are not always seekable; a failed seek
                    // leaves playback where it was.
                    if let Err(e) = source.sink.try_seek(Duration::from_secs_f64(seconds)) {
                        warn!("seek failed: {e}");
                    }
                }
            }
            Command::Volume(id, volume) => {
                if let Some(source) = current.as_ref().filter(|s| s.id == id) {
                    source.sink.set_volume(volume);
                }
            }
            Command::Rate(id, rate) => {
                if let Some(source) = current.as_ref().filter(|s| s.id == id) {
                    source.sink.set_speed(rate);
                }
            }
            Command::Position(id, reply) => {
                let position = current
                    .as_ref()
                    .filter(|s| s.id == id)
                    .map(|s| s.sink.get_pos().as_secs_f64());
                let _ = reply.send(position);
            }
            Command::Release(id) => {
                // Releasing a stale or already-released id is a no-op.
                if current.as_ref().is_some_and(|s| s.id == id) {
                    if let Some(source) = current.take() {
                        source.sink.stop();
                    }
                }
            }
        }
    }

    debug!("player thread shutting down");
}
