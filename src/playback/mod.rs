#[cfg(feature = "playback")]
pub mod rodio;

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::decode::DecodedAudio;
use crate::error::TtsError;

/// Ownership-scoped handle to a buffer loaded into a device. Ids are never
/// reused, so an event from a torn-down session can always be told apart
/// from one belonging to the current session.
pub type SourceId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// The device accepted the buffer and playback has begun.
    Ready { duration_secs: Option<f64> },
    /// Natural end of the source.
    Ended,
    /// The device rejected the container or the output path failed.
    Errored(String),
}

/// The host audio device. Implementations resolve readiness asynchronously:
/// `load` only hands the buffer over, success or failure arrives later via
/// `poll_event`. `release` of an unknown or already-released id is a no-op.
pub trait PlaybackDevice: Send {
    fn load(&mut self, id: SourceId, audio: &DecodedAudio) -> Result<(), TtsError>;
    fn play(&mut self, id: SourceId);
    fn pause(&mut self, id: SourceId);
    /// Rewind to the start and keep playing. Used for looped completion.
    fn restart(&mut self, id: SourceId);
    fn seek(&mut self, id: SourceId, seconds: f64);
    fn set_volume(&mut self, id: SourceId, volume: f32);
    fn set_rate(&mut self, id: SourceId, rate: f32);
    fn position(&mut self, id: SourceId) -> Option<f64>;
    fn release(&mut self, id: SourceId);
    fn poll_event(&mut self) -> Option<(SourceId, DeviceEvent)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    Playing,
    Paused,
}

#[derive(Debug)]
struct Session {
    id: SourceId,
    state: SessionState,
    duration_secs: Option<f64>,
}

/// A state change worth reporting to whoever drives the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Started { duration_secs: Option<f64> },
    Ended,
    Errored(String),
}

/// The single active playback session and its transport surface.
///
/// At most one session is ever live: `start` tears down any existing session
/// before constructing the next, and every exit path (natural end, stop,
/// device error, superseding start) runs through the same teardown, so each
/// loaded source is released exactly once. Volume, rate and loop are sticky
/// across sessions.
pub struct Player {
    device: Box<dyn PlaybackDevice>,
    session: Option<Session>,
    next_id: SourceId,
    pending_error: Option<String>,
    volume: f32,
    rate: f32,
    looped: bool,
}

impl Player {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        Self {
            device,
            session: None,
            next_id: 0,
            pending_error: None,
            volume: 1.0,
            rate: 1.0,
            looped: false,
        }
    }

    /// Begins playing `audio`, superseding any session already live.
    ///
    /// Never fails: a synchronous load refusal is held and surfaced as an
    /// `Errored` transition on the next `tick`, the same way an asynchronous
    /// device failure would arrive.
    pub fn start(&mut self, audio: &DecodedAudio) {
        self.teardown();

        self.next_id += 1;
        let id = self.next_id;

        if let Err(e) = self.device.load(id, audio) {
            self.device.release(id);
            self.pending_error = Some(e.to_string());
            return;
        }

        self.device.set_volume(id, self.volume);
        self.device.set_rate(id, self.rate);
        self.device.play(id);

        self.session = Some(Session {
            id,
            state: SessionState::Loading,
            duration_secs: audio.duration_secs,
        });
    }

    /// Pumps device events and returns the resulting transition, if any.
    /// Events from superseded sessions are dropped unanswered; their source
    /// was already released at teardown.
    pub fn tick(&mut self) -> Option<Transition> {
        if let Some(message) = self.pending_error.take() {
            return Some(Transition::Errored(message));
        }

        while let Some((id, event)) = self.device.poll_event() {
            let Some(session) = self.session.as_mut() else {
                continue;
            };
            if session.id != id {
                debug!(id, "dropping event from superseded session");
                continue;
            }

            match event {
                DeviceEvent::Ready { duration_secs } => {
                    if session.state == SessionState::Loading {
                        session.state = SessionState::Playing;
                        if duration_secs.is_some() {
                            session.duration_secs = duration_secs;
                        }
                        return Some(Transition::Started {
                            duration_secs: session.duration_secs,
                        });
                    }
                }
                DeviceEvent::Ended => {
                    if self.looped {
                        // Yield after the restart: a device that completes
                        // synchronously would otherwise feed this loop a new
                        // Ended event forever within one tick.
                        self.device.restart(id);
                        return None;
                    }
                    self.teardown();
                    return Some(Transition::Ended);
                }
                DeviceEvent::Errored(message) => {
                    self.teardown();
                    return Some(Transition::Errored(message));
                }
            }
        }

        None
    }

    /// Returns true if there was a session to stop.
    pub fn stop(&mut self) -> bool {
        let was_live = self.session.is_some();
        self.teardown();
        was_live
    }

    pub fn pause(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.state == SessionState::Playing {
                self.device.pause(session.id);
                session.state = SessionState::Paused;
            }
        }
    }

    pub fn resume(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.state == SessionState::Paused {
                self.device.play(session.id);
                session.state = SessionState::Playing;
            }
        }
    }

    /// Clamped to `[0, duration]` when the duration is known, to `>= 0`
    /// otherwise.
    pub fn seek(&mut self, seconds: f64) {
        if let Some(session) = self.session.as_ref() {
            let mut target = seconds.max(0.0);
            if let Some(duration) = session.duration_secs {
                target = target.min(duration);
            }
            self.device.seek(session.id, target);
        }
    }

    /// NaN is not a volume; non-finite values are ignored, everything else
    /// is clamped to `[0.0, 1.0]`.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            warn!(volume, "ignoring non-finite volume");
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(session) = self.session.as_ref() {
            self.device.set_volume(session.id, self.volume);
        }
    }

    /// Non-positive and non-finite rates are ignored rather than clamped; a
    /// typo should not silently freeze playback at some epsilon speed.
    pub fn set_rate(&mut self, rate: f32) {
        if !rate.is_finite() || rate <= 0.0 {
            warn!(rate, "ignoring unusable playback rate");
            return;
        }
        self.rate = rate;
        if let Some(session) = self.session.as_ref() {
            self.device.set_rate(session.id, self.rate);
        }
    }

    pub fn set_loop(&mut self, looped: bool) {
        self.looped = looped;
    }

    pub fn is_idle(&self) -> bool {
        self.session.is_none()
    }

    pub fn state(&self) -> Option<SessionState> {
        self.session.as_ref().map(|s| s.state)
    }

    pub fn position(&mut self) -> Option<f64> {
        let id = self.session.as_ref()?.id;
        self.device.position(id)
    }

    pub fn duration(&self) -> Option<f64> {
        self.session.as_ref()?.duration_secs
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn looped(&self) -> bool {
        self.looped
    }

    fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            self.device.pause(session.id);
            self.device.release(session.id);
        }
    }
}

/// Stand-in device for builds or hosts without audio output: accepts every
/// buffer and completes it immediately, so the whole transport surface stays
/// exercisable and the orchestrator can fall back to keeping files on disk.
#[derive(Debug, Default)]
pub struct NullDevice {
    events: VecDeque<(SourceId, DeviceEvent)>,
    loaded: Option<SourceId>,
}

impl PlaybackDevice for NullDevice {
    fn load(&mut self, id: SourceId, _audio: &DecodedAudio) -> Result<(), TtsError> {
        self.loaded = Some(id);
        Ok(())
    }

    fn play(&mut self, id: SourceId) {
        if self.loaded == Some(id) {
            self.events.push_back((
                id,
                DeviceEvent::Ready {
                    duration_secs: None,
                },
            ));
            self.events.push_back((id, DeviceEvent::Ended));
        }
    }

    fn pause(&mut self, _id: SourceId) {}

    /// Each "lap" completes instantly, so a looped session keeps producing
    /// observable completions instead of going silent.
    fn restart(&mut self, id: SourceId) {
        if self.loaded == Some(id) {
            self.events.push_back((id, DeviceEvent::Ended));
        }
    }

    fn seek(&mut self, _id: SourceId, _seconds: f64) {}
    fn set_volume(&mut self, _id: SourceId, _volume: f32) {}
    fn set_rate(&mut self, _id: SourceId, _rate: f32) {}

    fn position(&mut self, _id: SourceId) -> Option<f64> {
        None
    }

    fn release(&mut self, id: SourceId) {
        if self.loaded == Some(id) {
            self.loaded = None;
        }
        self.events.retain(|(event_id, _)| *event_id != id);
    }

    fn poll_event(&mut self) -> Option<(SourceId, DeviceEvent)> {
        self.events.pop_front()
    }
}
