use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config;
use crate::decode::{self, DecodedAudio};
use crate::error::TtsError;
use crate::gemini::SpeechService;
use crate::normalize::normalize;
use crate::playback::Player;
use crate::storage::AudioStore;

/// The host editor collaborator: where the text to read comes from. The
/// selection wins over the full document when both exist.
pub trait DocumentSource: Send + Sync {
    fn selection(&self) -> Option<String>;
    fn document(&self) -> Result<String, TtsError>;
    /// Base name for files saved from this document.
    fn stem(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Audio was handed to the player.
    Started,
    /// A newer request took over while this one was in flight; the player
    /// was left untouched.
    Superseded,
}

struct LastAudio {
    stem: String,
    audio: DecodedAudio,
}

/// Sequences one read-aloud request: document text → normalize → remote
/// synthesis → decode → optional save → playback.
///
/// Requests are single-flight by supersession, not by locking: each request
/// takes a ticket from the epoch counter, and any request that finds a newer
/// ticket issued when it returns from the network walks away without touching
/// the player. The check is repeated under the player lock, so a stale result
/// can never start playback.
pub struct Reader {
    service: Box<dyn SpeechService>,
    store: AudioStore,
    autosave: bool,
    epoch: AtomicU64,
    last_audio: StdMutex<Option<LastAudio>>,
}

impl Reader {
    pub fn new(service: Box<dyn SpeechService>, store: AudioStore, autosave: bool) -> Self {
        Self {
            service,
            store,
            autosave,
            epoch: AtomicU64::new(0),
            last_audio: StdMutex::new(None),
        }
    }

    pub async fn read_aloud(
        &self,
        document: &dyn DocumentSource,
        player: &Mutex<Player>,
    ) -> Result<Outcome, TtsError> {
        let ticket = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let text = match document.selection().filter(|s| !s.trim().is_empty()) {
            Some(selection) => selection,
            None => document.document()?,
        };
        if text.trim().is_empty() {
            return Err(TtsError::EmptyInput);
        }

        let profile = config::get().voice_profile();
        let normalized = normalize(&text, profile.skip_code_blocks);
        if normalized.is_empty() {
            return Err(TtsError::EmptyInput);
        }

        info!(chars = normalized.len(), "requesting speech synthesis");
        let payload = self.service.synthesize(&profile, &normalized).await?;

        if self.epoch.load(Ordering::SeqCst) != ticket {
            info!("discarding superseded synthesis result");
            return Ok(Outcome::Superseded);
        }

        let audio = decode::decode(&payload.data, &payload.mime_type)?;

        let stem = document.stem();
        *self.last_audio.lock().unwrap() = Some(LastAudio {
            stem: stem.clone(),
            audio: audio.clone(),
        });

        if self.autosave {
            // A failed save is worth a warning, not an aborted playback.
            if let Err(e) = self.store.save(&stem, &audio) {
                warn!("could not save generated audio: {e}");
            }
        }

        let mut player = player.lock().await;
        if self.epoch.load(Ordering::SeqCst) != ticket {
            info!("discarding superseded synthesis result");
            return Ok(Outcome::Superseded);
        }
        player.start(&audio);

        Ok(Outcome::Started)
    }

    /// Persists the most recently generated audio; `Ok(None)` when nothing
    /// has been generated yet.
    pub fn save_last(&self) -> Result<Option<PathBuf>, TtsError> {
        let last = self.last_audio.lock().unwrap();
        match last.as_ref() {
            Some(last) => Ok(Some(self.store.save(&last.stem, &last.audio)?)),
            None => Ok(None),
        }
    }

    pub fn store(&self) -> &AudioStore {
        &self.store
    }

    #[cfg(test)]
    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as base64_engine, Engine as _};

    use super::*;
    use crate::config::VoiceProfile;
    use crate::gemini::SpeechPayload;
    use crate::playback::NullDevice;

    struct FakeDocument {
        selection: Option<String>,
        document: String,
    }

    impl DocumentSource for FakeDocument {
        fn selection(&self) -> Option<String> {
            self.selection.clone()
        }

        fn document(&self) -> Result<String, TtsError> {
            Ok(self.document.clone())
        }

        fn stem(&self) -> String {
            "note".to_string()
        }
    }

    #[derive(Default)]
    struct FakeService {
        calls: Arc<AtomicUsize>,
        fail_status: Option<u16>,
    }

    #[async_trait]
    impl SpeechService for FakeService {
        async fn synthesize(
            &self,
            _profile: &VoiceProfile,
            _text: &str,
        ) -> Result<SpeechPayload, TtsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.fail_status {
                return Err(TtsError::RemoteRequest {
                    status,
                    body: "quota exceeded".to_string(),
                });
            }
            Ok(SpeechPayload {
                data: base64_engine.encode(vec![0u8; 4800]),
                mime_type: "audio/L16;rate=24000".to_string(),
            })
        }
    }

    fn setup(service: FakeService) -> (Arc<Reader>, Mutex<Player>, tempfile::TempDir) {
        crate::config::init_for_tests();
        let dir = tempfile::tempdir().unwrap();
        let reader = Arc::new(Reader::new(
            Box::new(service),
            AudioStore::new(dir.path()),
            false,
        ));
        let player = Mutex::new(Player::new(Box::<NullDevice>::default()));
        (reader, player, dir)
    }

    fn doc(text: &str) -> FakeDocument {
        FakeDocument {
            selection: None,
            document: text.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_input_short_circuits_before_any_remote_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (reader, player, _dir) = setup(FakeService {
            calls: calls.clone(),
            fail_status: None,
        });

        let err = reader.read_aloud(&doc(""), &player).await.unwrap_err();
        assert!(matches!(err, TtsError::EmptyInput));

        // A note that normalizes to nothing is the same condition.
        let err = reader
            .read_aloud(&doc("```\ncode only\n```"), &player)
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::EmptyInput));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(player.lock().await.is_idle());
    }

    #[tokio::test]
    async fn remote_429_surfaces_and_player_stays_idle() {
        let (reader, player, _dir) = setup(FakeService {
            fail_status: Some(429),
            ..FakeService::default()
        });

        let err = reader
            .read_aloud(&doc("Read this."), &player)
            .await
            .unwrap_err();
        assert!(matches!(err, TtsError::RemoteRequest { status: 429, .. }));
        assert!(player.lock().await.is_idle());
    }

    #[tokio::test]
    async fn happy_path_starts_playback() {
        let (reader, player, _dir) = setup(FakeService::default());

        let outcome = reader
            .read_aloud(&doc("# Title\n\nSome **bold** text."), &player)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Started);
        assert!(!player.lock().await.is_idle());
    }

    #[tokio::test]
    async fn selection_wins_over_document() {
        let (reader, player, _dir) = setup(FakeService::default());
        let document = FakeDocument {
            selection: Some("Just this part.".to_string()),
            document: "```\nwould normalize to nothing\n```".to_string(),
        };

        // The full document alone would be EmptyInput; the selection reads.
        let outcome = reader.read_aloud(&document, &player).await.unwrap();
        assert_eq!(outcome, Outcome::Started);
    }

    #[tokio::test]
    async fn superseded_request_never_touches_the_player() {
        let (reader, player, _dir) = setup(FakeService::default());

        // A newer request arrives while this one is on the wire.
        struct Superseding {
            reader: std::sync::Weak<Reader>,
        }

        #[async_trait]
        impl SpeechService for Superseding {
            async fn synthesize(
                &self,
                _profile: &VoiceProfile,
                _text: &str,
            ) -> Result<SpeechPayload, TtsError> {
                if let Some(reader) = self.reader.upgrade() {
                    reader.bump_epoch();
                }
                Ok(SpeechPayload {
                    data: base64_engine.encode(vec![0u8; 480]),
                    mime_type: "audio/L16;rate=24000".to_string(),
                })
            }
        }

        let reader = Arc::new_cyclic(|weak| {
            Reader::new(
                Box::new(Superseding {
                    reader: weak.clone(),
                }),
                reader.store().clone(),
                false,
            )
        });

        let outcome = reader
            .read_aloud(&doc("Read this."), &player)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Superseded);
        assert!(player.lock().await.is_idle());
    }

    #[tokio::test]
    async fn autosave_writes_a_file_and_save_last_repeats_it() {
        crate::config::init_for_tests();
        let dir = tempfile::tempdir().unwrap();
        let reader = Reader::new(
            Box::new(FakeService::default()),
            AudioStore::new(dir.path()),
            true,
        );
        let player = Mutex::new(Player::new(Box::<NullDevice>::default()));

        assert!(reader.save_last().unwrap().is_none());

        reader.read_aloud(&doc("Read this."), &player).await.unwrap();
        assert_eq!(reader.store().list().unwrap().len(), 1);

        let saved = reader.save_last().unwrap().unwrap();
        assert!(saved.exists());
        assert_eq!(reader.store().list().unwrap().len(), 2);
    }
}
