use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD as base64_engine, Engine as _};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TtsError;

pub const WAV_MIME: &str = "audio/wav";
pub const MPEG_MIME: &str = "audio/mpeg";
pub const OGG_MIME: &str = "audio/ogg";

const DEFAULT_SAMPLE_RATE: u32 = 24000;

static RATE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"rate=(\d+)").unwrap());

/// A complete, independently playable audio buffer plus the media type it
/// actually is (as opposed to what the service declared).
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub bytes: Bytes,
    pub mime_type: &'static str,
    /// Known for synthesized WAV; mp3/ogg pass through undecoded so their
    /// length is only discovered by the playback device.
    pub duration_secs: Option<f64>,
}

/// Turns a speech-service payload into something a local player can open.
///
/// Raw 16-bit PCM (`audio/L16;rate=N`, or anything mentioning "pcm") gets a
/// RIFF/WAVE header synthesized around it; mp3 and ogg payloads are already
/// self-describing and pass through unchanged. Unrecognized types are treated
/// as mp3, which is what the service sends when it sends anything compressed.
pub fn decode(base64_payload: &str, declared_mime: &str) -> Result<DecodedAudio, TtsError> {
    let raw = base64_engine
        .decode(base64_payload.trim())
        .map_err(|e| TtsError::Decode(format!("invalid base64 audio payload: {e}")))?;

    let mime = declared_mime.to_ascii_lowercase();

    if mime.contains("l16") || mime.contains("pcm") {
        let rate = sample_rate_of(&mime);
        let bytes = wrap_pcm_in_wav(&raw, rate)?;
        let sample_count = raw.len() / 2;
        return Ok(DecodedAudio {
            bytes: Bytes::from(bytes),
            mime_type: WAV_MIME,
            duration_secs: Some(sample_count as f64 / f64::from(rate)),
        });
    }

    let mime_type = if mime.contains("mpeg") || mime.contains("mp3") {
        MPEG_MIME
    } else if mime.contains("ogg") {
        OGG_MIME
    } else {
        MPEG_MIME
    };

    Ok(DecodedAudio {
        bytes: Bytes::from(raw),
        mime_type,
        duration_secs: None,
    })
}

fn sample_rate_of(mime: &str) -> u32 {
    RATE_PARAM
        .captures(mime)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(DEFAULT_SAMPLE_RATE)
}

/// Prefixes the canonical 44-byte RIFF/WAVE header (mono, 16-bit LE, format
/// code 1) to headerless samples. An odd trailing byte is half a sample and
/// is dropped.
fn wrap_pcm_in_wav(raw: &[u8], sample_rate: u32) -> Result<Vec<u8>, TtsError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav_cursor = Cursor::new(Vec::new());
    let mut wav_writer = hound::WavWriter::new(&mut wav_cursor, spec)
        .map_err(|e| TtsError::Decode(e.to_string()))?;

    for sample in raw.chunks_exact(2) {
        wav_writer
            .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
            .map_err(|e| TtsError::Decode(e.to_string()))?;
    }

    wav_writer
        .finalize()
        .map_err(|e| TtsError::Decode(e.to_string()))?;

    Ok(wav_cursor.into_inner())
}
