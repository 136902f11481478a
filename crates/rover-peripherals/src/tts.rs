//! Text-to-speech through `flite` or `espeak`.

use crate::{PeripheralError, PeripheralResult, Speaker};
use async_trait::async_trait;
use rover_core::{clamp, TtsRequest};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longest utterance passed to the engine, in characters.
pub const MAX_TTS_CHARS: usize = 512;

/// Timeout for one utterance.
pub const TTS_TIMEOUT: Duration = Duration::from_secs(12);

const FALLBACK_ENGINE: &str = "flite";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub tts_enabled: bool,
    pub default_engine: Option<String>,
    pub default_voice: Option<String>,
    pub default_pitch: i32,
}

/// A fully resolved engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub program: &'static str,
    pub args: Vec<String>,
}

/// Resolves a request against the configured defaults.
///
/// Returns `Ok(None)` when the request does not ask to speak.
pub fn plan(request: &TtsRequest, cfg: &AudioConfig) -> PeripheralResult<Option<Utterance>> {
    if !request.speak {
        return Ok(None);
    }
    let text = request.text.trim();
    if text.is_empty() {
        return Err(PeripheralError::Rejected("tts text required".to_string()));
    }
    let text: String = text.chars().take(MAX_TTS_CHARS).collect();

    let non_empty = |s: &Option<String>| {
        s.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let engine = non_empty(&request.engine)
        .or_else(|| non_empty(&cfg.default_engine))
        .unwrap_or_else(|| FALLBACK_ENGINE.to_string())
        .to_ascii_lowercase();
    let voice = non_empty(&request.voice).or_else(|| non_empty(&cfg.default_voice));
    let pitch = match request.pitch {
        Some(p) if p > 0 => p,
        _ => cfg.default_pitch,
    };
    let pitch = clamp(pitch, 0, 99);

    let utterance = match engine.as_str() {
        "espeak" | "e" => {
            let mut args = Vec::new();
            if pitch > 0 {
                args.push("-p".to_string());
                args.push(pitch.to_string());
            }
            args.push(text);
            Utterance {
                program: "espeak",
                args,
            }
        }
        "flite" | "f" => {
            let mut args = Vec::new();
            if let Some(voice) = voice {
                args.push("-voice".to_string());
                args.push(voice);
            }
            args.push("-t".to_string());
            args.push(text);
            Utterance {
                program: "flite",
                args,
            }
        }
        other => {
            return Err(PeripheralError::Rejected(format!(
                "unsupported tts engine: {other}"
            )))
        }
    };
    Ok(Some(utterance))
}

/// Speaks by spawning the engine binary.
#[derive(Debug, Clone)]
pub struct ProcessSpeaker {
    cfg: AudioConfig,
}

impl ProcessSpeaker {
    pub fn new(cfg: AudioConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Speaker for ProcessSpeaker {
    async fn speak(&self, request: &TtsRequest) -> PeripheralResult<()> {
        let Some(utterance) = plan(request, &self.cfg)? else {
            return Ok(());
        };
        let child = Command::new(utterance.program)
            .args(&utterance.args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(TTS_TIMEOUT, child)
            .await
            .map_err(|_| PeripheralError::Timeout {
                command: utterance.program.to_string(),
                secs: TTS_TIMEOUT.as_secs(),
            })?
            .map_err(|source| PeripheralError::Spawn {
                program: utterance.program.to_string(),
                source,
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(PeripheralError::CommandFailed {
                command: utterance.program.to_string(),
                status: output.status.to_string(),
                output: text.trim().to_string(),
            });
        }
        debug!(engine = utterance.program, "Utterance finished");
        Ok(())
    }
}

/// Resolves requests but only records them.
#[derive(Debug, Default)]
pub struct NoopSpeaker {
    cfg: AudioConfig,
    spoken: Mutex<Vec<Utterance>>,
}

impl NoopSpeaker {
    pub fn new(cfg: AudioConfig) -> Self {
        Self {
            cfg,
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        match self.spoken.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Speaker for NoopSpeaker {
    async fn speak(&self, request: &TtsRequest) -> PeripheralResult<()> {
        if let Some(utterance) = plan(request, &self.cfg)? {
            match self.spoken.lock() {
                Ok(mut s) => s.push(utterance),
                Err(poisoned) => poisoned.into_inner().push(utterance),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> TtsRequest {
        TtsRequest {
            text: text.to_string(),
            speak: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_speak_false_is_noop() {
        let req = TtsRequest {
            text: "hello".to_string(),
            speak: false,
            ..Default::default()
        };
        assert_eq!(plan(&req, &AudioConfig::default()).unwrap(), None);
    }

    #[test]
    fn test_empty_text_rejected() {
        let err = plan(&request("   "), &AudioConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "tts text required");
    }

    #[test]
    fn test_default_engine_is_flite() {
        let cfg = AudioConfig {
            default_voice: Some("slt".to_string()),
            ..Default::default()
        };
        let u = plan(&request("hi there"), &cfg).unwrap().unwrap();
        assert_eq!(u.program, "flite");
        assert_eq!(u.args, vec!["-voice", "slt", "-t", "hi there"]);
    }

    #[test]
    fn test_espeak_pitch_from_config_and_clamped() {
        let cfg = AudioConfig {
            default_engine: Some("espeak".to_string()),
            default_pitch: 40,
            ..Default::default()
        };
        let u = plan(&request("beep"), &cfg).unwrap().unwrap();
        assert_eq!(u.args, vec!["-p", "40", "beep"]);

        let mut req = request("beep");
        req.engine = Some("E".to_string());
        req.pitch = Some(250);
        let u = plan(&req, &cfg).unwrap().unwrap();
        assert_eq!(u.program, "espeak");
        assert_eq!(u.args, vec!["-p", "99", "beep"]);
    }

    #[test]
    fn test_text_truncated() {
        let long = "a".repeat(600);
        let u = plan(&request(&long), &AudioConfig::default()).unwrap().unwrap();
        assert_eq!(u.args.last().map(String::len), Some(MAX_TTS_CHARS));
    }

    #[test]
    fn test_unknown_engine() {
        let mut req = request("x");
        req.engine = Some("sam".to_string());
        let err = plan(&req, &AudioConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "unsupported tts engine: sam");
    }

    #[tokio::test]
    async fn test_noop_speaker_records() {
        let speaker = NoopSpeaker::new(AudioConfig::default());
        speaker.speak(&request("hello")).await.unwrap();
        assert_eq!(speaker.spoken().len(), 1);
    }
}
