//! Local speech synthesis through an external synthesizer process.
//!
//! The synthesizer (`espeak-ng` by default) reads text on stdin and plays it
//! itself. Voices are enumerated once with `--voices` and picked by locale
//! and name heuristics unless one is configured explicitly.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Language tag as reported by the synthesizer, e.g. `en-us`
    pub language: String,
    /// Human readable name, e.g. `English_(America)`
    pub name: String,
    /// What to pass to `-v`
    pub identifier: String,
}

#[derive(Debug, Clone, Default)]
pub struct VoicePreference {
    pub locale: String,
    /// Name fragments in order of preference
    pub preferred: Vec<String>,
}

/// Parse `espeak-ng --voices` output.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 3)
/// ```
pub fn parse_voice_list(output: &str) -> Vec<VoiceInfo> {
    output
        .lines()
        .filter(|l| !l.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 5 {
                return None;
            }
            Some(VoiceInfo {
                language: fields[1].to_string(),
                name: fields[3].to_string(),
                identifier: fields[4].to_string(),
            })
        })
        .collect()
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase().replace('_', "-")
}

fn primary_language(tag: &str) -> String {
    normalize_tag(tag)
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Pick a voice: preferred names first (within the locale's language),
/// then an exact locale match, then any voice of the same language.
pub fn select_voice<'a>(voices: &'a [VoiceInfo], pref: &VoicePreference) -> Option<&'a VoiceInfo> {
    let locale = normalize_tag(&pref.locale);
    let language = primary_language(&pref.locale);
    let same_language = |v: &VoiceInfo| language.is_empty() || primary_language(&v.language) == language;

    for wanted in &pref.preferred {
        let wanted = wanted.to_lowercase();
        if let Some(v) = voices.iter().filter(|&v| same_language(v)).find(|v| {
            v.name.to_lowercase().contains(&wanted) || normalize_tag(&v.language) == wanted
        }) {
            return Some(v);
        }
    }

    if !locale.is_empty() {
        if let Some(v) = voices.iter().find(|v| normalize_tag(&v.language) == locale) {
            return Some(v);
        }
        if let Some(v) = voices.iter().find(|v| primary_language(&v.language) == language) {
            return Some(v);
        }
    }
    None
}

pub struct SpeechSynth {
    command: String,
    explicit_voice: Option<String>,
    preference: VoicePreference,
    resolved: OnceCell<Option<String>>,
}

impl SpeechSynth {
    pub fn new(command: impl Into<String>, voice: &str, preference: VoicePreference) -> Self {
        let explicit_voice = if voice.trim().is_empty() {
            None
        } else {
            Some(voice.trim().to_string())
        };
        Self {
            command: command.into(),
            explicit_voice,
            preference,
            resolved: OnceCell::new(),
        }
    }

    pub async fn list_voices(&self) -> Result<Vec<VoiceInfo>, RenderError> {
        let output = Command::new(&self.command)
            .arg("--voices")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RenderError::Synthesis(format!("failed to run {}: {}", self.command, e)))?;
        if !output.status.success() {
            return Err(RenderError::Synthesis(format!(
                "{} --voices exited with {}",
                self.command, output.status
            )));
        }
        Ok(parse_voice_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Voice to use, resolved once per synthesizer.
    async fn voice(&self) -> Option<String> {
        if let Some(v) = &self.explicit_voice {
            return Some(v.clone());
        }
        self.resolved
            .get_or_init(|| async {
                match self.list_voices().await {
                    Ok(voices) => {
                        let picked = select_voice(&voices, &self.preference);
                        match picked {
                            Some(v) => log::info!("Using voice {} ({})", v.name, v.language),
                            None => log::info!(
                                "No voice matches {:?}, using synthesizer default",
                                self.preference.locale
                            ),
                        }
                        picked.map(|v| v.identifier.clone())
                    }
                    Err(e) => {
                        log::warn!("Voice enumeration failed: {}", e);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Speak `text` and wait until the synthesizer has finished playing it.
    ///
    /// Dropping the returned future kills the synthesizer process.
    pub async fn speak(&self, text: &str) -> Result<(), RenderError> {
        if text.trim().is_empty() {
            return Err(RenderError::InvalidPayload("empty speech text".into()));
        }

        let mut cmd = Command::new(&self.command);
        if let Some(voice) = self.voice().await {
            cmd.arg("-v").arg(voice);
        }
        let mut child = cmd
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RenderError::Synthesis(format!("failed to spawn {}: {}", self.command, e)))?;

        log::debug!("Speech start: {} chars", text.len());
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| RenderError::Synthesis(format!("failed to write text: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RenderError::Synthesis(format!("failed to wait for synthesizer: {}", e)))?;

        if output.status.success() {
            log::debug!("Speech end");
            Ok(())
        } else {
            Err(RenderError::Synthesis(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}
