use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the peer sends for the agent's voice.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownlinkMode {
    /// `speak` text directives, synthesized locally
    Speech,
    /// Encoded audio segments as binary frames
    Audio,
}

impl DownlinkMode {
    fn parse(s: &str) -> Result<Self, &'static str> {
        match s {
            "speech" => Ok(Self::Speech),
            "audio" => Ok(Self::Audio),
            _ => Err("DOWNLINK_MODE must be \"speech\" or \"audio\""),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    // 网络配置
    pub ws_url: String,

    // 采集参数
    pub capture_device: String,
    pub sample_rate: u32,
    pub frame_size: usize,

    // 播放参数
    pub playback_device: String,
    pub playback_channels: u32,
    pub segment_format: String,
    pub segment_sample_rate: u32,

    // 轮次控制
    pub unmute_grace_ms: u64,
    pub downlink_mode: DownlinkMode,

    // 本地语音合成
    pub speech_command: String,
    pub speech_voice: String,
    pub speech_locale: String,
    pub preferred_voices: Vec<String>,

    // 转写显示，空字符串表示只写日志
    pub transcript_udp_target: String,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            ws_url: env!("WS_URL").to_string(),

            capture_device: env!("CAPTURE_DEVICE").to_string(),
            sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            frame_size: parse_frame_size(env!("CAPTURE_FRAME_SIZE"))?,

            playback_device: env!("PLAYBACK_DEVICE").to_string(),
            playback_channels: env!("PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_CHANNELS")?,
            segment_format: env!("SEGMENT_FORMAT").to_string(),
            segment_sample_rate: env!("SEGMENT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse SEGMENT_SAMPLE_RATE")?,

            unmute_grace_ms: env!("UNMUTE_GRACE_MS").parse()
                .map_err(|_| "Failed to parse UNMUTE_GRACE_MS")?,
            downlink_mode: DownlinkMode::parse(env!("DOWNLINK_MODE"))?,

            speech_command: env!("SPEECH_COMMAND").to_string(),
            speech_voice: env!("SPEECH_VOICE").to_string(),
            speech_locale: env!("SPEECH_LOCALE").to_string(),
            preferred_voices: split_list(env!("SPEECH_PREFERRED_VOICES")),

            transcript_udp_target: env!("TRANSCRIPT_UDP_TARGET").to_string(),
        })
    }

    pub fn unmute_grace(&self) -> Duration {
        Duration::from_millis(self.unmute_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

fn parse_frame_size(s: &str) -> Result<usize, &'static str> {
    match s.parse() {
        Ok(0) => Err("CAPTURE_FRAME_SIZE must be > 0"),
        Ok(n) => Ok(n),
        Err(_) => Err("Failed to parse CAPTURE_FRAME_SIZE"),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}
