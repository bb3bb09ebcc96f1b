use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    network: Network,
    audio: Audio,
    turn: Turn,
    speech: Speech,
    transcript: Transcript,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    sample_rate: u32,
    frame_size: usize,
    playback_device: String,
    playback_channels: u32,
    segment_format: String,
    segment_sample_rate: u32,
}

#[derive(Deserialize)]
struct Turn {
    unmute_grace_ms: u64,
    downlink_mode: String,
}

#[derive(Deserialize)]
struct Speech {
    command: String,
    voice: String,
    locale: String,
    preferred_voices: Vec<String>,
}

#[derive(Deserialize)]
struct Transcript {
    udp_target: String,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);

    // 音频配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=CAPTURE_FRAME_SIZE={}", config.audio.frame_size);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=PLAYBACK_CHANNELS={}", config.audio.playback_channels);
    println!("cargo:rustc-env=SEGMENT_FORMAT={}", config.audio.segment_format);
    println!("cargo:rustc-env=SEGMENT_SAMPLE_RATE={}", config.audio.segment_sample_rate);

    // 轮次控制
    println!("cargo:rustc-env=UNMUTE_GRACE_MS={}", config.turn.unmute_grace_ms);
    println!("cargo:rustc-env=DOWNLINK_MODE={}", config.turn.downlink_mode);

    // 语音合成
    println!("cargo:rustc-env=SPEECH_COMMAND={}", config.speech.command);
    println!("cargo:rustc-env=SPEECH_VOICE={}", config.speech.voice);
    println!("cargo:rustc-env=SPEECH_LOCALE={}", config.speech.locale);
    println!(
        "cargo:rustc-env=SPEECH_PREFERRED_VOICES={}",
        config.speech.preferred_voices.join(",")
    );

    println!("cargo:rustc-env=TRANSCRIPT_UDP_TARGET={}", config.transcript.udp_target);
}
