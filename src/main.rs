use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use voice_turn::audio::{AlsaCapture, LocalRenderer};
use voice_turn::net_link::{NetLink, connect_url};
use voice_turn::transcript_bridge::{LogTranscript, TranscriptBridge, TranscriptSink};
use voice_turn::{Config, Session, Step, TurnSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;

    let transcript: Box<dyn TranscriptSink> = if config.transcript_udp_target.is_empty() {
        Box::new(LogTranscript)
    } else {
        match TranscriptBridge::new(&config.transcript_udp_target).await {
            Ok(bridge) => Box::new(bridge),
            Err(e) => {
                log::warn!("Transcript bridge unavailable ({}), logging only", e);
                Box::new(LogTranscript)
            }
        }
    };

    let capture = Box::new(AlsaCapture::new(config.capture_device.clone(), config.sample_rate));
    let renderer = Arc::new(LocalRenderer::from_config(&config));
    let (mut session, links) =
        Session::new(TurnSettings::from(&config), capture, renderer, transcript);

    // 先获取麦克风，失败则不连接服务器
    let sample_rate = session.start()?;
    log::info!(
        "Session {} started, sample rate {}Hz",
        session.coordinator().session_id(),
        sample_rate
    );

    let url = connect_url(&config.ws_url, sample_rate)?;
    let net_link = NetLink::new(url, links.net_events, links.net_commands);
    let net_handle = tokio::spawn(net_link.run());

    let outcome = loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                session.stop();
                break Ok(());
            }
            step = session.step() => {
                if let Step::Ended(outcome) = step {
                    break outcome;
                }
            }
        }
    };

    // Let the link flush its close frame
    let _ = tokio::time::timeout(Duration::from_secs(1), net_handle).await;

    match outcome {
        Ok(()) => {
            log::info!("Session ended");
            Ok(())
        }
        Err(e) => {
            log::error!("Session ended with error: {}", e);
            Err(e.into())
        }
    }
}
