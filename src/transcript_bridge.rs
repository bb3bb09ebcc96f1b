use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::protocol::ControlMessage;

/// Where `transcript` / `response` lines go. Display is not our concern.
pub trait TranscriptSink: Send {
    fn show(&self, msg: &ControlMessage);
}

/// Writes transcript lines to the log only.
pub struct LogTranscript;

impl TranscriptSink for LogTranscript {
    fn show(&self, msg: &ControlMessage) {
        match msg {
            ControlMessage::Transcript { text } => log::info!("You: {}", text),
            ControlMessage::Response { text } => log::info!("Agent: {}", text),
            _ => {}
        }
    }
}

// 显示进程和Core进程通过本地UDP通信，目标地址在配置中指定
pub struct TranscriptBridge {
    socket: UdpSocket,
    target: SocketAddr,
}

impl TranscriptBridge {
    pub async fn new(target: &str) -> anyhow::Result<Self> {
        let target = tokio::net::lookup_host(target)
            .await?
            .next()
            .ok_or_else(|| anyhow::anyhow!("transcript target {} did not resolve", target))?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self { socket, target })
    }
}

impl TranscriptSink for TranscriptBridge {
    fn show(&self, msg: &ControlMessage) {
        LogTranscript.show(msg);
        if let Err(e) = self.socket.try_send_to(msg.to_json().as_bytes(), self.target) {
            log::warn!("Failed to send to transcript display: {}", e);
        }
    }
}
