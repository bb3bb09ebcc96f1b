use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::protocol::ControlMessage;

#[derive(Debug)]
pub enum NetEvent {
    Connected,
    Text(String),
    Binary(Bytes),
    /// Peer closed the channel, with its close reason if any
    Closed(Option<String>),
    Error(String),
}

#[derive(Debug)]
pub enum NetCommand {
    SendText(String),
    SendBinary(Bytes),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
    Failed,
}

/// Session-side handle on the bidirectional message channel.
///
/// Sends never block and never fail loudly: anything sent while the channel
/// is not open is dropped on the floor.
pub struct TransportChannel {
    state: ChannelState,
    tx_cmd: mpsc::Sender<NetCommand>,
}

impl TransportChannel {
    pub fn new(tx_cmd: mpsc::Sender<NetCommand>) -> Self {
        Self {
            state: ChannelState::Idle,
            tx_cmd,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn set_state(&mut self, state: ChannelState) {
        if self.state != state {
            log::debug!("Channel state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Queue one binary frame. Returns false if the frame was dropped.
    pub fn send_binary(&self, data: Bytes) -> bool {
        self.send(NetCommand::SendBinary(data))
    }

    /// Serialize and queue a control frame. Returns false if dropped.
    pub fn send_control(&self, msg: &ControlMessage) -> bool {
        self.send(NetCommand::SendText(msg.to_json()))
    }

    fn send(&self, cmd: NetCommand) -> bool {
        if !self.is_open() {
            log::trace!("Channel {:?}, dropping outbound frame", self.state);
            return false;
        }
        match self.tx_cmd.try_send(cmd) {
            Ok(()) => true,
            Err(e) => {
                log::trace!("Outbound frame dropped: {}", e);
                false
            }
        }
    }

    /// Ask the link to close. Returns true only for the call that actually
    /// released the channel.
    pub fn close(&mut self) -> bool {
        match self.state {
            ChannelState::Connecting | ChannelState::Open => {
                if let Err(e) = self.tx_cmd.try_send(NetCommand::Close) {
                    log::warn!("Failed to send close to NetLink: {}", e);
                }
                self.state = ChannelState::Closed;
                true
            }
            _ => false,
        }
    }
}

/// Build the connection URL carrying the negotiated sample rate.
pub fn connect_url(base: &str, sample_rate: u32) -> anyhow::Result<Url> {
    let mut url = Url::parse(base)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "sample_rate")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("sample_rate", &sample_rate.to_string());
    Ok(url)
}

/// Owns the WebSocket. Connects once; any failure ends the link for good.
pub struct NetLink {
    url: Url,
    tx: mpsc::Sender<NetEvent>,
    rx_cmd: mpsc::Receiver<NetCommand>,
}

impl NetLink {
    pub fn new(url: Url, tx: mpsc::Sender<NetEvent>, rx_cmd: mpsc::Receiver<NetCommand>) -> Self {
        Self { url, tx, rx_cmd }
    }

    pub async fn run(mut self) {
        match self.connect_and_loop().await {
            Ok(()) => log::info!("NetLink finished"),
            Err(e) => {
                log::error!("Connection error: {:#}", e);
                let _ = self.tx.send(NetEvent::Error(format!("{:#}", e))).await;
            }
        }
    }

    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        log::info!("Connecting to {}...", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();

        self.tx.send(NetEvent::Connected).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.tx.send(NetEvent::Text(text.to_string())).await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            self.tx.send(NetEvent::Binary(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            let reason = frame.map(|f| f.reason.to_string());
                            let _ = self.tx.send(NetEvent::Closed(reason)).await;
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            let _ = self.tx.send(NetEvent::Closed(None)).await;
                            return Ok(());
                        }
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(NetCommand::SendText(text)) => {
                            write.send(Message::Text(text.into())).await?;
                        }
                        Some(NetCommand::SendBinary(data)) => {
                            write.send(Message::Binary(data)).await?;
                        }
                        Some(NetCommand::Close) | None => {
                            log::info!("Closing connection");
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}
