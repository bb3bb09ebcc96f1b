//! Turn-taking integration tests
//!
//! Drives a full session with fake capture, renderer and transcript sinks
//! under paused tokio time; no audio hardware or network needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use voice_turn::audio::{CaptureSource, Payload, PlaybackUnit, Renderer};
use voice_turn::net_link::{ChannelState, NetCommand, NetEvent};
use voice_turn::transcript_bridge::TranscriptSink;
use voice_turn::{
    ControlMessage, DownlinkMode, FailureReason, RenderError, Session, SessionError, Step,
    TurnCoordinator, TurnSettings, TurnState,
};

const GRACE: Duration = Duration::from_millis(500);
const UNMUTE: &str = r#"{"type":"unmute"}"#;

// ======================== Fakes ========================

#[derive(Default)]
struct CaptureState {
    deny: bool,
    held: bool,
    releases: u32,
    blocks: Option<mpsc::Sender<Vec<f32>>>,
}

struct FakeCapture(Arc<Mutex<CaptureState>>);

impl CaptureSource for FakeCapture {
    fn open(&mut self) -> Result<u32, SessionError> {
        let mut s = self.0.lock().unwrap();
        if s.deny {
            return Err(SessionError::DeviceDenied("permission refused".into()));
        }
        s.held = true;
        Ok(16000)
    }

    fn start(&mut self, _frame_size: usize, blocks: mpsc::Sender<Vec<f32>>) -> anyhow::Result<()> {
        self.0.lock().unwrap().blocks = Some(blocks);
        Ok(())
    }

    fn stop(&mut self) {
        let mut s = self.0.lock().unwrap();
        s.blocks = None;
        if s.held {
            s.held = false;
            s.releases += 1;
        }
    }
}

#[derive(Debug, Clone)]
struct RenderRecord {
    label: String,
    started: Instant,
    finished: Option<Instant>,
}

struct FakeRenderer {
    duration: Duration,
    records: Mutex<Vec<RenderRecord>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    cancelled: AtomicUsize,
}

impl FakeRenderer {
    fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            records: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        })
    }

    fn labels(&self) -> Vec<String> {
        self.records.lock().unwrap().iter().map(|r| r.label.clone()).collect()
    }

    fn records(&self) -> Vec<RenderRecord> {
        self.records.lock().unwrap().clone()
    }
}

/// Tracks one render; if dropped before `done`, the render was cancelled.
struct ActiveGuard<'a> {
    renderer: &'a FakeRenderer,
    index: usize,
    done: bool,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.renderer.active.fetch_sub(1, Ordering::SeqCst);
        if self.done {
            self.renderer.records.lock().unwrap()[self.index].finished = Some(Instant::now());
        } else {
            self.renderer.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, unit: &PlaybackUnit) -> Result<(), RenderError> {
        let label = match &unit.payload {
            Payload::Speech(text) => text.clone(),
            Payload::Audio(data) => format!("audio:{}", data.len()),
        };
        let index = {
            let mut records = self.records.lock().unwrap();
            records.push(RenderRecord {
                label: label.clone(),
                started: Instant::now(),
                finished: None,
            });
            records.len() - 1
        };
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let mut guard = ActiveGuard {
            renderer: self,
            index,
            done: false,
        };

        tokio::time::sleep(self.duration).await;
        guard.done = true;

        if label.starts_with("fail") {
            Err(RenderError::Synthesis("voice unavailable".into()))
        } else {
            Ok(())
        }
    }
}

struct FakeTranscript(Arc<Mutex<Vec<ControlMessage>>>);

impl TranscriptSink for FakeTranscript {
    fn show(&self, msg: &ControlMessage) {
        self.0.lock().unwrap().push(msg.clone());
    }
}

// ======================== Harness ========================

struct Harness {
    session: Session,
    net: mpsc::Sender<NetEvent>,
    commands: mpsc::Receiver<NetCommand>,
    capture: Arc<Mutex<CaptureState>>,
    renderer: Arc<FakeRenderer>,
    transcript: Arc<Mutex<Vec<ControlMessage>>>,
}

fn harness_with(mode: DownlinkMode, render: Duration, deny: bool) -> Harness {
    let capture = Arc::new(Mutex::new(CaptureState {
        deny,
        ..Default::default()
    }));
    let renderer = FakeRenderer::new(render);
    let transcript = Arc::new(Mutex::new(Vec::new()));
    let settings = TurnSettings {
        frame_size: 4,
        unmute_grace: GRACE,
        downlink_mode: mode,
    };
    let (session, links) = Session::new(
        settings,
        Box::new(FakeCapture(capture.clone())),
        renderer.clone(),
        Box::new(FakeTranscript(transcript.clone())),
    );
    Harness {
        session,
        net: links.net_events,
        commands: links.net_commands,
        capture,
        renderer,
        transcript,
    }
}

fn harness(render: Duration) -> Harness {
    harness_with(DownlinkMode::Speech, render, false)
}

impl Harness {
    fn coordinator(&self) -> &TurnCoordinator {
        self.session.coordinator()
    }

    async fn open(&mut self) {
        assert_eq!(self.session.start(), Ok(16000));
        assert_eq!(self.coordinator().state(), TurnState::Connecting);
        self.net_event(NetEvent::Connected).await;
        assert_eq!(self.coordinator().state(), TurnState::Listening);
    }

    async fn net_event(&mut self, event: NetEvent) {
        self.net.send(event).await.unwrap();
        assert!(matches!(self.session.step().await, Step::Continue | Step::Ended(_)));
    }

    async fn speak(&mut self, text: &str) {
        let msg = ControlMessage::Speak { text: text.into() }.to_json();
        self.net_event(NetEvent::Text(msg)).await;
    }

    async fn push_block(&mut self) {
        let tx = self.capture.lock().unwrap().blocks.clone().expect("capture not started");
        tx.try_send(vec![0.25, -0.25, 0.5, -0.5]).unwrap();
        self.session.step().await;
    }

    async fn step_until(&mut self, pred: impl Fn(&TurnCoordinator) -> bool) {
        for _ in 0..100 {
            if pred(self.coordinator()) {
                return;
            }
            if let Step::Ended(_) = self.session.step().await {
                break;
            }
        }
        assert!(pred(self.coordinator()), "condition never reached");
    }

    fn drain_commands(&mut self) -> Vec<NetCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }
}

fn count_unmutes(cmds: &[NetCommand]) -> usize {
    cmds.iter()
        .filter(|c| matches!(c, NetCommand::SendText(t) if t == UNMUTE))
        .count()
}

fn count_binary(cmds: &[NetCommand]) -> usize {
    cmds.iter()
        .filter(|c| matches!(c, NetCommand::SendBinary(_)))
        .count()
}

// ======================== Tests ========================

#[tokio::test(start_paused = true)]
async fn test_uplink_flows_while_listening() {
    let mut h = harness(Duration::from_millis(200));
    h.open().await;
    assert!(!h.coordinator().is_muted());

    h.push_block().await;
    h.push_block().await;

    let cmds = h.drain_commands();
    assert_eq!(count_binary(&cmds), 2);
    match &cmds[0] {
        NetCommand::SendBinary(b) => {
            assert_eq!(b.len(), 8);
            assert_eq!(&b[4..], &[0x00, 0x40, 0x00, 0xc0]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_gate_set_same_turn_as_playback_starts() {
    let mut h = harness(Duration::from_secs(1));
    h.open().await;

    h.speak("hello").await;
    assert_eq!(h.coordinator().state(), TurnState::Speaking);
    assert!(h.coordinator().is_muted());

    h.push_block().await;
    h.push_block().await;
    assert_eq!(count_binary(&h.drain_commands()), 0);
    assert_eq!(h.coordinator().uplink_stats().muted, 2);
}

#[tokio::test(start_paused = true)]
async fn test_block_in_flight_when_playback_starts_is_not_sent() {
    let mut h = harness(Duration::from_secs(1));
    h.open().await;

    // Block captured while still listening, not yet picked up by the loop
    let tx = h.capture.lock().unwrap().blocks.clone().unwrap();
    tx.try_send(vec![0.25, -0.25, 0.5, -0.5]).unwrap();
    let msg = ControlMessage::Speak { text: "hello".into() }.to_json();
    h.net.send(NetEvent::Text(msg)).await.unwrap();

    h.session.step().await;
    h.session.step().await;

    assert_eq!(h.coordinator().state(), TurnState::Speaking);
    assert_eq!(count_binary(&h.drain_commands()), 0);
    assert_eq!(h.coordinator().uplink_stats().muted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_capture_never_buffers_more_than_one_block() {
    let mut h = harness(Duration::from_millis(100));
    h.open().await;

    let tx = h.capture.lock().unwrap().blocks.clone().unwrap();
    assert!(tx.try_send(vec![0.1; 4]).is_ok());
    assert!(tx.try_send(vec![0.2; 4]).is_err());

    h.session.step().await;
    let cmds = h.drain_commands();
    assert_eq!(count_binary(&cmds), 1);
    assert_eq!(h.coordinator().uplink_stats().sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_three_directives_render_in_order_then_one_unmute() {
    let mut h = harness(Duration::from_millis(300));
    h.open().await;

    h.speak("A").await;
    h.speak("B").await;
    h.speak("C").await;

    h.step_until(|c| c.state() == TurnState::Listening).await;
    let unmuted_at = Instant::now();

    assert_eq!(h.renderer.labels(), vec!["A", "B", "C"]);
    assert_eq!(h.renderer.max_active.load(Ordering::SeqCst), 1);

    let records = h.renderer.records();
    for pair in records.windows(2) {
        assert!(pair[1].started >= pair[0].finished.unwrap());
    }
    let c_finished = records[2].finished.unwrap();
    assert!(unmuted_at >= c_finished + GRACE);

    let cmds = h.drain_commands();
    assert_eq!(count_unmutes(&cmds), 1);
    assert!(!h.coordinator().is_muted());
}

#[tokio::test(start_paused = true)]
async fn test_render_error_does_not_stall_queue() {
    let mut h = harness(Duration::from_millis(100));
    h.open().await;

    h.speak("fail-first").await;
    h.speak("second").await;

    h.step_until(|c| c.state() == TurnState::Listening).await;
    assert_eq!(h.renderer.labels(), vec!["fail-first", "second"]);
    assert_eq!(count_unmutes(&h.drain_commands()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_directive_during_grace_cancels_pending_unmute() {
    let mut h = harness(Duration::from_secs(1));
    h.open().await;

    h.speak("prior").await;
    h.step_until(|c| c.grace_deadline().is_some()).await;
    let prior_deadline = h.coordinator().grace_deadline().unwrap();

    tokio::time::advance(Duration::from_millis(100)).await;
    h.speak("D").await;
    assert_eq!(h.coordinator().grace_deadline(), None);
    assert_eq!(h.coordinator().state(), TurnState::Speaking);
    assert!(h.coordinator().is_muted());

    h.step_until(|c| c.state() == TurnState::Listening).await;
    let unmuted_at = Instant::now();

    let records = h.renderer.records();
    assert_eq!(records.len(), 2);
    let d_finished = records[1].finished.unwrap();
    assert!(d_finished > prior_deadline);
    assert!(unmuted_at >= d_finished + GRACE);
    assert_eq!(count_unmutes(&h.drain_commands()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_while_busy_does_not_preempt() {
    let mut h = harness(Duration::from_millis(400));
    h.open().await;

    h.speak("first").await;
    tokio::time::advance(Duration::from_millis(100)).await;
    h.speak("second").await;

    h.step_until(|c| c.state() == TurnState::Listening).await;
    let records = h.renderer.records();
    assert!(records[0].finished.unwrap() - records[0].started >= Duration::from_millis(400));
    assert!(records[1].started >= records[0].finished.unwrap());
    assert_eq!(h.renderer.cancelled.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_render_releases_everything_once() {
    let mut h = harness(Duration::from_secs(2));
    h.open().await;
    h.push_block().await;

    h.speak("long answer").await;
    h.speak("queued").await;
    tokio::time::advance(Duration::from_millis(100)).await;

    h.session.stop();
    h.session.stop();
    assert_eq!(h.coordinator().state(), TurnState::Disconnected);
    assert_eq!(h.coordinator().channel_state(), ChannelState::Closed);
    assert!(!h.coordinator().is_playing());

    // Let the aborted render task unwind
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.renderer.cancelled.load(Ordering::SeqCst), 1);
    assert_eq!(h.renderer.labels(), vec!["long answer"]);

    let cmds = h.drain_commands();
    assert_eq!(count_binary(&cmds), 1);
    assert_eq!(cmds.iter().filter(|c| matches!(c, NetCommand::Close)).count(), 1);
    assert_eq!(h.capture.lock().unwrap().releases, 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(matches!(h.session.step().await, Step::Ended(Ok(()))));
    assert!(h.drain_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_grace_sends_no_unmute() {
    let mut h = harness(Duration::from_millis(100));
    h.open().await;

    h.speak("bye").await;
    h.step_until(|c| c.grace_deadline().is_some()).await;
    h.session.stop();

    tokio::time::sleep(GRACE * 2).await;
    assert!(matches!(h.session.step().await, Step::Ended(Ok(()))));
    assert_eq!(count_unmutes(&h.drain_commands()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_device_denied_fails_before_connecting() {
    let mut h = harness_with(DownlinkMode::Speech, Duration::from_millis(100), true);

    let err = h.session.start().unwrap_err();
    assert!(matches!(err, SessionError::DeviceDenied(_)));
    assert_eq!(h.coordinator().state(), TurnState::Failed(FailureReason::DeviceDenied));
    assert_eq!(h.coordinator().channel_state(), ChannelState::Idle);

    match h.session.step().await {
        Step::Ended(Err(SessionError::DeviceDenied(_))) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(h.drain_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_is_fatal() {
    let mut h = harness(Duration::from_secs(1));
    h.open().await;
    h.speak("hello").await;

    h.net_event(NetEvent::Error("connection reset".into())).await;
    assert_eq!(h.coordinator().state(), TurnState::Failed(FailureReason::Transport));
    assert!(!h.coordinator().is_playing());
    assert_eq!(h.capture.lock().unwrap().releases, 1);

    match h.session.run().await {
        Err(SessionError::Transport(reason)) => assert_eq!(reason, "connection reset"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_disconnects() {
    let mut h = harness(Duration::from_millis(100));
    h.open().await;

    h.net_event(NetEvent::Closed(Some("bye".into()))).await;
    assert_eq!(h.coordinator().state(), TurnState::Disconnected);
    assert_eq!(h.session.run().await, Ok(()));

    // Peer already closed it; nothing left to release on our side
    assert!(h.drain_commands().iter().all(|c| !matches!(c, NetCommand::Close)));
    assert_eq!(h.capture.lock().unwrap().releases, 1);
}

#[tokio::test(start_paused = true)]
async fn test_display_frames_go_to_transcript_only() {
    let mut h = harness(Duration::from_millis(100));
    h.open().await;

    let transcript = ControlMessage::Transcript { text: "book a meeting".into() };
    let response = ControlMessage::Response { text: "for when?".into() };
    h.net_event(NetEvent::Text(transcript.to_json())).await;
    h.net_event(NetEvent::Text(response.to_json())).await;
    h.net_event(NetEvent::Text(r#"{"type":"hello"}"#.into())).await;

    assert_eq!(*h.transcript.lock().unwrap(), vec![transcript, response]);
    assert_eq!(h.coordinator().state(), TurnState::Listening);
    assert!(h.renderer.labels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_binary_downlink_depends_on_mode() {
    let mut h = harness(Duration::from_millis(100));
    h.open().await;
    h.net_event(NetEvent::Binary(Bytes::from_static(&[0; 64]))).await;
    assert_eq!(h.coordinator().state(), TurnState::Listening);
    assert!(h.renderer.labels().is_empty());

    let mut h = harness_with(DownlinkMode::Audio, Duration::from_millis(100), false);
    h.open().await;
    h.net_event(NetEvent::Binary(Bytes::from_static(&[0; 64]))).await;
    assert_eq!(h.coordinator().state(), TurnState::Speaking);
    h.step_until(|c| c.state() == TurnState::Listening).await;
    assert_eq!(h.renderer.labels(), vec!["audio:64"]);
}

#[tokio::test(start_paused = true)]
async fn test_many_units_render_exactly_once_each() {
    let mut h = harness(Duration::from_millis(50));
    h.open().await;

    let texts: Vec<String> = (0..6).map(|i| format!("unit-{i}")).collect();
    for t in &texts {
        h.speak(t).await;
    }
    h.step_until(|c| c.state() == TurnState::Listening).await;

    assert_eq!(h.renderer.labels(), texts);
    assert_eq!(h.renderer.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(count_unmutes(&h.drain_commands()), 1);
}
