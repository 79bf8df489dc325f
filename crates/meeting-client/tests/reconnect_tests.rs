//! Reconnecting client behavior against a scripted connector.
//!
//! Uses tokio's paused clock so backoff and timeout durations are exact:
//! - Exponential backoff (1s, 2s, 4s, 8s, 16s) then terminal failure
//! - Connect timeout followed by a retry
//! - Clean close and explicit disconnect never retry
//! - Frame decoding, `send` gating and drop teardown

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::wire::{BroadcastMessage, ServerFrame};
use meeting_client::{
    ChannelHandle, ClientConfig, ClientError, ClientEvent, Connector, FailureReason,
    InboundEvent, ReconnectingClient, SessionState,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

// ============================================================================
// Scripted connector
// ============================================================================

enum Step {
    Accept,
    Refuse,
    Hang,
}

/// Server side of an accepted channel.
struct RemoteEnd {
    to_client: mpsc::Sender<InboundEvent>,
    from_client: mpsc::Receiver<String>,
}

struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Instant, String, String)>>,
    remotes: mpsc::UnboundedSender<RemoteEnd>,
}

impl ScriptedConnector {
    fn new(steps: Vec<Step>) -> (Arc<Self>, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, remotes_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
            remotes,
        });
        (connector, remotes_rx)
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|c| c.0).collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        meeting_id: &str,
        participant_id: &str,
    ) -> Result<ChannelHandle, ClientError> {
        self.calls.lock().unwrap().push((
            Instant::now(),
            meeting_id.to_string(),
            participant_id.to_string(),
        ));
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Accept);

        match step {
            Step::Accept => {
                let (to_client, inbound) = mpsc::channel(16);
                let (outbound, from_client) = mpsc::channel(16);
                let _ = self.remotes.send(RemoteEnd {
                    to_client,
                    from_client,
                });
                Ok(ChannelHandle { outbound, inbound })
            }
            Step::Refuse => Err(ClientError::ConnectFailed("refused".to_string())),
            Step::Hang => std::future::pending().await,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn config() -> ClientConfig {
    ClientConfig::new("ws://unused.invalid/ws")
}

async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    matches: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

fn state_is(state: SessionState) -> impl Fn(&ClientEvent) -> bool {
    move |event| *event == ClientEvent::StateChanged(state)
}

fn message_frame(content: &str) -> String {
    ServerFrame::Message(BroadcastMessage {
        message_id: "msg-1".to_string(),
        meeting_id: "m1".to_string(),
        participant_id: "p2".to_string(),
        participant_name: "Grace".to_string(),
        content: content.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        like_count: 0,
        reported_count: 0,
        is_active: true,
    })
    .encode()
    .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_connect_opens_with_ids_and_delivers_messages() {
    let (connector, mut remotes) = ScriptedConnector::new(vec![Step::Accept]);
    let client = ReconnectingClient::with_connector(config(), connector.clone());
    let mut events = client.subscribe();

    client.connect("m1", "p1").await.unwrap();
    wait_for(&mut events, state_is(SessionState::Open)).await;

    {
        let calls = connector.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "m1");
        assert_eq!(calls[0].2, "p1");
    }

    let mut remote = remotes.recv().await.unwrap();
    remote
        .to_client
        .send(InboundEvent::Frame(message_frame("hello")))
        .await
        .unwrap();

    match wait_for(&mut events, |e| matches!(e, ClientEvent::Message(_))).await {
        ClientEvent::Message(message) => assert_eq!(message.content, "hello"),
        other => panic!("unexpected event: {other:?}"),
    }

    client.send("ping").await.unwrap();
    assert_eq!(remote.from_client.recv().await.unwrap(), "ping");
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_noop_while_connecting() {
    let (connector, _remotes) = ScriptedConnector::new(vec![Step::Hang]);
    let client = ReconnectingClient::with_connector(config(), connector.clone());

    client.connect("m1", "p1").await.unwrap();
    client.connect("m1", "p1").await.unwrap();
    assert_eq!(client.state().await.unwrap(), SessionState::Connecting);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.call_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_backs_off_exponentially_then_fails() {
    let (connector, mut remotes) = ScriptedConnector::new(vec![
        Step::Accept,
        Step::Refuse,
        Step::Refuse,
        Step::Refuse,
        Step::Refuse,
        Step::Refuse,
    ]);
    let client = ReconnectingClient::with_connector(config(), connector.clone());
    let mut events = client.subscribe();

    client.connect("m1", "p1").await.unwrap();
    wait_for(&mut events, state_is(SessionState::Open)).await;

    let remote = remotes.recv().await.unwrap();
    remote
        .to_client
        .send(InboundEvent::Closed { code: Some(1006) })
        .await
        .unwrap();

    let failure = wait_for(&mut events, |e| {
        matches!(e, ClientEvent::Error(ClientError::MaxRetriesExceeded { .. }))
    })
    .await;
    assert_eq!(
        failure,
        ClientEvent::Error(ClientError::MaxRetriesExceeded { attempts: 5 })
    );
    assert_eq!(
        client.state().await.unwrap(),
        SessionState::Failed(FailureReason::MaxAttempts)
    );

    let times = connector.call_times();
    assert_eq!(times.len(), 6, "initial open plus five retries");
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec());

    // Terminal: nothing else is scheduled.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.call_times().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_surfaces_error_then_retries() {
    let (connector, _remotes) = ScriptedConnector::new(vec![Step::Hang, Step::Accept]);
    let client = ReconnectingClient::with_connector(config(), connector.clone());
    let mut events = client.subscribe();

    client.connect("m1", "p1").await.unwrap();

    wait_for(&mut events, |e| {
        *e == ClientEvent::Error(ClientError::ConnectionTimeout)
    })
    .await;
    wait_for(
        &mut events,
        state_is(SessionState::Failed(FailureReason::Timeout)),
    )
    .await;
    wait_for(&mut events, state_is(SessionState::ClosedAbnormal)).await;
    wait_for(&mut events, state_is(SessionState::Open)).await;

    let times = connector.call_times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[1] - times[0], Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn test_clean_close_does_not_retry() {
    let (connector, mut remotes) = ScriptedConnector::new(vec![Step::Accept]);
    let client = ReconnectingClient::with_connector(config(), connector.clone());
    let mut events = client.subscribe();

    client.connect("m1", "p1").await.unwrap();
    wait_for(&mut events, state_is(SessionState::Open)).await;

    let remote = remotes.recv().await.unwrap();
    remote
        .to_client
        .send(InboundEvent::Closed { code: Some(1000) })
        .await
        .unwrap();

    wait_for(&mut events, state_is(SessionState::ClosedClean)).await;
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.call_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_retry() {
    let (connector, mut remotes) = ScriptedConnector::new(vec![Step::Accept]);
    let client = ReconnectingClient::with_connector(config(), connector.clone());
    let mut events = client.subscribe();

    client.connect("m1", "p1").await.unwrap();
    wait_for(&mut events, state_is(SessionState::Open)).await;

    let remote = remotes.recv().await.unwrap();
    remote
        .to_client
        .send(InboundEvent::Closed { code: None })
        .await
        .unwrap();
    wait_for(&mut events, state_is(SessionState::ClosedAbnormal)).await;

    client.disconnect().await.unwrap();
    wait_for(&mut events, state_is(SessionState::ClosedClean)).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.call_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_frame_keeps_connection() {
    let (connector, mut remotes) = ScriptedConnector::new(vec![Step::Accept]);
    let client = ReconnectingClient::with_connector(config(), connector);
    let mut events = client.subscribe();

    client.connect("m1", "p1").await.unwrap();
    wait_for(&mut events, state_is(SessionState::Open)).await;

    let remote = remotes.recv().await.unwrap();
    remote
        .to_client
        .send(InboundEvent::Frame("{\"version\":9}".to_string()))
        .await
        .unwrap();
    wait_for(&mut events, |e| {
        matches!(e, ClientEvent::Error(ClientError::Decode(_)))
    })
    .await;

    remote
        .to_client
        .send(InboundEvent::Frame(message_frame("still here")))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, ClientEvent::Message(_))).await;
    assert_eq!(client.state().await.unwrap(), SessionState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_open_channel() {
    let (connector, _remotes) = ScriptedConnector::new(vec![Step::Hang]);
    let client = ReconnectingClient::with_connector(config(), connector);

    assert_eq!(client.send("early").await, Err(ClientError::NotOpen));

    client.connect("m1", "p1").await.unwrap();
    assert_eq!(client.send("still early").await, Err(ClientError::NotOpen));
}

#[tokio::test(start_paused = true)]
async fn test_drop_closes_channel() {
    let (connector, mut remotes) = ScriptedConnector::new(vec![Step::Accept]);
    let client = ReconnectingClient::with_connector(config(), connector);
    let mut events = client.subscribe();

    client.connect("m1", "p1").await.unwrap();
    wait_for(&mut events, state_is(SessionState::Open)).await;
    let mut remote = remotes.recv().await.unwrap();

    drop(client);

    assert!(remote.from_client.recv().await.is_none());
    wait_for(&mut events, state_is(SessionState::ClosedClean)).await;
}
