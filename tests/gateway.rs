//! Gateway pipeline scenarios: batched edits, error translation, and
//! idempotent processing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cynosure::a2a::client::TextStream;
use cynosure::error::CoreError;
use cynosure::gateway::GatewayService;
use cynosure::gateway::ports::{Agent, Messenger};
use cynosure::gateway::types::{ChannelId, InboundMessage, MessageId, MessageText, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outbound {
    Typing,
    Send(String),
    Edit(String),
}

#[derive(Default)]
struct RecordingMessenger {
    calls: Mutex<Vec<Outbound>>,
    sent_counter: Mutex<u64>,
}

impl RecordingMessenger {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn calls(&self) -> Vec<Outbound> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(
        &self,
        channel: &ChannelId,
        text: &MessageText,
    ) -> Result<MessageId, CoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(Outbound::Send(text.text().to_string()));

        let mut counter = self.sent_counter.lock().unwrap();
        *counter += 1;
        MessageId::new(channel.clone(), counter.to_string())
    }

    async fn update_message(
        &self,
        _message: &MessageId,
        text: &MessageText,
    ) -> Result<(), CoreError> {
        self.calls
            .lock()
            .unwrap()
            .push(Outbound::Edit(text.text().to_string()));
        Ok(())
    }

    async fn notify_processing_started(&self, _channel: &ChannelId) -> Result<(), CoreError> {
        self.calls.lock().unwrap().push(Outbound::Typing);
        Ok(())
    }
}

/// Yields scripted chunks with a fixed delay between them.
struct PacedAgent {
    chunks: Vec<Result<String, CoreError>>,
    delay: Duration,
}

impl PacedAgent {
    fn new(chunks: Vec<Result<String, CoreError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self { chunks, delay })
    }
}

#[async_trait]
impl Agent for PacedAgent {
    async fn send_message(
        &self,
        _message: &MessageId,
        _text: &MessageText,
    ) -> Result<TextStream, CoreError> {
        let chunks = self.chunks.clone();
        let delay = self.delay;

        Ok(Box::pin(async_stream::stream! {
            for chunk in chunks {
                tokio::time::sleep(delay).await;
                yield chunk;
            }
        }))
    }
}

struct FailingAgent;

#[async_trait]
impl Agent for FailingAgent {
    async fn send_message(
        &self,
        _message: &MessageId,
        _text: &MessageText,
    ) -> Result<TextStream, CoreError> {
        Err(CoreError::unavailable("a2a is down"))
    }
}

fn inbound(text: Option<&str>) -> InboundMessage {
    let channel = ChannelId::new("telegram", "1200").unwrap();
    InboundMessage::new(
        MessageId::new(channel, "7").unwrap(),
        UserId::new("telegram", "99").unwrap(),
        text.map(|text| MessageText::new(text).unwrap()),
    )
}

#[tokio::test]
async fn batched_edit_loop_sends_then_edits() {
    let messenger = RecordingMessenger::new();
    let chunks: Vec<Result<String, CoreError>> =
        (0..20).map(|index| Ok(format!("chunk-{index:02} "))).collect();
    let agent = PacedAgent::new(chunks, Duration::from_millis(10));

    let service = GatewayService::new(messenger.clone(), agent)
        .with_update_interval(Duration::from_millis(50));

    service
        .receive_new_message_event(&inbound(Some("stream please")))
        .await
        .unwrap();

    let calls = messenger.calls();
    assert_eq!(calls[0], Outbound::Typing);
    assert!(matches!(calls[1], Outbound::Send(_)));

    let edits: Vec<&String> = calls
        .iter()
        .filter_map(|call| match call {
            Outbound::Edit(text) => Some(text),
            _ => None,
        })
        .collect();
    assert!(
        edits.len() >= 2,
        "expected periodic edits plus a final one, got {calls:?}"
    );

    // Every edit extends the previous text; the last one carries everything.
    let mut previous = match &calls[1] {
        Outbound::Send(text) => text.clone(),
        _ => unreachable!(),
    };
    for edit in &edits {
        assert!(
            edit.starts_with(&previous),
            "edit {edit:?} does not extend {previous:?}"
        );
        previous = (*edit).clone();
    }

    let full: String = (0..20).map(|index| format!("chunk-{index:02} ")).collect();
    assert_eq!(edits.last().unwrap().as_str(), full);
}

#[tokio::test]
async fn short_stream_gets_one_send_and_final_edit() {
    let messenger = RecordingMessenger::new();
    let agent = PacedAgent::new(
        vec![Ok("Hello".to_string()), Ok(" world".to_string())],
        Duration::from_millis(1),
    );

    let service = GatewayService::new(messenger.clone(), agent)
        .with_update_interval(Duration::from_secs(3));

    service
        .receive_new_message_event(&inbound(Some("hi")))
        .await
        .unwrap();

    assert_eq!(
        messenger.calls(),
        vec![
            Outbound::Typing,
            Outbound::Send("Hello".to_string()),
            Outbound::Edit("Hello world".to_string()),
        ]
    );
}

#[tokio::test]
async fn non_text_message_is_a_noop() {
    let messenger = RecordingMessenger::new();
    let agent = PacedAgent::new(vec![Ok("unused".to_string())], Duration::ZERO);
    let service = GatewayService::new(messenger.clone(), agent);

    service.receive_new_message_event(&inbound(None)).await.unwrap();

    assert!(messenger.calls().is_empty());
}

#[tokio::test]
async fn synchronous_failure_sends_friendly_message() {
    let messenger = RecordingMessenger::new();
    let service = GatewayService::new(messenger.clone(), Arc::new(FailingAgent));

    let err = service
        .receive_new_message_event(&inbound(Some("hi")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unavailable(_)));

    let calls = messenger.calls();
    assert_eq!(calls.len(), 2);
    match &calls[1] {
        Outbound::Send(text) => assert!(text.starts_with('🔌'), "got {text:?}"),
        other => panic!("expected friendly send, got {other:?}"),
    }
}

#[tokio::test]
async fn mid_stream_failure_edits_partial_reply() {
    let messenger = RecordingMessenger::new();
    let agent = PacedAgent::new(
        vec![
            Ok("partial ".to_string()),
            Err(CoreError::RateLimited("busy".into())),
        ],
        Duration::from_millis(1),
    );
    let service = GatewayService::new(messenger.clone(), agent);

    let err = service
        .receive_new_message_event(&inbound(Some("hi")))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RateLimited(_)));

    let calls = messenger.calls();
    match calls.last().unwrap() {
        Outbound::Edit(text) => assert!(text.starts_with('⚠'), "got {text:?}"),
        other => panic!("expected friendly edit, got {other:?}"),
    }
}

#[tokio::test]
async fn identical_updates_produce_identical_call_sequences() {
    let make_service = || {
        let messenger = RecordingMessenger::new();
        let agent = PacedAgent::new(
            vec![Ok("deterministic".to_string())],
            Duration::from_millis(1),
        );
        (messenger.clone(), GatewayService::new(messenger, agent))
    };

    let (first_messenger, first_service) = make_service();
    first_service
        .receive_new_message_event(&inbound(Some("same update")))
        .await
        .unwrap();

    let (second_messenger, second_service) = make_service();
    second_service
        .receive_new_message_event(&inbound(Some("same update")))
        .await
        .unwrap();

    assert_eq!(first_messenger.calls(), second_messenger.calls());
}
