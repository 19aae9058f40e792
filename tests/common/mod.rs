pub mod mock_decoder;

use mock_decoder::MockModel;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use vosk_recog::config::Config;
use vosk_recog::engine::Engine;
use vosk_recog::error::RecogResult;
use vosk_recog::protocol::{
    ChannelId, CompletionCause, Event, EventKind, Message, MessageSink, RequestId, Response,
};

pub const RATE: u32 = 8000;
/// One 20 ms frame at 8 kHz
pub const FRAME_LEN: usize = 160;
pub const SPEECH: [i16; FRAME_LEN] = [2500; FRAME_LEN];
pub const SILENCE: [i16; FRAME_LEN] = [0; FRAME_LEN];

const WAIT: Duration = Duration::from_secs(5);

/// Sink that keeps every message for inspection
#[derive(Default, Clone)]
pub struct CollectingSink {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MessageSink for CollectingSink {
    fn send(&self, message: Message) -> RecogResult<()> {
        self.messages.lock()?.push(message);
        Ok(())
    }
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    /// Poll until `predicate` holds for the collected messages
    pub fn wait_for<F>(&self, predicate: F) -> bool
    where
        F: Fn(&[Message]) -> bool,
    {
        let start = Instant::now();
        while start.elapsed() < WAIT {
            if predicate(&self.messages.lock().unwrap()) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    pub fn wait_for_response(&self, request_id: RequestId) -> Response {
        assert!(
            self.wait_for(|msgs| response_to(msgs, request_id).is_some()),
            "no response to request {}",
            request_id
        );
        response_to(&self.messages(), request_id).unwrap()
    }

    pub fn wait_for_closed(&self) {
        assert!(self.wait_for(|msgs| msgs
            .iter()
            .any(|m| matches!(m, Message::ChannelClosed { .. }))));
    }

    pub fn events(&self) -> Vec<Event> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                Message::Event { event, .. } => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<Event> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn completions(&self) -> Vec<CompletionCause> {
        self.events_of(EventKind::RecognitionComplete)
            .iter()
            .filter_map(|e| e.completion_cause)
            .collect()
    }
}

pub fn response_to(messages: &[Message], request_id: RequestId) -> Option<Response> {
    messages.iter().find_map(|m| match m {
        Message::Response { response, .. } if response.request_id == request_id => {
            Some(response.clone())
        }
        _ => None,
    })
}

/// Started engine over a mock model, plus the model's recorders
pub fn engine_with(config: Config, model: MockModel) -> (Engine, Arc<MockModel>) {
    let model = Arc::new(model);
    let engine = Engine::new(config, model.clone());
    engine.start().unwrap();
    (engine, model)
}

/// Open a channel with an 8 kHz stream and wait until it is open
pub fn open_channel(engine: &Engine) -> (ChannelId, CollectingSink) {
    let sink = CollectingSink::new();
    let id = engine.open_channel(Arc::new(sink.clone())).unwrap();
    assert!(sink.wait_for(|msgs| msgs
        .iter()
        .any(|m| matches!(m, Message::ChannelOpened { success: true, .. }))));
    engine.stream(id).unwrap().open(RATE).unwrap();
    (id, sink)
}

/// Write `ms` milliseconds of `frame` to a channel
pub fn feed(engine: &Engine, id: ChannelId, frame: &[i16], ms: u64) {
    let stream = engine.stream(id).unwrap();
    for _ in 0..ms / 20 {
        stream.write(&vosk_recog::audio::Frame::audio(frame)).unwrap();
    }
}
