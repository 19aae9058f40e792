//! Recognizer protocol messages
//!
//! Requests arriving from the call controller, and the responses and
//! events sent back for them. The byte encoding belongs to the
//! transport; these types are what crosses the engine boundary.

use crate::error::{RecogError, RecogResult};
use serde::{Deserialize, Serialize};

/// Content type of recognition result bodies
pub const NLSML_CONTENT_TYPE: &str = "application/x-nlsml";

/// Handle of a channel in the engine's channel table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Method {
    SetParams,
    GetParams,
    DefineGrammar,
    Recognize,
    GetResult,
    StartInputTimers,
    Stop,
}

/// Recognizer headers understood by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecogHeaders {
    /// Milliseconds without speech before a no-input-timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_input_timeout: Option<u64>,
    /// Milliseconds of silence after speech that complete the utterance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_complete_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_input_timers: Option<bool>,
}

impl RecogHeaders {
    /// Headers present in `other` override ours
    pub fn merged(&self, other: &RecogHeaders) -> RecogHeaders {
        RecogHeaders {
            no_input_timeout: other.no_input_timeout.or(self.no_input_timeout),
            speech_complete_timeout: other
                .speech_complete_timeout
                .or(self.speech_complete_timeout),
            start_input_timers: other.start_input_timers.or(self.start_input_timers),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    pub session_id: String,
    #[serde(default)]
    pub headers: RecogHeaders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Request {
    pub fn new(id: RequestId, method: Method, session_id: &str) -> Self {
        Self {
            id,
            method,
            session_id: session_id.to_string(),
            headers: RecogHeaders::default(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: RecogHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    Success,
    MethodNotValid,
    MethodFailed,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            StatusCode::Success => 200,
            StatusCode::MethodNotValid => 402,
            StatusCode::MethodFailed => 407,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestState {
    Pending,
    InProgress,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionCause {
    Success,
    NoMatch,
    NoInputTimeout,
    GrammarLoadFailure,
    Error,
}

impl CompletionCause {
    pub fn code(&self) -> u16 {
        match self {
            CompletionCause::Success => 0,
            CompletionCause::NoMatch => 1,
            CompletionCause::NoInputTimeout => 2,
            CompletionCause::GrammarLoadFailure => 4,
            CompletionCause::Error => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    pub method: Method,
    pub status: StatusCode,
    pub state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_cause: Option<CompletionCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<RecogHeaders>,
    /// Requests terminated by a STOP
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_requests: Vec<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Response {
    /// Successful, complete response to `request`
    pub fn new(request: &Request) -> Self {
        Self {
            request_id: request.id,
            method: request.method,
            status: StatusCode::Success,
            state: RequestState::Complete,
            completion_cause: None,
            headers: None,
            active_requests: Vec::new(),
            content_type: None,
            body: None,
        }
    }

    pub fn failed(request: &Request, status: StatusCode) -> Self {
        Self {
            status,
            ..Self::new(request)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EventKind {
    StartOfInput,
    IntermediateResult,
    RecognitionComplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub request_id: RequestId,
    pub kind: EventKind,
    pub state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_cause: Option<CompletionCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Event {
    pub fn start_of_input(request_id: RequestId) -> Self {
        Self {
            request_id,
            kind: EventKind::StartOfInput,
            state: RequestState::InProgress,
            completion_cause: None,
            content_type: None,
            body: None,
        }
    }

    pub fn intermediate_result(request_id: RequestId, text: &str) -> Self {
        Self {
            request_id,
            kind: EventKind::IntermediateResult,
            state: RequestState::InProgress,
            completion_cause: None,
            content_type: Some("text/plain".to_string()),
            body: Some(text.to_string()),
        }
    }

    pub fn recognition_complete(request_id: RequestId, cause: CompletionCause) -> Self {
        Self {
            request_id,
            kind: EventKind::RecognitionComplete,
            state: RequestState::Complete,
            completion_cause: Some(cause),
            content_type: None,
            body: None,
        }
    }
}

/// Everything the engine sends back to the call controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "channel_opened")]
    ChannelOpened { channel: ChannelId, success: bool },

    #[serde(rename = "channel_closed")]
    ChannelClosed { channel: ChannelId },

    #[serde(rename = "response")]
    Response {
        channel: ChannelId,
        response: Response,
    },

    #[serde(rename = "event")]
    Event { channel: ChannelId, event: Event },
}

/// Outbound path toward the call controller
pub trait MessageSink: Send + Sync {
    fn send(&self, message: Message) -> RecogResult<()>;
}

impl MessageSink for std::sync::mpsc::Sender<Message> {
    fn send(&self, message: Message) -> RecogResult<()> {
        std::sync::mpsc::Sender::send(self, message)
            .map_err(|e| RecogError::Sink(format!("receiver dropped: {}", e)))
    }
}

impl MessageSink for tokio::sync::mpsc::UnboundedSender<Message> {
    fn send(&self, message: Message) -> RecogResult<()> {
        tokio::sync::mpsc::UnboundedSender::send(self, message)
            .map_err(|e| RecogError::Sink(format!("receiver dropped: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialize() {
        let json = r#"{"id":7,"method":"START-INPUT-TIMERS","session_id":"s1"}"#;
        let req: Request = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, Method::StartInputTimers);
        assert_eq!(req.headers, RecogHeaders::default());
        assert!(req.body.is_none());
    }

    #[test]
    fn test_event_serialize() {
        let msg = Message::Event {
            channel: ChannelId(3),
            event: Event::recognition_complete(9, CompletionCause::NoInputTimeout),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("RECOGNITION-COMPLETE"));
        assert!(json.contains("no-input-timeout"));
        assert!(!json.contains("body"));
    }

    #[test]
    fn test_headers_merge() {
        let defaults = RecogHeaders {
            no_input_timeout: Some(3000),
            speech_complete_timeout: Some(800),
            start_input_timers: None,
        };
        let request = RecogHeaders {
            no_input_timeout: Some(1000),
            ..Default::default()
        };
        let merged = defaults.merged(&request);
        assert_eq!(merged.no_input_timeout, Some(1000));
        assert_eq!(merged.speech_complete_timeout, Some(800));
        assert_eq!(merged.start_input_timers, None);
    }

    #[test]
    fn test_codes() {
        assert_eq!(StatusCode::MethodFailed.code(), 407);
        assert_eq!(CompletionCause::NoInputTimeout.code(), 2);
    }

    #[test]
    fn test_sink_reports_dropped_receiver() {
        let (tx, rx) = std::sync::mpsc::channel::<Message>();
        drop(rx);
        let result = MessageSink::send(&tx, Message::ChannelClosed { channel: ChannelId(1) });
        assert!(matches!(result, Err(RecogError::Sink(_))));
    }
}
