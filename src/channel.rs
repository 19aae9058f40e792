//! Recognizer Channel
//!
//! Per-call recognition state. Protocol requests reach a channel through
//! the engine's task queue; audio frames arrive directly from the media
//! path. The engine never lets both touch the same channel at once.
//!
//! **Lifecycle of a request:**
//! 1. RECOGNIZE: `Idle` → `Listening`, answered in-progress right away
//! 2. speech onset: `Listening` → `Recognizing`, START-OF-INPUT
//! 3. silence, decoder endpoint, grammar early match or no-input:
//!    RECOGNITION-COMPLETE and back to `Idle`
//!
//! A STOP is held until the next frame, then answered in place of the
//! completion event.

use crate::audio::{CodecDescriptor, EventMarker, Frame, UtteranceWriter};
use crate::config::Config;
use crate::decoder::{self, AdaptationState, Decoder, DecoderModel, Transcript};
use crate::detector::{ActivityDetector, DetectorEvent};
use crate::error::{RecogError, RecogResult};
use crate::grammar::Grammar;
use crate::nlsml;
use crate::protocol::{
    ChannelId, CompletionCause, Event, Message, MessageSink, Method, RecogHeaders, Request,
    RequestState, Response, StatusCode, NLSML_CONTENT_TYPE,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Recognition state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecogState {
    /// No active request
    Idle,
    /// Request active, waiting for speech or a timeout
    Listening,
    /// Speech detected, decoding
    Recognizing,
}

/// Outcome of a request handler
#[derive(Debug)]
pub enum RequestOutcome {
    /// The handler sent the response itself, or will send it later
    Handled,
    /// The dispatcher must send this response now
    NotHandled(Response),
}

pub struct Channel {
    id: ChannelId,
    model: Arc<dyn DecoderModel>,
    config: Arc<Config>,
    sink: Option<Arc<dyn MessageSink>>,
    codec: Option<CodecDescriptor>,

    state: RecogState,
    request: Option<Request>,
    stop_response: Option<Response>,
    timers_started: bool,

    detector: ActivityDetector,
    decoder: Option<Box<dyn Decoder>>,
    grammar: Option<Grammar>,
    /// Defaults set through SET-PARAMS
    params: RecogHeaders,

    audio_out: Option<UtteranceWriter>,
    last_partial: String,
    last_result: Option<String>,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        model: Arc<dyn DecoderModel>,
        config: Arc<Config>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let detector = ActivityDetector::new(&config.detector);
        Self {
            id,
            model,
            config,
            sink: Some(sink),
            codec: None,
            state: RecogState::Idle,
            request: None,
            stop_response: None,
            timers_started: false,
            detector,
            decoder: None,
            grammar: None,
            params: RecogHeaders::default(),
            audio_out: None,
            last_partial: String::new(),
            last_result: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> RecogState {
        self.state
    }

    pub fn active_request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub fn has_pending_stop(&self) -> bool {
        self.stop_response.is_some()
    }

    pub fn has_grammar(&self) -> bool {
        self.grammar.is_some()
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn timers_started(&self) -> bool {
        self.timers_started
    }

    pub fn codec(&self) -> Option<CodecDescriptor> {
        self.codec
    }

    fn send(&self, message: Message) {
        match &self.sink {
            Some(sink) => {
                if let Err(e) = sink.send(message) {
                    warn!("[{}] Failed to send message: {}", self.id, e);
                }
            }
            None => debug!("[{}] No sink, dropping message", self.id),
        }
    }

    pub fn respond(&self, response: Response) {
        self.send(Message::Response {
            channel: self.id,
            response,
        });
    }

    fn emit(&self, event: Event) {
        self.send(Message::Event {
            channel: self.id,
            event,
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle (task path)
    // ─────────────────────────────────────────────────────────────────────

    pub fn open(&mut self) {
        info!("[{}] Channel opened", self.id);
        self.send(Message::ChannelOpened {
            channel: self.id,
            success: true,
        });
    }

    /// Release everything; an active request is abandoned without completion
    pub fn close(&mut self) {
        if let Some(response) = self.stop_response.take() {
            self.respond(response);
        }
        if let Some(request) = self.request.take() {
            info!(
                "[{}] Abandoning request {} on close",
                self.id, request.id
            );
        }
        self.state = RecogState::Idle;
        self.decoder = None;
        self.audio_out = None;
        self.codec = None;

        info!("[{}] Channel closed", self.id);
        self.send(Message::ChannelClosed { channel: self.id });
        self.sink = None;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Media stream
    // ─────────────────────────────────────────────────────────────────────

    pub fn open_stream(&mut self, sample_rate: u32) -> RecogResult<()> {
        let codec = CodecDescriptor::lpcm(sample_rate, &self.config.sample_rates)?;
        info!("[{}] Stream opened: LPCM/{}", self.id, codec.sample_rate);
        self.codec = Some(codec);
        Ok(())
    }

    pub fn close_stream(&mut self) {
        debug!("[{}] Stream closed", self.id);
        self.codec = None;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Request dispatch (task path)
    // ─────────────────────────────────────────────────────────────────────

    /// Handle one request; exactly one response is sent for it, now or later
    pub fn process_request(&mut self, request: Request) {
        debug!(
            "[{}] Processing {:?} request {}",
            self.id, request.method, request.id
        );
        let outcome = match request.method {
            Method::SetParams => self.on_set_params(&request),
            Method::GetParams => self.on_get_params(&request),
            Method::DefineGrammar => self.on_define_grammar(&request),
            Method::Recognize => self.on_recognize(request),
            Method::GetResult => self.on_get_result(&request),
            Method::StartInputTimers => self.on_start_input_timers(&request),
            Method::Stop => self.on_stop(&request),
        };
        if let RequestOutcome::NotHandled(response) = outcome {
            self.respond(response);
        }
    }

    fn on_set_params(&mut self, request: &Request) -> RequestOutcome {
        self.params = self.params.merged(&request.headers);
        debug!("[{}] Channel params now {:?}", self.id, self.params);
        RequestOutcome::NotHandled(Response::new(request))
    }

    fn on_get_params(&mut self, request: &Request) -> RequestOutcome {
        let mut response = Response::new(request);
        response.headers = Some(self.effective_headers(&RecogHeaders::default()));
        RequestOutcome::NotHandled(response)
    }

    fn on_define_grammar(&mut self, request: &Request) -> RequestOutcome {
        let parsed = request
            .body
            .as_deref()
            .ok_or_else(|| RecogError::Grammar("empty DEFINE-GRAMMAR body".to_string()))
            .and_then(Grammar::parse);

        match parsed {
            Ok(grammar) => {
                info!(
                    "[{}] Grammar defined with {} rules",
                    self.id,
                    grammar.rules().len()
                );
                self.grammar = Some(grammar);
                RequestOutcome::NotHandled(Response::new(request))
            }
            Err(e) => {
                warn!("[{}] Rejecting grammar: {}", self.id, e);
                let mut response = Response::failed(request, StatusCode::MethodFailed);
                response.completion_cause = Some(CompletionCause::GrammarLoadFailure);
                RequestOutcome::NotHandled(response)
            }
        }
    }

    fn on_recognize(&mut self, request: Request) -> RequestOutcome {
        if let Some(active) = &self.request {
            warn!(
                "[{}] RECOGNIZE {} while request {} is active",
                self.id, request.id, active.id
            );
            return RequestOutcome::NotHandled(Response::failed(
                &request,
                StatusCode::MethodNotValid,
            ));
        }

        let Some(codec) = self.codec else {
            warn!(
                "[{}] Failed to Get Codec Descriptor for request {}",
                self.id, request.id
            );
            return RequestOutcome::NotHandled(Response::failed(
                &request,
                StatusCode::MethodFailed,
            ));
        };

        let decoder = match self.decoder.take() {
            Some(previous) => decoder::renew(self.model.as_ref(), previous, codec.sample_rate),
            None => self
                .model
                .new_decoder(codec.sample_rate, AdaptationState::empty()),
        };
        match decoder {
            Ok(d) => self.decoder = Some(d),
            Err(e) => {
                error!("[{}] Failed to create decoder: {}", self.id, e);
                return RequestOutcome::NotHandled(Response::failed(
                    &request,
                    StatusCode::MethodFailed,
                ));
            }
        }

        let headers = self.effective_headers(&request.headers);
        self.timers_started = headers.start_input_timers.unwrap_or(true);
        if let Some(ms) = headers.no_input_timeout {
            self.detector.set_noinput_timeout(ms);
        }
        if let Some(ms) = headers.speech_complete_timeout {
            self.detector.set_silence_timeout(ms);
        }
        self.detector.reset();
        self.last_partial.clear();

        if self.audio_out.is_none() {
            if let Some(dir) = &self.config.utterance_dir {
                match UtteranceWriter::create(Path::new(dir), codec.sample_rate, &request.session_id) {
                    Ok(writer) => self.audio_out = Some(writer),
                    Err(e) => warn!("[{}] Failed to Open Utterance Output File: {}", self.id, e),
                }
            }
        }

        let mut response = Response::new(&request);
        response.state = RequestState::InProgress;
        self.respond(response);

        info!(
            "[{}] Recognizing request {} (timers: {}, no-input: {} ms, silence: {} ms)",
            self.id,
            request.id,
            self.timers_started,
            self.detector.noinput_timeout(),
            self.detector.silence_timeout()
        );
        self.request = Some(request);
        self.state = RecogState::Listening;
        RequestOutcome::Handled
    }

    fn on_get_result(&mut self, request: &Request) -> RequestOutcome {
        let mut response = Response::new(request);
        if let Some(body) = &self.last_result {
            response.content_type = Some(NLSML_CONTENT_TYPE.to_string());
            response.body = Some(body.clone());
        }
        RequestOutcome::NotHandled(response)
    }

    fn on_start_input_timers(&mut self, request: &Request) -> RequestOutcome {
        self.timers_started = true;
        self.respond(Response::new(request));
        RequestOutcome::Handled
    }

    fn on_stop(&mut self, request: &Request) -> RequestOutcome {
        let Some(active) = &self.request else {
            return RequestOutcome::NotHandled(Response::new(request));
        };
        if self.stop_response.is_some() {
            debug!("[{}] STOP {} while another STOP is pending", self.id, request.id);
            return RequestOutcome::NotHandled(Response::new(request));
        }

        let mut response = Response::new(request);
        response.active_requests = vec![active.id];
        self.stop_response = Some(response);
        RequestOutcome::Handled
    }

    /// Channel defaults, overridden by `headers`, with detector fallbacks filled in
    fn effective_headers(&self, headers: &RecogHeaders) -> RecogHeaders {
        let merged = self.params.merged(headers);
        RecogHeaders {
            no_input_timeout: merged
                .no_input_timeout
                .or(Some(self.config.detector.noinput_timeout)),
            speech_complete_timeout: merged
                .speech_complete_timeout
                .or(Some(self.config.detector.silence_timeout)),
            start_input_timers: merged.start_input_timers,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Frames (media path)
    // ─────────────────────────────────────────────────────────────────────

    /// Process one frame from the media path
    pub fn write_frame(&mut self, frame: &Frame<'_>) {
        if let Some(response) = self.stop_response.take() {
            if let Some(request) = self.request.take() {
                info!("[{}] Request {} stopped", self.id, request.id);
            }
            self.state = RecogState::Idle;
            self.respond(response);
            return;
        }

        let Some(request_id) = self.request.as_ref().map(|r| r.id) else {
            return;
        };
        let Some(codec) = self.codec else {
            return;
        };

        let frame_ms = codec.duration_ms(frame.samples.len());
        let mut completed = false;
        match self.detector.process(frame.samples, frame_ms) {
            DetectorEvent::Activity => {
                info!("[{}] Detected Voice Activity ({})", self.id, request_id);
                if self.state == RecogState::Listening {
                    self.state = RecogState::Recognizing;
                    self.emit(Event::start_of_input(request_id));
                }
            }
            DetectorEvent::Inactivity => {
                info!("[{}] Detected Voice Inactivity ({})", self.id, request_id);
                self.complete(CompletionCause::Success, None);
                completed = true;
            }
            DetectorEvent::NoInput => {
                if self.timers_started {
                    info!("[{}] Detected Noinput ({})", self.id, request_id);
                    self.complete(CompletionCause::NoInputTimeout, None);
                    completed = true;
                }
            }
            DetectorEvent::None => {}
        }

        if !completed {
            if let Some(event) = frame.event {
                match event.marker {
                    EventMarker::Start => info!(
                        "[{}] Detected Start of Event ({}) id:{}",
                        self.id, request_id, event.id
                    ),
                    EventMarker::End => info!(
                        "[{}] Detected End of Event ({}) id:{} duration:{} ts",
                        self.id, request_id, event.id, event.duration
                    ),
                }
            }
        }

        if let Some(out) = self.audio_out.as_mut() {
            out.write(frame.samples);
        }

        if !completed {
            self.decode(frame.samples);
        }
    }

    fn decode(&mut self, samples: &[i16]) {
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        match decoder.accept_audio(samples) {
            Ok(true) if self.state == RecogState::Recognizing => {
                info!("[{}] Decoder detected endpoint", self.id);
                self.complete(CompletionCause::Success, None);
            }
            // Endpoints on leading silence; no-input timing stays with the detector
            Ok(true) => debug!("[{}] Ignoring decoder endpoint before speech", self.id),
            Ok(false) => self.check_partial(),
            Err(e) => debug!("[{}] Transient decode failure: {}", self.id, e),
        }
    }

    fn check_partial(&mut self) {
        if self.state != RecogState::Recognizing {
            return;
        }
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };

        let partial = decoder.partial_result().unwrap_or_else(|e| {
            debug!("[{}] Partial result unavailable: {}", self.id, e);
            String::new()
        });
        if partial.is_empty() {
            return;
        }

        let early = self
            .grammar
            .as_ref()
            .and_then(|g| g.early_match(&partial))
            .map(str::to_string);
        if let Some(rule) = early {
            info!("[{}] Early match <{}> on '{}'", self.id, rule, partial);
            self.complete(CompletionCause::Success, Some(rule));
            return;
        }

        if self.config.emit_partials && partial != self.last_partial {
            if let Some(request) = &self.request {
                self.emit(Event::intermediate_result(request.id, &partial));
            }
            self.last_partial = partial;
        }
    }

    fn final_transcript(&mut self) -> RecogResult<Transcript> {
        match self.decoder.as_mut() {
            Some(decoder) => decoder.final_result(),
            None => Err(RecogError::Decoder("no decoder".to_string())),
        }
    }

    /// Send RECOGNITION-COMPLETE and release the request
    fn complete(&mut self, cause: CompletionCause, early_match: Option<String>) {
        let Some(request) = self.request.take() else {
            return;
        };
        self.state = RecogState::Idle;

        let mut event = Event::recognition_complete(request.id, cause);
        if cause == CompletionCause::Success {
            match self.final_transcript() {
                Ok(transcript) => {
                    let body = nlsml::render(&transcript, early_match.as_deref());
                    debug!("[{}] Final result: '{}'", self.id, transcript.text);
                    event.content_type = Some(NLSML_CONTENT_TYPE.to_string());
                    event.body = Some(body.clone());
                    self.last_result = Some(body);
                }
                Err(e) => {
                    warn!("[{}] Failed to get final result: {}", self.id, e);
                    event.completion_cause = Some(CompletionCause::Error);
                }
            }
        }

        info!(
            "[{}] Recognition complete for request {}: {:?}",
            self.id, request.id, event.completion_cause
        );
        self.emit(event);
    }
}
