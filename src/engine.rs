//! Recognizer Engine
//!
//! Holds the loaded model, the channel table and the task queue. Channel
//! open/close and protocol requests are serialized through the queue;
//! audio frames go straight to the channel through an `AudioStream`.
//!
//! Each channel lives behind its own mutex, taken by the queue worker for
//! tasks and by the media path for frames, so a channel's frames and
//! tasks never run at the same time while different channels proceed
//! independently.

use crate::audio::Frame;
use crate::channel::Channel;
use crate::config::Config;
use crate::decoder::DecoderModel;
use crate::error::{RecogError, RecogResult};
use crate::protocol::{ChannelId, Message, MessageSink, Request, Response, StatusCode};
use crate::queue::TaskQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{error, info, warn};

const ENGINE_TASK_NAME: &str = "Vosk Recog Engine";

type ChannelHandle = Arc<Mutex<Channel>>;
type ChannelTable = Arc<RwLock<HashMap<ChannelId, ChannelHandle>>>;

/// Work item executed by the engine's queue worker
#[derive(Debug)]
pub enum TaskKind {
    Open,
    Close,
    Request(Request),
}

#[derive(Debug)]
pub struct Task {
    pub channel: ChannelId,
    pub kind: TaskKind,
}

pub struct Engine {
    config: Arc<Config>,
    model: Arc<dyn DecoderModel>,
    channels: ChannelTable,
    queue: TaskQueue<Task>,
    next_channel: AtomicU64,
}

/// Lock a channel, recovering it if a previous holder panicked
fn lock_channel(handle: &ChannelHandle) -> MutexGuard<'_, Channel> {
    handle.lock().unwrap_or_else(|poisoned| {
        error!("Channel lock poisoned, continuing with recovered state");
        poisoned.into_inner()
    })
}

fn lookup(table: &ChannelTable, id: ChannelId) -> RecogResult<ChannelHandle> {
    table
        .read()?
        .get(&id)
        .cloned()
        .ok_or(RecogError::UnknownChannel(id.0))
}

fn process_task(table: &ChannelTable, task: Task) {
    let handle = match lookup(table, task.channel) {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Dropping {:?} task: {}", task.kind, e);
            return;
        }
    };

    match task.kind {
        TaskKind::Open => lock_channel(&handle).open(),
        TaskKind::Close => {
            lock_channel(&handle).close();
            match table.write() {
                Ok(mut channels) => {
                    channels.remove(&task.channel);
                }
                Err(e) => error!("Failed to remove channel {}: {}", task.channel, e),
            }
        }
        TaskKind::Request(request) => lock_channel(&handle).process_request(request),
    }
}

impl Engine {
    pub fn new(config: Config, model: Arc<dyn DecoderModel>) -> Self {
        let channels = ChannelTable::default();
        let table = channels.clone();
        let queue = TaskQueue::new(ENGINE_TASK_NAME, move |task: Task| {
            process_task(&table, task);
        });

        Self {
            config: Arc::new(config),
            model,
            channels,
            queue,
            next_channel: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the task worker
    pub fn start(&self) -> RecogResult<()> {
        info!("🎙️ Starting {}", ENGINE_TASK_NAME);
        self.queue.start()
    }

    /// Stop the task worker after it drained pending tasks
    pub fn shutdown(&self) -> RecogResult<()> {
        info!("🛑 Stopping {}", ENGINE_TASK_NAME);
        self.queue.stop(true)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Create a channel; `ChannelOpened` is sent to `sink` once the open task ran
    pub fn open_channel(&self, sink: Arc<dyn MessageSink>) -> RecogResult<ChannelId> {
        let id = ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst));
        let channel = Channel::new(id, self.model.clone(), self.config.clone(), sink.clone());
        self.channels
            .write()?
            .insert(id, Arc::new(Mutex::new(channel)));

        if let Err(e) = self.queue.enqueue(Task {
            channel: id,
            kind: TaskKind::Open,
        }) {
            warn!("[{}] Failed to open channel: {}", id, e);
            self.channels.write()?.remove(&id);
            if let Err(e) = sink.send(Message::ChannelOpened {
                channel: id,
                success: false,
            }) {
                warn!("[{}] Failed to report open failure: {}", id, e);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Close a channel; `ChannelClosed` is sent once the close task ran
    ///
    /// When the queue is already stopped the channel is closed in place.
    pub fn close_channel(&self, id: ChannelId) -> RecogResult<()> {
        let handle = lookup(&self.channels, id)?;
        match self.queue.enqueue(Task {
            channel: id,
            kind: TaskKind::Close,
        }) {
            Ok(()) => Ok(()),
            Err(RecogError::QueueClosed) => {
                warn!("[{}] Task queue closed, closing channel in place", id);
                lock_channel(&handle).close();
                self.channels.write()?.remove(&id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Queue a protocol request for a channel
    ///
    /// If the queue cannot take it, a failure response is sent right away
    /// so the request still gets exactly one answer.
    pub fn dispatch(&self, id: ChannelId, request: Request) -> RecogResult<()> {
        let handle = lookup(&self.channels, id)?;
        let failure = Response::failed(&request, StatusCode::MethodFailed);

        match self.queue.enqueue(Task {
            channel: id,
            kind: TaskKind::Request(request),
        }) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("[{}] Failed to queue request {}: {}", id, failure.request_id, e);
                lock_channel(&handle).respond(failure);
                Err(e)
            }
        }
    }

    /// Media path handle for a channel
    pub fn stream(&self, id: ChannelId) -> RecogResult<AudioStream> {
        Ok(AudioStream {
            id,
            channel: lookup(&self.channels, id)?,
        })
    }

    /// Deliver one frame to a channel by id
    pub fn write_frame(&self, id: ChannelId, frame: &Frame<'_>) -> RecogResult<()> {
        self.stream(id)?.write(frame)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to stop engine: {}", e);
        }
    }
}

/// Media path entry point of one channel
#[derive(Clone)]
pub struct AudioStream {
    id: ChannelId,
    channel: ChannelHandle,
}

impl AudioStream {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Open the stream with the negotiated LPCM sample rate
    pub fn open(&self, sample_rate: u32) -> RecogResult<()> {
        self.channel.lock()?.open_stream(sample_rate)
    }

    pub fn close(&self) -> RecogResult<()> {
        self.channel.lock()?.close_stream();
        Ok(())
    }

    /// Write one frame; runs synchronously on the caller's thread
    pub fn write(&self, frame: &Frame<'_>) -> RecogResult<()> {
        self.channel.lock()?.write_frame(frame);
        Ok(())
    }
}
