//! The machinery that lets protocols be written as `async fn`s.
//!
//! A protocol future talks to the outside world through a [SharedChannel],
//! which tags every message with a header naming the waitpoint it belongs to.
//! Incoming messages are sorted into a buffer keyed by that header, and the future
//! waits on exactly the waitpoint it needs next. The [make_protocol] function then
//! wraps the future in an executor implementing [Protocol].
use std::{collections::HashMap, future::Future, sync::Arc};

use event_listener::Event;
use serde::{de::DeserializeOwned, Serialize};
use smol::{channel, lock::Mutex, Executor};

use crate::serde::{decode, encode_with_header};

use super::{Action, MessageData, Participant, Protocol, ProtocolError};

/// A sub channel, inside of a channel.
///
/// Used to allow multiple channels in parallel.
type SubChannel = u16;
/// A waitpoint inside of a channel.
pub type Waitpoint = u8;

/// A header used to route the message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct MessageHeader {
    /// Identifying the sub channel.
    sub_channel: SubChannel,
    /// Identifying the specific waitpoint.
    waitpoint: Waitpoint,
}

impl MessageHeader {
    /// The number of bytes in this encoding.
    const LEN: usize = 3;

    fn to_bytes(self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..2].copy_from_slice(&self.sub_channel.to_le_bytes());
        out[2] = self.waitpoint;
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }
        Some(Self {
            sub_channel: u16::from_le_bytes([bytes[0], bytes[1]]),
            waitpoint: bytes[2],
        })
    }

    fn with_waitpoint(self, waitpoint: Waitpoint) -> Self {
        Self {
            sub_channel: self.sub_channel,
            waitpoint,
        }
    }

    fn next_waitpoint(&mut self) -> Waitpoint {
        let out = self.waitpoint;
        self.waitpoint += 1;
        out
    }
}

#[derive(Clone, Default)]
struct MessageBuffer {
    messages: Arc<Mutex<HashMap<MessageHeader, Vec<(Participant, MessageData)>>>>,
    events: Arc<Mutex<HashMap<MessageHeader, Event>>>,
}

impl MessageBuffer {
    async fn push(&self, header: MessageHeader, from: Participant, message: MessageData) {
        let mut messages_lock = self.messages.as_ref().lock().await;
        messages_lock
            .entry(header)
            .or_default()
            .push((from, message));
        let mut events_lock = self.events.as_ref().lock().await;
        events_lock.entry(header).or_default().notify(1);
    }

    async fn pop(&self, header: MessageHeader) -> (Participant, MessageData) {
        loop {
            let listener = {
                let mut messages_lock = self.messages.as_ref().lock().await;
                let messages = messages_lock.entry(header).or_default();
                if !messages.is_empty() {
                    // Deliver in arrival order.
                    return messages.remove(0);
                }
                let mut events_lock = self.events.as_ref().lock().await;
                events_lock.entry(header).or_default().listen()
            };
            listener.await;
        }
    }
}

/// Used to represent the different kinds of messages a participant can send.
#[derive(Debug, Clone)]
enum Message {
    Many(MessageData),
    Private(Participant, MessageData),
}

/// The communication state shared by every channel of a single protocol run.
#[derive(Clone)]
struct Comms {
    buffer: MessageBuffer,
    message_s: channel::Sender<Message>,
    message_r: channel::Receiver<Message>,
}

impl Comms {
    fn new() -> Self {
        let (message_s, message_r) = channel::unbounded();
        Self {
            buffer: MessageBuffer::default(),
            message_s,
            message_r,
        }
    }

    async fn push_message(&self, from: Participant, message: MessageData) {
        let header = match MessageHeader::from_bytes(&message) {
            Some(header) => header,
            // Malformed messages are simply dropped.
            None => return,
        };
        self.buffer.push(header, from, message).await;
    }

    fn outgoing(&self) -> Option<Message> {
        self.message_r.try_recv().ok()
    }

    async fn send_raw(&self, data: Message) {
        // The receiving half lives as long as the executor, so this can't fail.
        let _ = self.message_s.send(data).await;
    }

    async fn recv<T: DeserializeOwned>(
        &self,
        header: MessageHeader,
    ) -> Result<(Participant, T), ProtocolError> {
        let (from, data) = self.buffer.pop(header).await;
        let decoded = decode(&data[MessageHeader::LEN..])
            .map_err(|e| ProtocolError::Other(Box::new(e)))?;
        Ok((from, decoded))
    }
}

/// A channel shared by every participant, which can still carry private messages.
pub struct SharedChannel {
    header: MessageHeader,
    comms: Comms,
}

impl SharedChannel {
    /// Allocate the next waitpoint on this channel.
    ///
    /// Every participant must allocate waitpoints in the same order.
    pub fn next_waitpoint(&mut self) -> Waitpoint {
        self.header.next_waitpoint()
    }

    /// Send a message to everybody else.
    pub async fn send_many<T: Serialize>(&self, waitpoint: Waitpoint, data: &T) {
        let header = self.header.with_waitpoint(waitpoint);
        let message_data = encode_with_header(&header.to_bytes(), data);
        self.comms.send_raw(Message::Many(message_data)).await;
    }

    /// Send a message privately to a single participant.
    pub async fn send_private<T: Serialize>(
        &self,
        waitpoint: Waitpoint,
        to: Participant,
        data: &T,
    ) {
        let header = self.header.with_waitpoint(waitpoint);
        let message_data = encode_with_header(&header.to_bytes(), data);
        self.comms
            .send_raw(Message::Private(to, message_data))
            .await;
    }

    /// Receive a message for a specific waitpoint.
    pub async fn recv<T: DeserializeOwned>(
        &self,
        waitpoint: Waitpoint,
    ) -> Result<(Participant, T), ProtocolError> {
        self.comms.recv(self.header.with_waitpoint(waitpoint)).await
    }
}

/// The context for a single protocol run.
pub struct Context<'a> {
    comms: Comms,
    executor: Arc<Executor<'a>>,
}

impl<'a> Context<'a> {
    pub fn new() -> Self {
        Self {
            comms: Comms::new(),
            executor: Arc::new(Executor::new()),
        }
    }

    /// Get the shared channel for this context.
    pub fn shared_channel(&self) -> SharedChannel {
        SharedChannel {
            header: MessageHeader {
                sub_channel: 0,
                waitpoint: 0,
            },
            comms: self.comms.clone(),
        }
    }
}

/// An executor which implements our protocol trait.
struct ProtocolExecutor<'a, T> {
    ctx: Context<'a>,
    ret_r: channel::Receiver<Result<T, ProtocolError>>,
    done: bool,
}

impl<'a, T> Protocol for ProtocolExecutor<'a, T> {
    type Output = T;

    fn poke(&mut self) -> Result<Action<Self::Output>, ProtocolError> {
        if self.done {
            return Ok(Action::Wait);
        }
        while self.ctx.executor.try_tick() {}
        // Flush outgoing messages before handing back a result.
        if let Some(message) = self.ctx.comms.outgoing() {
            return Ok(match message {
                Message::Many(m) => Action::SendMany(m),
                Message::Private(to, m) => Action::SendPrivate(to, m),
            });
        }
        match self.ret_r.try_recv() {
            Ok(res) => {
                self.done = true;
                res.map(Action::Return)
            }
            Err(_) => Ok(Action::Wait),
        }
    }

    fn message(&mut self, from: Participant, data: MessageData) {
        let comms = self.ctx.comms.clone();
        self.ctx
            .executor
            .spawn(async move { comms.push_message(from, data).await })
            .detach();
    }
}

/// Wrap a protocol future into something implementing [Protocol].
pub fn make_protocol<'a, O: Send + 'a>(
    ctx: Context<'a>,
    fut: impl Future<Output = Result<O, ProtocolError>> + Send + 'a,
) -> impl Protocol<Output = O> + 'a {
    let (ret_s, ret_r) = channel::bounded(1);
    let fut = async move {
        let res = fut.await;
        // Only dropped together with the executor.
        let _ = ret_s.send(res).await;
    };

    ctx.executor.spawn(fut).detach();

    ProtocolExecutor {
        ctx,
        ret_r,
        done: false,
    }
}
