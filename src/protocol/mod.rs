//! This module provides abstractions for working with protocols.
//!
//! This library tries to abstract away as much of the internal machinery
//! of protocols as much as possible. To use a protocol, you just need to be able
//! to deliver messages to and from that protocol, and eventually it will produce
//! a result, without you having to worry about how many rounds it has, or how
//! to serialize the messages it produces.
use std::{collections::HashMap, error};

use ::serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compat::CSCurve;

/// Represents an error which can happen when running a protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Some assertion in the protocol failed.
    #[error("assertion failed {0}")]
    AssertionFailed(String),
    /// Our own share did not match the public commitments.
    #[error("share verification failed: {0}")]
    ShareVerificationFailed(String),
    /// Too few parties contributed valid data.
    #[error("quorum unavailable: needed {needed}, have {available}")]
    QuorumUnavailable { needed: usize, available: usize },
    /// No party can make progress anymore, or the round budget ran out.
    #[error("protocol stalled after {0} passes")]
    Stalled(usize),
    /// Some generic error happened.
    #[error("{0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl From<Box<dyn error::Error + Send + Sync>> for ProtocolError {
    fn from(e: Box<dyn error::Error + Send + Sync>) -> Self {
        Self::Other(e)
    }
}

/// Represents an error which can happen when *initializing* a protocol.
///
/// These are related to bad parameters for the protocol, and things like that.
///
/// These are usually more recoverable than other protocol errors.
#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("bad parameters: {0}")]
    BadParameters(String),
}

/// Represents a participant in the protocol.
///
/// Each participant is identified by its position in the roster that indexes
/// the run. The evaluation point used for secret sharing is that position plus one,
/// so that zero stays reserved for the secret itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash,
)]
pub struct Participant(u32);

impl Participant {
    /// Return this participant as little endian bytes.
    pub fn bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Return the scalar associated with this participant.
    pub fn scalar<C: CSCurve>(&self) -> C::Scalar {
        C::Scalar::from(self.0 as u64 + 1)
    }
}

impl From<Participant> for u32 {
    fn from(p: Participant) -> Self {
        p.0
    }
}

impl From<u32> for Participant {
    fn from(x: u32) -> Self {
        Participant(x)
    }
}

/// Represents the data making up a message.
///
/// We choose to just represent messages as opaque vectors of bytes, with all
/// the serialization logic handled internally.
pub type MessageData = Vec<u8>;

/// Represents an action by a participant in the protocol.
///
/// The basic flow is that each participant receives messages from other participants,
/// and then reacts with some kind of action.
///
/// This action can consist of sending a message, doing nothing, etc.
///
/// Eventually, the participant returns a value, ending the protocol.
#[derive(Debug, Clone)]
pub enum Action<T> {
    /// Don't do anything.
    Wait,
    /// Send a message to all other participants.
    ///
    /// Participants *never* sends messages to themselves.
    SendMany(MessageData),
    /// Send a private message to another participant.
    ///
    /// Shares travel in these messages, so the transport must keep them confidential.
    SendPrivate(Participant, MessageData),
    /// End the protocol by returning a value.
    Return(T),
}

/// A trait for protocols.
///
/// Basically, this represents a struct for the behavior of a single participant
/// in a protocol. The idea is that the computation of that participant is driven
/// mainly by receiving messages from other participants.
pub trait Protocol {
    type Output;

    /// Poke the protocol, receiving a new action.
    ///
    /// The idea is that the protocol should be poked until it returns an error,
    /// or it returns an action with a return value, or it returns a wait action.
    ///
    /// Upon returning a wait action, that protocol will not advance any further
    /// until a new message arrives.
    fn poke(&mut self) -> Result<Action<Self::Output>, ProtocolError>;

    /// Inform the protocol of a new message.
    fn message(&mut self, from: Participant, data: MessageData);
}

/// Run a protocol to completion, synchronously.
///
/// This works by executing each participant in order.
///
/// In practice each protocol participant is likely running on a different machine,
/// and so orchestrating the protocol would happen differently.
pub fn run_protocol<T>(
    ps: Vec<(Participant, Box<dyn Protocol<Output = T>>)>,
) -> Result<Vec<(Participant, T)>, ProtocolError> {
    run_protocol_bounded(ps, usize::MAX)
}

/// Like [run_protocol()], but gives up after `budget` passes over the participants.
///
/// A pass in which no participant does anything means everybody is waiting
/// on messages that will never come, which is reported as a stall immediately.
pub fn run_protocol_bounded<T>(
    mut ps: Vec<(Participant, Box<dyn Protocol<Output = T>>)>,
    budget: usize,
) -> Result<Vec<(Participant, T)>, ProtocolError> {
    let indices: HashMap<Participant, usize> =
        ps.iter().enumerate().map(|(i, (p, _))| (*p, i)).collect();

    let size = ps.len();
    let mut out = Vec::with_capacity(size);
    let mut passes = 0;
    while out.len() < size {
        if passes >= budget {
            return Err(ProtocolError::Stalled(passes));
        }
        passes += 1;
        let mut progress = false;
        for i in 0..size {
            while {
                let action = ps[i].1.poke()?;
                match action {
                    Action::Wait => false,
                    Action::SendMany(m) => {
                        progress = true;
                        for j in 0..size {
                            if i == j {
                                continue;
                            }
                            let from = ps[i].0;
                            ps[j].1.message(from, m.clone());
                        }
                        true
                    }
                    Action::SendPrivate(to, m) => {
                        progress = true;
                        let from = ps[i].0;
                        if let Some(&j) = indices.get(&to) {
                            ps[j].1.message(from, m);
                        }
                        true
                    }
                    Action::Return(r) => {
                        progress = true;
                        out.push((ps[i].0, r));
                        false
                    }
                }
            } {}
        }
        if !progress && out.len() < size {
            return Err(ProtocolError::Stalled(passes));
        }
    }

    Ok(out)
}

pub(crate) mod internal;
