//! Engine observer signals.
//!
//! A small publish/subscribe hub. Publishing is wait-free (a lock-free
//! subscriber-list load plus bounded `try_send`s) so the realtime thread can
//! report underruns directly; subscribing clones the list and swaps it in,
//! which only the control thread does.

use crate::transport::TransportState;
use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;

/// Diagnostic events observable from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The RT thread could not get the samples it needed in time.
    Underrun { track: usize },
    /// A track's buffers want butler attention.
    NeedButler { track: usize },
    /// The transport state machine moved.
    TransportState {
        from: TransportState,
        to: TransportState,
    },
    /// The butler finished coordinated transport work (a locate flush).
    ButlerTransportWorkDone,
}

/// Capacity of each subscriber's queue; slow observers lose signals rather
/// than stalling the producer.
const SUBSCRIBER_DEPTH: usize = 64;

/// Receiving end of a [`SignalHub`] subscription.
pub type SignalReceiver = Receiver<Signal>;

pub struct SignalHub {
    subscribers: ArcSwap<Vec<Sender<Signal>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register an observer. Control thread only.
    pub fn subscribe(&self) -> Receiver<Signal> {
        let (tx, rx) = bounded(SUBSCRIBER_DEPTH);
        let mut subs: Vec<Sender<Signal>> = (**self.subscribers.load()).clone();
        subs.push(tx);
        self.subscribers.store(Arc::new(subs));
        rx
    }

    /// Publish to every observer without blocking or allocating.
    #[inline]
    pub fn emit(&self, signal: Signal) {
        for tx in self.subscribers.load().iter() {
            let _ = tx.try_send(signal);
        }
    }
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}
