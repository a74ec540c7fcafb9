//! Playback-side disk streaming for a multi-track audio engine.
//!
//! Each playback-capable track gets a [`DiskReader`] / [`ReaderFeed`] pair:
//! the reader serves realtime audio and MIDI out of lock-free ring buffers
//! under strict no-allocation, no-blocking rules, while the feed runs on the
//! [`ButlerThread`] and keeps the rings filled from region playlists. A
//! [`TransportFsm`] coordinates start, stop and locate between the realtime
//! thread, the butler and an external transport controller.
//!
//! ```ignore
//! use spool::{ButlerThread, DiskReader, SignalHub, StreamConfig};
//!
//! let hub = std::sync::Arc::new(SignalHub::new());
//! let mut butler = ButlerThread::new(StreamConfig::default(), hub.clone());
//! butler.start();
//!
//! let (mut reader, feed) = DiskReader::builder(0, StreamConfig::default())
//!     .channels(2)
//!     .audio_playlist(playlist)
//!     .build();
//! butler.register(feed);
//!
//! // In the process callback:
//! reader.run(&mut bufs, None, start, end, 1.0, nframes, true, &ctx);
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::StreamConfig;

mod declick;
pub use declick::DeclickRamp;

mod ring;
pub use ring::PlaybackBuffer;

pub mod midi;
pub use midi::{EventSink, MidiBuffer, MidiEvent, MidiRing, NoteTracker};

pub mod time;
pub use time::{Beats, ConstantTempo, TempoMap, PPQN};

mod playlist;
pub use playlist::{AudioPlaylist, LoopSpan, MidiPlaylist, MonitorState};

mod signals;
pub use signals::{Signal, SignalHub, SignalReceiver};

pub mod reader;
pub use reader::{CycleContext, DiskReader, ReaderFeed, ReaderShared, RefillOutcome};

pub mod transport;
pub use transport::{
    LocateRequest, StopRequest, TransportApi, TransportEvent, TransportFsm, TransportState,
};

pub mod butler;
pub use butler::{ButlerCommand, ButlerThread};

// Lock-free primitives
pub(crate) mod lockfree;
pub use lockfree::{AtomicFlag, AtomicFloat};
