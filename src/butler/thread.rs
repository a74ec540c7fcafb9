//! Butler thread: performs refills, seeks and overwrites on behalf of the
//! registered disk readers.

use crate::config::StreamConfig;
use crate::reader::{ReaderFeed, ReaderShared};
use crate::signals::{Signal, SignalHub};
use crossbeam_channel::{bounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;
use tracing::{debug, error};

/// How long the butler sleeps between passes when nobody summons it.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Work requests for the butler.
pub enum ButlerCommand {
    /// Adopt a track's feed half.
    Register { track: usize, feed: Box<ReaderFeed> },
    Deregister { track: usize },
    /// Coordinated transport work: relocate every feed, then report done.
    Seek { target: i64, complete_refill: bool },
    SeekTrack {
        track: usize,
        target: i64,
        complete_refill: bool,
    },
    /// Rebuild one track's buffers after a playlist edit.
    Overwrite { track: usize },
    /// Transport speed the refill policy should assume.
    SetSpeed(f64),
    Shutdown,
}

/// Condvar the realtime side's `need_butler` transitions feed into.
#[derive(Default)]
struct Wakeup {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Wakeup {
    fn summon(&self) {
        let mut pending = self.pending.lock();
        *pending = true;
        self.cond.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if !*pending {
            self.cond.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }
}

/// Background worker owning every track's [`ReaderFeed`].
///
/// Feeds are moved in via [`ButlerCommand::Register`]; the shared atomics
/// of each track stay reachable through [`registry`](ButlerThread::registry)
/// so the control thread can poll fill levels and `need_butler` without
/// touching the worker.
pub struct ButlerThread {
    command_tx: Sender<ButlerCommand>,
    command_rx: Option<Receiver<ButlerCommand>>,
    registry: Arc<DashMap<usize, Arc<ReaderShared>>>,
    hub: Arc<SignalHub>,
    wakeup: Arc<Wakeup>,
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    config: StreamConfig,
}

impl ButlerThread {
    pub fn new(config: StreamConfig, hub: Arc<SignalHub>) -> Self {
        let (tx, rx) = bounded(256);
        Self {
            command_tx: tx,
            command_rx: Some(rx),
            registry: Arc::new(DashMap::new()),
            hub,
            wakeup: Arc::new(Wakeup::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            config,
        }
    }

    pub fn command_sender(&self) -> Sender<ButlerCommand> {
        self.command_tx.clone()
    }

    /// Per-track shared state, for control-thread polling.
    pub fn registry(&self) -> Arc<DashMap<usize, Arc<ReaderShared>>> {
        Arc::clone(&self.registry)
    }

    /// Wake the worker; called when `need_butler` goes high.
    pub fn summon(&self) {
        self.wakeup.summon();
    }

    pub fn register(&self, feed: ReaderFeed) {
        let track = feed.track();
        self.registry.insert(track, Arc::clone(feed.shared()));
        let _ = self.command_tx.send(ButlerCommand::Register {
            track,
            feed: Box::new(feed),
        });
        self.summon();
    }

    pub fn deregister(&self, track: usize) {
        self.registry.remove(&track);
        let _ = self.command_tx.send(ButlerCommand::Deregister { track });
        self.summon();
    }

    /// Relocate every track. Emits [`Signal::ButlerTransportWorkDone`] when
    /// the flush has finished.
    pub fn seek_all(&self, target: i64, complete_refill: bool) {
        let _ = self.command_tx.send(ButlerCommand::Seek {
            target,
            complete_refill,
        });
        self.summon();
    }

    pub fn set_speed(&self, speed: f64) {
        let _ = self.command_tx.send(ButlerCommand::SetSpeed(speed));
        self.summon();
    }

    pub fn start(&mut self) {
        if self.thread_handle.is_some() {
            return;
        }

        let rx = self.command_rx.take().expect("command_rx already taken");
        let registry = Arc::clone(&self.registry);
        let hub = Arc::clone(&self.hub);
        let wakeup = Arc::clone(&self.wakeup);
        let shutdown = Arc::clone(&self.shutdown);
        let config = self.config;

        let handle = thread::Builder::new()
            .name("spool-butler".into())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                butler_loop(rx, registry, hub, wakeup, shutdown, config);
            })
            .expect("failed to spawn butler thread");

        self.thread_handle = Some(handle);
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(ButlerCommand::Shutdown);
        self.wakeup.summon();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ButlerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn butler_loop(
    rx: Receiver<ButlerCommand>,
    registry: Arc<DashMap<usize, Arc<ReaderShared>>>,
    hub: Arc<SignalHub>,
    wakeup: Arc<Wakeup>,
    shutdown: Arc<AtomicBool>,
    config: StreamConfig,
) {
    let mut feeds: HashMap<usize, ReaderFeed> = HashMap::new();
    let mut speed = 0.0f64;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        loop {
            match rx.try_recv() {
                Ok(cmd) => handle_command(cmd, &mut feeds, &registry, &hub, &mut speed),
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => return,
            }
        }

        // Overwrites first: a stale buffer must not be refilled further.
        for feed in feeds.values_mut() {
            if feed.shared().pending_overwrite() {
                if let Err(e) = feed.overwrite_existing_buffers(speed) {
                    error!(track = feed.track(), %e, "overwrite failed; will retry");
                }
            }
        }

        if config.parallel_io && feeds.len() >= 3 {
            feeds.par_iter_mut().for_each(|(_, feed)| {
                if let Err(e) = feed.refill(speed) {
                    error!(track = feed.track(), %e, "refill failed");
                }
            });
        } else {
            for feed in feeds.values_mut() {
                if let Err(e) = feed.refill(speed) {
                    error!(track = feed.track(), %e, "refill failed");
                }
            }
        }

        wakeup.wait(IDLE_WAIT);
    }
}

fn handle_command(
    cmd: ButlerCommand,
    feeds: &mut HashMap<usize, ReaderFeed>,
    registry: &DashMap<usize, Arc<ReaderShared>>,
    hub: &SignalHub,
    speed: &mut f64,
) {
    match cmd {
        ButlerCommand::Register { track, feed } => {
            debug!(track, "butler adopted feed");
            registry.insert(track, Arc::clone(feed.shared()));
            feeds.insert(track, *feed);
        }
        ButlerCommand::Deregister { track } => {
            feeds.remove(&track);
            registry.remove(&track);
        }
        ButlerCommand::Seek {
            target,
            complete_refill,
        } => {
            for feed in feeds.values_mut() {
                if let Err(e) = feed.seek(target, complete_refill, *speed) {
                    error!(track = feed.track(), %e, "seek failed");
                }
            }
            hub.emit(Signal::ButlerTransportWorkDone);
        }
        ButlerCommand::SeekTrack {
            track,
            target,
            complete_refill,
        } => {
            if let Some(feed) = feeds.get_mut(&track) {
                if let Err(e) = feed.seek(target, complete_refill, *speed) {
                    error!(track, %e, "seek failed");
                }
            }
        }
        ButlerCommand::Overwrite { track } => {
            if let Some(feed) = feeds.get_mut(&track) {
                if feed.shared().pending_overwrite() {
                    if let Err(e) = feed.overwrite_existing_buffers(*speed) {
                        error!(track, %e, "overwrite failed; will retry");
                    }
                }
            }
        }
        ButlerCommand::SetSpeed(s) => *speed = s,
        ButlerCommand::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::error::Result;
    use crate::playlist::{AudioPlaylist, MonitorState};
    use crate::reader::{CycleContext, DiskReader};
    use std::time::Instant;

    struct RampPlaylist {
        len: i64,
    }

    impl AudioPlaylist for RampPlaylist {
        fn read(&self, dst: &mut [f32], pos: i64, channel: usize) -> Result<usize> {
            let mut n = 0;
            for (i, sample) in dst.iter_mut().enumerate() {
                let p = pos + i as i64;
                if p < 0 || p >= self.len {
                    break;
                }
                *sample = p as f32 + channel as f32 * 1_000_000.0;
                n += 1;
            }
            Ok(n)
        }

        fn length(&self) -> i64 {
            self.len
        }
    }

    fn test_config() -> StreamConfig {
        StreamConfig {
            ring_capacity: 4096,
            chunk_samples: 512,
            max_block_samples: 512,
            transport_fades: false,
            parallel_io: false,
            ..Default::default()
        }
    }

    fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(deadline_ms) {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_seek_all_flushes_and_reports_done() {
        let hub = Arc::new(SignalHub::new());
        let rx = hub.subscribe();
        let mut butler = ButlerThread::new(test_config(), Arc::clone(&hub));
        butler.start();

        let (mut reader, feed) = DiskReader::builder(0, test_config())
            .channels(1)
            .audio_playlist(Arc::new(RampPlaylist { len: 10_000_000 }))
            .build();
        butler.register(feed);
        butler.set_speed(1.0);
        butler.seek_all(44_100, true);

        let done = wait_until(2_000, || {
            matches!(rx.try_recv(), Ok(Signal::ButlerTransportWorkDone))
        });
        assert!(done, "butler never reported transport work done");
        assert_eq!(reader.playback_sample(), 44_100);

        let ctx = CycleContext {
            monitor: MonitorState::DISK,
            global_locate_pending: false,
        };
        let mut buf = vec![0.0f32; 256];
        let mut outs = [&mut buf[..]];
        reader.run(&mut outs, None, 44_100, 44_356, 1.0, 256, true, &ctx);
        assert_eq!(buf[0], 44_100.0);
        assert_eq!(buf[255], 44_355.0);
    }

    #[test]
    fn test_butler_keeps_stream_fed_across_many_buffers() {
        let hub = Arc::new(SignalHub::new());
        let underruns = hub.subscribe();
        let mut butler = ButlerThread::new(test_config(), Arc::clone(&hub));
        butler.start();

        let (mut reader, feed) = DiskReader::builder(1, test_config())
            .channels(1)
            .audio_playlist(Arc::new(RampPlaylist { len: 10_000_000 }))
            .signals(Arc::clone(&hub))
            .build();
        butler.register(feed);
        butler.set_speed(1.0);
        butler.seek_all(0, true);
        assert!(wait_until(2_000, || reader.shared().fill() > 0.9));

        let ctx = CycleContext {
            monitor: MonitorState::DISK,
            global_locate_pending: false,
        };

        // Stream four ring-capacities worth of audio; the butler has to
        // refill behind the reader the whole way.
        let mut pos = 0i64;
        let mut buf = vec![0.0f32; 256];
        while pos < 16_384 {
            // A fifth of the ring buffered guarantees this cycle's read.
            let served = wait_until(2_000, || reader.shared().fill() >= 0.2);
            assert!(served, "butler fell behind at {pos}");

            let mut outs = [&mut buf[..]];
            reader.run(&mut outs, None, pos, pos + 256, 1.0, 256, true, &ctx);
            assert_eq!(buf[0], pos as f32, "discontinuity at {pos}");
            pos += 256;
            if reader.need_butler() {
                butler.summon();
            }
        }

        assert!(
            underruns
                .try_iter()
                .all(|s| !matches!(s, Signal::Underrun { .. })),
            "stream underran"
        );
    }

    #[test]
    fn test_pending_overwrite_handled_by_idle_pass() {
        let hub = Arc::new(SignalHub::new());
        let mut butler = ButlerThread::new(test_config(), Arc::clone(&hub));
        butler.start();

        let (mut reader, feed) = DiskReader::builder(2, test_config())
            .channels(1)
            .audio_playlist(Arc::new(RampPlaylist { len: 10_000_000 }))
            .build();
        butler.register(feed);
        butler.set_speed(1.0);
        butler.seek_all(1_000, true);
        assert!(wait_until(2_000, || reader.playback_sample() == 1_000));

        reader.set_pending_overwrite();
        butler.summon();
        assert!(
            wait_until(2_000, || !reader.shared().pending_overwrite()),
            "butler never cleared the overwrite"
        );

        let ctx = CycleContext {
            monitor: MonitorState::DISK,
            global_locate_pending: false,
        };
        let mut buf = vec![0.0f32; 64];
        let mut outs = [&mut buf[..]];
        reader.run(&mut outs, None, 1_000, 1_064, 1.0, 64, true, &ctx);
        assert_eq!(buf[0], 1_000.0);
    }

    #[test]
    fn test_registry_tracks_registration() {
        let hub = Arc::new(SignalHub::new());
        let mut butler = ButlerThread::new(test_config(), hub);
        butler.start();

        let (_reader, feed) = DiskReader::builder(9, test_config())
            .channels(1)
            .audio_playlist(Arc::new(RampPlaylist { len: 1_000 }))
            .build();
        butler.register(feed);
        assert!(butler.registry().contains_key(&9));

        butler.deregister(9);
        assert!(wait_until(2_000, || !butler.registry().contains_key(&9)));
    }
}
