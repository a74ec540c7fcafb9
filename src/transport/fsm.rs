//! Transport state machine.
//!
//! Coordinates start, stop and locate between the realtime thread, the
//! butler and an external transport controller. The FSM itself performs no
//! work: every transition invokes actions on a [`TransportApi`] implemented
//! by the embedding.

use crate::signals::{Signal, SignalHub};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Rolling,
    Locating,
    DeclickOut,
    ButlerWait,
    MasterWait,
}

/// Parameters of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StopRequest {
    pub abort: bool,
    pub clear_state: bool,
}

/// Parameters of a locate request. The FSM latches the most recent one;
/// there is no queue of locates, last write wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocateRequest {
    pub target: i64,
    pub with_roll: bool,
    pub with_flush: bool,
    pub with_loop: bool,
    pub force: bool,
}

impl LocateRequest {
    pub fn to(target: i64) -> Self {
        Self {
            target,
            with_roll: false,
            with_flush: true,
            with_loop: false,
            force: false,
        }
    }

    pub fn with_roll(mut self, roll: bool) -> Self {
        self.with_roll = roll;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Start,
    Stop(StopRequest),
    Locate(LocateRequest),
    LocateDone,
    ButlerDone,
    ButlerRequired,
    DeclickDone,
    MasterReady,
}

/// Actions the state machine drives on its embedding.
pub trait TransportApi {
    fn start_playback(&mut self);
    fn stop_playback(&mut self, request: StopRequest);
    fn start_locate(&mut self, request: LocateRequest);
    fn schedule_butler_for_transport_work(&mut self);
    fn butler_completed_transport_work(&mut self);
    fn exit_declick(&mut self);
    fn roll_after_locate(&mut self);
    fn locate_phase_two(&mut self);

    /// True while an external transport master has not yet synchronized;
    /// a start request parks in MasterWait until `MasterReady` arrives.
    fn waiting_for_master(&self) -> bool {
        false
    }
}

pub struct TransportFsm {
    state: TransportState,
    /// Why we are declicking: true when the fadeout leads to a locate,
    /// false when it leads to a plain stop.
    stopped_to_locate: bool,
    last_locate: Option<LocateRequest>,
    deferred: SmallVec<[TransportEvent; 4]>,
    hub: Option<Arc<SignalHub>>,
}

impl TransportFsm {
    pub fn new() -> Self {
        Self {
            state: TransportState::Stopped,
            stopped_to_locate: false,
            last_locate: None,
            deferred: SmallVec::new(),
            hub: None,
        }
    }

    /// Publish state changes on `hub` for diagnostics.
    pub fn with_signals(mut self, hub: Arc<SignalHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    #[inline]
    pub fn last_locate(&self) -> Option<LocateRequest> {
        self.last_locate
    }

    #[inline]
    pub fn stopped_to_locate(&self) -> bool {
        self.stopped_to_locate
    }

    fn set_state(&mut self, to: TransportState) {
        if self.state == to {
            return;
        }
        debug!(from = ?self.state, ?to, "transport state");
        if let Some(hub) = &self.hub {
            hub.emit(Signal::TransportState {
                from: self.state,
                to,
            });
        }
        self.state = to;
    }

    /// Feed one event through the machine, invoking actions on `api`.
    pub fn process(&mut self, event: TransportEvent, api: &mut dyn TransportApi) {
        use TransportEvent::*;
        use TransportState::*;

        // While waiting on the butler, transport requests are parked and
        // replayed in arrival order once the butler reports back.
        if self.state == ButlerWait && matches!(event, Start | Stop(_) | Locate(_)) {
            debug!(?event, "deferred during butler wait");
            self.deferred.push(event);
            return;
        }

        match (self.state, event) {
            // ---- Stopped ------------------------------------------------
            (Stopped, Start) => {
                if api.waiting_for_master() {
                    self.set_state(MasterWait);
                } else {
                    api.start_playback();
                    self.set_state(Rolling);
                }
            }
            (Stopped, Stop(_)) => {}
            (Stopped, Locate(l)) => {
                self.mark_for_locate(l, false, api);
                self.set_state(Locating);
            }
            (Stopped, ButlerDone) => api.butler_completed_transport_work(),
            (Stopped, ButlerRequired) => {
                api.schedule_butler_for_transport_work();
                self.set_state(ButlerWait);
            }

            // ---- Rolling ------------------------------------------------
            (Rolling, Stop(s)) => {
                self.mark_for_stop(s, api);
                self.set_state(DeclickOut);
            }
            (Rolling, Start) => {}
            (Rolling, Locate(l)) => {
                self.mark_for_locate(l, true, api);
                self.set_state(DeclickOut);
            }
            (Rolling, ButlerDone) => {}

            // ---- DeclickOut ---------------------------------------------
            (DeclickOut, DeclickDone) => {
                api.exit_declick();
                if self.stopped_to_locate {
                    if let Some(l) = self.last_locate {
                        api.start_locate(l);
                    }
                    self.set_state(Locating);
                } else {
                    self.set_state(Stopped);
                }
            }
            (DeclickOut, ButlerRequired) => {
                api.schedule_butler_for_transport_work();
                self.set_state(ButlerWait);
            }

            // ---- Locating -----------------------------------------------
            (Locating, LocateDone) => {
                if self.should_roll_after_locate() {
                    api.roll_after_locate();
                    self.set_state(Rolling);
                } else {
                    self.set_state(Stopped);
                }
            }
            (Locating, Stop(s)) => {
                api.stop_playback(s);
                self.set_state(Stopped);
            }
            (Locating, Start) => self.set_state(Rolling),
            (Locating, Locate(l)) => {
                // A newer request supersedes the one in flight.
                self.last_locate = Some(l);
                self.set_state(Rolling);
            }
            (Locating, ButlerDone) => {}
            (Locating, ButlerRequired) => {
                api.schedule_butler_for_transport_work();
                self.set_state(ButlerWait);
            }

            // ---- ButlerWait ---------------------------------------------
            (ButlerWait, ButlerDone) => {
                if self.stopped_to_locate {
                    api.locate_phase_two();
                    self.set_state(Locating);
                } else {
                    api.butler_completed_transport_work();
                    self.set_state(Stopped);
                }
                self.drain_deferred(api);
            }
            (ButlerWait, ButlerRequired) => api.schedule_butler_for_transport_work(),

            // ---- MasterWait ---------------------------------------------
            (MasterWait, MasterReady) => {
                api.start_playback();
                self.set_state(Rolling);
            }
            (MasterWait, Stop(_)) => self.set_state(Stopped),
            (MasterWait, Start) => {}

            (state, event) => {
                warn!(?state, ?event, "transport event ignored in this state");
            }
        }
    }

    fn mark_for_stop(&mut self, request: StopRequest, api: &mut dyn TransportApi) {
        self.stopped_to_locate = false;
        api.stop_playback(request);
    }

    /// Latch the locate. While rolling the transport must declick first, so
    /// the stop side begins the fadeout; from a standstill the locate can
    /// start immediately.
    fn mark_for_locate(
        &mut self,
        request: LocateRequest,
        rolling: bool,
        api: &mut dyn TransportApi,
    ) {
        self.stopped_to_locate = true;
        self.last_locate = Some(request);
        if rolling {
            api.stop_playback(StopRequest::default());
        } else {
            api.start_locate(request);
        }
    }

    fn should_roll_after_locate(&self) -> bool {
        self.last_locate.map(|l| l.with_roll).unwrap_or(false)
    }

    fn drain_deferred(&mut self, api: &mut dyn TransportApi) {
        let queued: SmallVec<[TransportEvent; 4]> = std::mem::take(&mut self.deferred);
        for event in queued {
            self.process(event, api);
        }
    }
}

impl Default for TransportFsm {
    fn default() -> Self {
        Self::new()
    }
}
