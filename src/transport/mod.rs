//! Transport coordination.

mod fsm;

pub use fsm::{
    LocateRequest, StopRequest, TransportApi, TransportEvent, TransportFsm, TransportState,
};
