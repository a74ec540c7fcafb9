//! Musical time types.

mod beats;
mod tempo;

pub use beats::{Beats, PPQN};
pub use tempo::{ConstantTempo, TempoMap};
