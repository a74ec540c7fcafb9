//! Error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Playlist read failed at sample {position}: {reason}")]
    PlaylistRead { position: i64, reason: String },

    #[error("Unknown track: {0}")]
    UnknownTrack(usize),

    #[error("Butler error: {0}")]
    Butler(String),

    #[error("Butler command channel disconnected")]
    ButlerDisconnected,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
