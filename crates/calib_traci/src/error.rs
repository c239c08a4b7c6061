use std::io;

use calib_core::SimulatorError;
use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors raised by the TraCI client.
#[derive(Debug, Error)]
pub enum TraciError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("could not connect to {address} after {attempts} attempts: {source}")]
    Connect {
        address: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("connection is closed")]
    Closed,
}

impl TraciError {
    /// True when the simulator answered with an error status for the command itself.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Protocol(ProtocolError::Failed { .. } | ProtocolError::NotImplemented { .. })
        )
    }
}

impl From<TraciError> for SimulatorError {
    fn from(err: TraciError) -> Self {
        match err {
            TraciError::Io(err) => SimulatorError::Io(err),
            TraciError::Connect { source, .. } | TraciError::Launch { source, .. } => {
                SimulatorError::Io(source)
            }
            err if err.is_rejection() => SimulatorError::Command(err.to_string()),
            err => SimulatorError::Protocol(err.to_string()),
        }
    }
}
