//! Error types for zxlink operations.

use std::io;

use zxlink_proto::ResponseError;

use crate::command::DeviceState;
use crate::repl::Stage;

/// Alias for `Result<T, zxlink::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by transport, command and REPL operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Listing or choosing a serial port failed.
    #[error("serial port selection failed")]
    Select(#[source] io::Error),

    /// The selected port could not be opened.
    #[error("serial port open failed: {port}")]
    Open {
        /// Port name.
        port: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// No link is attached.
    #[error("serial port not connected")]
    NotConnected,

    /// A link is already attached.
    #[error("serial port already connected")]
    AlreadyConnected,

    /// An I/O error on the link.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// An expected terminator did not arrive in time.
    #[error("{stage} timed out: expected {expected}")]
    Timeout {
        /// The protocol step that timed out.
        stage: Stage,
        /// The missing terminator, escaped.
        expected: String,
    },

    /// Raw REPL entry failed.
    #[error("could not enter REPL")]
    Entry(#[source] Box<Self>),

    /// A raw REPL submission was not acknowledged.
    #[error("REPL not OK")]
    NotAcknowledged(#[source] Box<Self>),

    /// A raw REPL program raised; carries the device's text verbatim.
    #[error("REPL exception: {0}")]
    Exception(String),

    /// A hex payload from the device did not decode.
    #[error("invalid hex from device")]
    Hex(#[from] hex::FromHexError),

    /// A text payload from the device was not UTF-8.
    #[error("invalid UTF-8 from device")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The command reply held no JSON.
    #[error("serial command response missing")]
    ResponseMissing,

    /// The command reply's JSON did not parse.
    #[error("invalid serial command response")]
    Parse(#[source] serde_json::Error),

    /// The command reply carried an `error` member.
    #[error("serial command error: {message}")]
    Command {
        /// Device-reported error.
        message: String,
    },

    /// A line command failed; wraps one of the command kinds above.
    #[error("serial command failed: {command}")]
    CommandFailed {
        /// Command name.
        command: String,
        /// Underlying failure.
        #[source]
        source: Box<Self>,
    },

    /// A REPL session failed.
    #[error("serial REPL failed")]
    ReplFailed(#[source] Box<Self>),

    /// A reset failed.
    #[error("serial reset failed")]
    ResetFailed(#[source] Box<Self>),

    /// The firmware did not come up after a reboot.
    #[error("command not ready (last state: {state:?})")]
    NotReady {
        /// Last probed state.
        state: DeviceState,
    },
}

impl Error {
    /// Walks wrapper variants down to the innermost error kind.
    pub fn root(&self) -> &Self {
        match self {
            Self::Entry(e)
            | Self::NotAcknowledged(e)
            | Self::ReplFailed(e)
            | Self::ResetFailed(e)
            | Self::CommandFailed { source: e, .. } => e.root(),
            other => other,
        }
    }

    /// Whether this is a device exception mentioning `needle`.
    pub(crate) fn is_exception_with(&self, needle: &str) -> bool {
        matches!(self, Self::Exception(text) if text.contains(needle))
    }
}

impl From<ResponseError> for Error {
    fn from(e: ResponseError) -> Self {
        match e {
            ResponseError::Parse(e) => Self::Parse(e),
            ResponseError::Device { message } => Self::Command { message },
            _ => Self::ResponseMissing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_walks_wrappers() {
        let e = Error::ResetFailed(Box::new(Error::ReplFailed(Box::new(Error::NotReady {
            state: DeviceState::Repl,
        }))));
        assert!(matches!(e.root(), Error::NotReady { .. }));
    }

    #[test]
    fn source_chain_is_preserved() {
        let e = Error::CommandFailed {
            command: "about".into(),
            source: Box::new(Error::ResponseMissing),
        };
        let source = std::error::Error::source(&e).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("serial command response missing"));
    }
}
