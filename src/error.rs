//! The error taxonomy returned by this library's API surface.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::entity_event::DesyncReport;

/// This enum contains all error messages this library can return. Most API
/// functions will generally return a [`Result<(), TidelinkError>`].
///
/// The variants map onto the protocol's failure taxonomy: framing errors are
/// fatal for the connection, desync reports tear down the round, transport
/// errors are owned by the reconnection supervisor, and invalid requests are
/// caller bugs.
///
/// [`Result<(), TidelinkError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq)]
pub enum TidelinkError {
    /// An inbound frame violated the wire protocol: an unknown message-kind
    /// tag, a truncated payload, or trailing bytes past the decoded body.
    /// Continuing to parse past a framing error produces undefined behavior,
    /// so the connection must be closed.
    ProtocolViolation {
        /// Further specifies what was malformed.
        context: String,
    },
    /// The client's simulation has genuinely diverged from the server's.
    /// This is the most severe failure class in the protocol; the round is
    /// torn down and the attached report dumped for diagnostics.
    Desync {
        /// Structured dump of the sequencer state at the point of failure.
        report: Box<DesyncReport>,
    },
    /// Serialization or deserialization of data failed.
    SerializationError {
        /// A description of what failed to serialize/deserialize.
        context: String,
    },
    /// A transport operation failed.
    SocketError {
        /// A description of the socket error.
        context: String,
    },
    /// The operation requires an open, approved connection.
    NotConnected,
    /// You made an invalid request, usually by using wrong parameters for
    /// function calls or calling them in the wrong state.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
}

impl Display for TidelinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TidelinkError::ProtocolViolation { context } => {
                write!(f, "Protocol violation: {}", context)
            }
            TidelinkError::Desync { report } => {
                write!(f, "Simulation desync: {}", report)
            }
            TidelinkError::SerializationError { context } => {
                write!(f, "Serialization error: {}", context)
            }
            TidelinkError::SocketError { context } => {
                write!(f, "Socket error: {}", context)
            }
            TidelinkError::NotConnected => {
                write!(f, "The session is not connected.")
            }
            TidelinkError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            }
        }
    }
}

impl Error for TidelinkError {}
