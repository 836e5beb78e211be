// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;

use tokio_tungstenite::tungstenite;

/// Represent the types of errors.
#[derive(Clone, Debug)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Invalid topic string.
    TopicError,

    /// Send packet error, the peer end of a channel has been dropped.
    SendError,

    /// Socket/websocket stream error.
    SocketError,

    /// Protocol violation: unexpected packet in the current connection state.
    ProtocolError,

    /// Packet id space for a connection has been exhausted.
    PacketIdError,

    /// A waiter was parked twice for the same `(packet_type, packet_id)`.
    WaiterError,

    /// Cert/key files error.
    CertError,

    /// Config file error.
    ConfigError,

    /// Logger initialization error.
    LoggerError,

    /// Persistence store error.
    StorageError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Error {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Error { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_string(ErrorKind::IoError, format!("{err}"))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::from_string(ErrorKind::SocketError, format!("websocket error: {err}"))
    }
}

impl From<mote_codec::EncodeError> for Error {
    fn from(err: mote_codec::EncodeError) -> Self {
        Error::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<mote_codec::DecodeError> for Error {
    fn from(err: mote_codec::DecodeError) -> Self {
        Error::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

impl From<mote_codec::TopicError> for Error {
    fn from(err: mote_codec::TopicError) -> Self {
        Error::from_string(ErrorKind::TopicError, format!("{err:?}"))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::from_string(ErrorKind::SendError, format!("{err}"))
    }
}
