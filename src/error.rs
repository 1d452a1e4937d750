//! Library and application errors

use std::{
    fmt::{Display, Formatter},
    io,
    path::PathBuf,
};

use miette::Diagnostic;
use thiserror::Error;

use crate::command::CommandType;

/// All possible errors returned by saberflash
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Error while communicating with the saber")]
    #[diagnostic(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Received a malformed response from the saber")]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("The saber returned an error")]
    #[diagnostic(transparent)]
    Device(#[from] DeviceError),

    #[error(
        "Checksum mismatch persisted at offset {offset} after {written} bytes were acknowledged"
    )]
    #[diagnostic(
        code(saberflash::checksum_mismatch),
        help("The serial link may be noisy; try the upload again or lower the baud rate")
    )]
    ChecksumMismatch { offset: u64, written: u64 },

    #[error("Write failed at offset {offset} after {written} bytes were acknowledged")]
    #[diagnostic(code(saberflash::write_failed))]
    WriteFailed {
        offset: u64,
        written: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("The file '{}' could not be found", .0.display())]
    #[diagnostic(
        code(saberflash::file_not_found),
        help("Check that the path is spelled correctly and that the file exists")
    )]
    FileNotFound(PathBuf),

    #[error("Failed to open file: {0}")]
    #[diagnostic(code(saberflash::file_open))]
    FileOpen(String, #[source] io::Error),

    #[error("The file '{path}' is {size} bytes, more than the saber protocol can address")]
    #[diagnostic(
        code(saberflash::file_too_large),
        help("Files must fit the 32-bit offset carried by WRITE frames")
    )]
    FileTooLarge { path: String, size: u64 },

    #[error("No OpenCore saber could be detected")]
    #[diagnostic(
        code(saberflash::no_saber),
        help("Connect the saber via USB and power it on, or pass the serial port explicitly with `--port`")
    )]
    NoSaberFound,

    #[error("Internal error")]
    InternalError,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Connection(err.into())
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Self::Connection(err.into())
    }
}

/// Connection-related errors
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("Failed to connect to the saber")]
    #[diagnostic(
        code(saberflash::connection_failed),
        help("Ensure that the saber is connected, powered on and not held by another program")
    )]
    ConnectionFailed,

    #[error("Serial port not found")]
    #[diagnostic(
        code(saberflash::device_not_found),
        help("Ensure that the saber is connected and your host recognizes the serial adapter")
    )]
    DeviceNotFound,

    #[error("Timeout while running {0}command")]
    #[diagnostic(code(saberflash::timeout))]
    Timeout(TimedOutCommand),

    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(saberflash::serial_error))]
    Serial(#[source] serialport::Error),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        from_error_kind(err.kind(), err)
    }
}

impl From<serialport::Error> for ConnectionError {
    fn from(err: serialport::Error) -> Self {
        use serialport::ErrorKind;

        match err.kind() {
            ErrorKind::Io(kind) => from_error_kind(kind, err),
            ErrorKind::NoDevice => ConnectionError::DeviceNotFound,
            _ => ConnectionError::Serial(err),
        }
    }
}

/// An executed command which has timed out
#[derive(Clone, Debug, Default)]
pub struct TimedOutCommand {
    command: Option<CommandType>,
}

impl Display for TimedOutCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.command {
            Some(command) => write!(f, "{} ", command),
            None => Ok(()),
        }
    }
}

impl From<CommandType> for TimedOutCommand {
    fn from(ct: CommandType) -> Self {
        TimedOutCommand { command: Some(ct) }
    }
}

/// Errors raised while decoding a response frame
///
/// These indicate that the framing on the link itself is broken, so the
/// offending exchange is never retried.
#[derive(Debug, Diagnostic, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    #[error("Response frame is truncated: expected {expected} more bytes, got {got}")]
    #[diagnostic(code(saberflash::protocol::truncated))]
    Truncated { expected: usize, got: usize },

    #[error("Response carries an invalid direction byte: {0:#04x}")]
    #[diagnostic(code(saberflash::protocol::direction))]
    InvalidDirection(u8),

    #[error("Expected a response to the {expected} command, got opcode {got:#04x}")]
    #[diagnostic(
        code(saberflash::protocol::opcode),
        help("The saber and host are out of step; reconnect and try again")
    )]
    UnexpectedOpcode { expected: CommandType, got: u8 },

    #[error("Response payload length {actual} is inconsistent with the frame ({expected} expected)")]
    #[diagnostic(code(saberflash::protocol::length))]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Response payload carries {0} trailing bytes")]
    #[diagnostic(code(saberflash::protocol::trailing))]
    TrailingBytes(usize),

    #[error("Response carries an unknown status byte: {0:#04x}")]
    #[diagnostic(code(saberflash::protocol::status))]
    InvalidStatus(u8),

    #[error("Response payload is not valid UTF-8")]
    #[diagnostic(code(saberflash::protocol::utf8))]
    InvalidString,

    #[error("The saber acknowledged {got} bytes for a {expected} byte chunk")]
    #[diagnostic(code(saberflash::protocol::ack_mismatch))]
    AckMismatch { expected: usize, got: usize },
}

/// Kinds of failure a saber can report in a response status byte
#[derive(Clone, Copy, Debug, Diagnostic, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceErrorKind {
    #[error("Device is busy")]
    #[diagnostic(
        code(saberflash::device::busy),
        help("The saber may still be settling; retry the operation in a moment")
    )]
    Busy,

    #[error("Device failed to execute the command")]
    #[diagnostic(code(saberflash::device::failed))]
    Failed,

    #[error("Device reports a checksum mismatch for the written chunk")]
    #[diagnostic(code(saberflash::device::checksum))]
    ChecksumMismatch,
}

/// An error reported by the saber itself
#[derive(Clone, Copy, Debug, Diagnostic, Error)]
#[error("Error while running {command} command")]
#[non_exhaustive]
pub struct DeviceError {
    command: CommandType,
    #[source]
    kind: DeviceErrorKind,
}

impl DeviceError {
    pub fn new(command: CommandType, kind: DeviceErrorKind) -> DeviceError {
        DeviceError { command, kind }
    }

    pub fn command(&self) -> CommandType {
        self.command
    }

    pub fn kind(&self) -> DeviceErrorKind {
        self.kind
    }
}

pub(crate) trait ResultExt {
    /// Mark the command from which this error originates
    fn for_command(self, command: CommandType) -> Self;
}

impl<T> ResultExt for Result<T, Error> {
    fn for_command(self, command: CommandType) -> Self {
        match self {
            Err(Error::Connection(ConnectionError::Timeout(_))) => {
                Err(Error::Connection(ConnectionError::Timeout(command.into())))
            }
            res => res,
        }
    }
}

fn from_error_kind<E>(kind: io::ErrorKind, err: E) -> ConnectionError
where
    E: Into<serialport::Error>,
{
    use io::ErrorKind;

    match kind {
        ErrorKind::TimedOut => ConnectionError::Timeout(TimedOutCommand::default()),
        ErrorKind::NotFound => ConnectionError::DeviceNotFound,
        _ => ConnectionError::Serial(err.into()),
    }
}
