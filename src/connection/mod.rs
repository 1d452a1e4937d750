//! Exchange framed commands with a saber
//!
//! The [Connection] struct abstracts over the serial link and the
//! sending/decoding of commands. The protocol is strictly synchronous:
//! there is never more than one command in flight, and every command
//! elicits exactly one response. Timeouts and BUSY responses are retried
//! with the identical frame up to a bounded budget; a malformed response
//! means the framing itself is broken and surfaces immediately.

use std::{
    io::{BufWriter, Write},
    str,
};

use log::debug;
use strum::{Display, FromRepr};

use crate::{
    command::{Command, CommandType, DIRECTION_RESPONSE},
    error::{ConnectionError, DeviceError, DeviceErrorKind, Error, ProtocolError, ResultExt},
    interface::Transport,
};

/// Number of additional attempts after the first try of an exchange
pub const DEFAULT_RETRIES: usize = 3;

const RESPONSE_HEADER_LEN: usize = 5;

/// Status byte carried by every response
#[derive(Copy, Clone, Debug, Display, FromRepr, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Busy = 0x01,
    Error = 0x02,
    ChecksumMismatch = 0x03,
}

/// A single entry reported by the LIST command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size: u32,
}

/// Decoded payload of a response, shaped by the opcode that elicited it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseValue {
    Info { version: String, serial: String },
    List(Vec<FileEntry>),
    Write { acked: u32 },
    None,
}

impl ResponseValue {
    pub(crate) fn into_info(self) -> Result<(String, String), Error> {
        match self {
            ResponseValue::Info { version, serial } => Ok((version, serial)),
            _ => Err(Error::InternalError),
        }
    }

    pub(crate) fn into_list(self) -> Result<Vec<FileEntry>, Error> {
        match self {
            ResponseValue::List(entries) => Ok(entries),
            _ => Err(Error::InternalError),
        }
    }

    pub(crate) fn into_write_ack(self) -> Result<u32, Error> {
        match self {
            ResponseValue::Write { acked } => Ok(acked),
            _ => Err(Error::InternalError),
        }
    }
}

/// A response from the saber following a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    pub command: CommandType,
    pub status: Status,
    pub value: ResponseValue,
}

impl CommandResponse {
    /// Decode a complete response frame for the command that elicited it.
    ///
    /// Rejects any frame whose direction byte, opcode, length or status is
    /// inconsistent with the issuing command.
    pub fn decode(bytes: &[u8], ty: CommandType) -> Result<CommandResponse, ProtocolError> {
        if bytes.len() < RESPONSE_HEADER_LEN {
            return Err(ProtocolError::Truncated {
                expected: RESPONSE_HEADER_LEN,
                got: bytes.len(),
            });
        }
        if bytes[0] != DIRECTION_RESPONSE {
            return Err(ProtocolError::InvalidDirection(bytes[0]));
        }
        if bytes[1] != ty as u8 {
            return Err(ProtocolError::UnexpectedOpcode {
                expected: ty,
                got: bytes[1],
            });
        }

        let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        let payload = &bytes[RESPONSE_HEADER_LEN..];
        if payload.len() != len {
            return Err(ProtocolError::LengthMismatch {
                expected: len,
                actual: payload.len(),
            });
        }

        let status = Status::from_repr(bytes[4]).ok_or(ProtocolError::InvalidStatus(bytes[4]))?;

        // Failure responses carry no payload.
        if status != Status::Ok {
            if !payload.is_empty() {
                return Err(ProtocolError::TrailingBytes(payload.len()));
            }

            return Ok(CommandResponse {
                command: ty,
                status,
                value: ResponseValue::None,
            });
        }

        let value = match ty {
            CommandType::Info => {
                let (version, rest) = take_string(payload)?;
                let (serial, rest) = take_string(rest)?;
                if !rest.is_empty() {
                    return Err(ProtocolError::TrailingBytes(rest.len()));
                }

                ResponseValue::Info { version, serial }
            }
            CommandType::List => {
                let mut entries = Vec::new();
                let mut rest = payload;
                while !rest.is_empty() {
                    let (name, r) = take_string(rest)?;
                    if r.len() < 4 {
                        return Err(ProtocolError::Truncated {
                            expected: 4,
                            got: r.len(),
                        });
                    }
                    let size = u32::from_le_bytes([r[0], r[1], r[2], r[3]]);
                    entries.push(FileEntry { name, size });
                    rest = &r[4..];
                }

                ResponseValue::List(entries)
            }
            CommandType::Write => {
                if payload.len() != 4 {
                    return Err(ProtocolError::LengthMismatch {
                        expected: 4,
                        actual: payload.len(),
                    });
                }
                let acked = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);

                ResponseValue::Write { acked }
            }
            CommandType::EraseAll => {
                if !payload.is_empty() {
                    return Err(ProtocolError::TrailingBytes(payload.len()));
                }

                ResponseValue::None
            }
        };

        Ok(CommandResponse {
            command: ty,
            status,
            value,
        })
    }
}

fn take_string(bytes: &[u8]) -> Result<(String, &[u8]), ProtocolError> {
    let (&len, rest) = bytes.split_first().ok_or(ProtocolError::Truncated {
        expected: 1,
        got: 0,
    })?;
    let len = len as usize;
    if rest.len() < len {
        return Err(ProtocolError::Truncated {
            expected: len,
            got: rest.len(),
        });
    }

    let (raw, rest) = rest.split_at(len);
    let value = str::from_utf8(raw).map_err(|_| ProtocolError::InvalidString)?;

    Ok((value.to_string(), rest))
}

/// An exclusive connection to a saber
///
/// Owning a `Connection` is owning the transport: two callers cannot race
/// on the same link, and every exchange runs to completion before the next
/// one starts.
pub struct Connection<T: Transport> {
    serial: T,
}

impl<T: Transport> Connection<T> {
    pub fn new(serial: T) -> Self {
        Connection { serial }
    }

    /// Run an operation with the given read timeout, restoring the previous
    /// timeout afterwards
    pub fn with_timeout<R, F>(&mut self, timeout: std::time::Duration, mut f: F) -> Result<R, Error>
    where
        F: FnMut(&mut Connection<T>) -> Result<R, Error>,
    {
        let old_timeout = self.serial.timeout();
        self.serial.set_timeout(timeout)?;

        let result = f(self);

        self.serial.set_timeout(old_timeout)?;

        result
    }

    /// Write a single encoded command to the transport
    pub fn write_command(&mut self, command: Command<'_>) -> Result<(), Error> {
        debug!("Writing command: {}", command.command_type());

        let mut writer = BufWriter::new(&mut self.serial);
        command.write(&mut writer)?;
        writer.flush()?;

        Ok(())
    }

    /// Read and decode exactly one response to the given command
    pub fn read_response(&mut self, ty: CommandType) -> Result<CommandResponse, Error> {
        let mut header = [0; RESPONSE_HEADER_LEN];
        self.serial.read_exact(&mut header)?;

        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let mut frame = header.to_vec();
        frame.resize(RESPONSE_HEADER_LEN + len, 0);
        self.serial.read_exact(&mut frame[RESPONSE_HEADER_LEN..])?;

        let response = CommandResponse::decode(&frame, ty)?;
        debug!("Received {} response with status {}", ty, response.status);

        Ok(response)
    }

    /// Send a command and read its response, with the default retry budget
    pub fn command(&mut self, command: Command<'_>) -> Result<CommandResponse, Error> {
        self.command_with_retries(command, DEFAULT_RETRIES)
    }

    /// Send a command and read its response
    ///
    /// Timeouts and BUSY responses are retried with the identical frame up
    /// to `max_retries` additional times; exhausting the budget surfaces
    /// the last observed error. Decode failures are never retried. A
    /// response with ERROR or CHECKSUM_MISMATCH status maps to a
    /// [DeviceError] for the issuing command.
    pub fn command_with_retries(
        &mut self,
        command: Command<'_>,
        max_retries: usize,
    ) -> Result<CommandResponse, Error> {
        let ty = command.command_type();

        self.with_timeout(command.timeout(), |connection| {
            let mut last: Error = ConnectionError::Timeout(ty.into()).into();

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    debug!("Retrying {} command ({}/{})", ty, attempt, max_retries);
                }

                match connection.exchange(command).for_command(ty) {
                    Ok(response) => match response.status {
                        Status::Ok => return Ok(response),
                        Status::Busy => {
                            last = DeviceError::new(ty, DeviceErrorKind::Busy).into();
                        }
                        Status::Error => {
                            return Err(DeviceError::new(ty, DeviceErrorKind::Failed).into())
                        }
                        Status::ChecksumMismatch => {
                            return Err(
                                DeviceError::new(ty, DeviceErrorKind::ChecksumMismatch).into()
                            )
                        }
                    },
                    Err(err @ Error::Connection(ConnectionError::Timeout(_))) => {
                        last = err;
                    }
                    Err(err) => return Err(err),
                }
            }

            Err(last)
        })
    }

    fn exchange(&mut self, command: Command<'_>) -> Result<CommandResponse, Error> {
        let ty = command.command_type();

        self.serial.clear_input()?;
        self.write_command(command)?;
        self.read_response(ty)
    }

    /// Consume the connection, returning the underlying transport
    pub fn into_serial(self) -> T {
        self.serial
    }
}
