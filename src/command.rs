//! Commands understood by the saber
//!
//! Every command is encoded as a fixed header followed by an opcode-specific
//! payload:
//!
//! ```text
//! +-----------+--------+------------+---------------+---------+
//! | direction | opcode | len u16 LE | checksum u32 LE | payload |
//! +-----------+--------+------------+---------------+---------+
//! ```
//!
//! `direction` is `0x00` for host-to-saber frames and `0x01` for responses,
//! `len` counts the payload bytes. The checksum is only meaningful for WRITE
//! frames, where it covers the chunk data; all other commands carry zero.

use std::{
    io::{self, Write},
    time::Duration,
};

use strum::{Display, FromRepr};

pub(crate) const DIRECTION_COMMAND: u8 = 0x00;
pub(crate) const DIRECTION_RESPONSE: u8 = 0x01;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
const WRITE_TIMEOUT_PER_MB: Duration = Duration::from_secs(40);
// A full erase takes the saber anywhere from 20 seconds to 2 minutes.
const ERASE_ALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Seed for the XOR checksum carried by WRITE frames.
pub const CHECKSUM_INIT: u8 = 0xEF;

// The frame's u16 length field covers the offset plus the chunk data.
const MAX_WRITE_PAYLOAD: usize = u16::MAX as usize - 4;

/// Fold `data` into a running XOR checksum.
pub fn checksum(data: &[u8], mut checksum: u8) -> u8 {
    for byte in data {
        checksum ^= *byte;
    }

    checksum
}

/// Opcodes of the commands supported by the saber
#[derive(Copy, Clone, Debug, Display, FromRepr, PartialEq, Eq)]
#[repr(u8)]
#[non_exhaustive]
pub enum CommandType {
    /// Query firmware version and serial number
    Info = 0x01,
    /// Enumerate the files held in saber storage
    List = 0x02,
    /// Write one chunk of file data at an offset
    Write = 0x03,
    /// Erase all files in saber storage
    EraseAll = 0x04,
}

impl CommandType {
    pub fn timeout(&self) -> Duration {
        match self {
            CommandType::EraseAll => ERASE_ALL_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        }
    }

    pub fn timeout_for_size(&self, size: u32) -> Duration {
        fn calc_timeout(timeout_per_mb: Duration, size: u32) -> Duration {
            let mb = size as f64 / 1_000_000.0;
            std::cmp::max(
                DEFAULT_TIMEOUT,
                Duration::from_millis((timeout_per_mb.as_millis() as f64 * mb) as u64),
            )
        }

        match self {
            CommandType::Write => calc_timeout(WRITE_TIMEOUT_PER_MB, size),
            _ => self.timeout(),
        }
    }
}

/// A command to be sent to the saber, immutable once constructed
#[derive(Copy, Clone, Debug)]
pub enum Command<'a> {
    Info,
    List,
    Write { offset: u32, data: &'a [u8] },
    EraseAll,
}

impl<'a> Command<'a> {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Info => CommandType::Info,
            Command::List => CommandType::List,
            Command::Write { .. } => CommandType::Write,
            Command::EraseAll => CommandType::EraseAll,
        }
    }

    /// Timeout to apply while waiting for the response to this command
    pub fn timeout(&self) -> Duration {
        match self {
            Command::Write { data, .. } => {
                CommandType::Write.timeout_for_size(data.len() as u32)
            }
            _ => self.command_type().timeout(),
        }
    }

    /// Encode the command into its frame representation
    ///
    /// Encoding is deterministic: the same command always produces the same
    /// bytes.
    pub fn write<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        match *self {
            Command::Info => write_basic(writer, CommandType::Info, &[]),
            Command::List => write_basic(writer, CommandType::List, &[]),
            Command::EraseAll => write_basic(writer, CommandType::EraseAll, &[]),
            Command::Write { offset, data } => {
                if data.len() > MAX_WRITE_PAYLOAD {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "chunk does not fit the frame's length field",
                    ));
                }

                let check = checksum(data, CHECKSUM_INIT);

                writer.write_all(&[DIRECTION_COMMAND, CommandType::Write as u8])?;
                writer.write_all(&((4 + data.len()) as u16).to_le_bytes())?;
                writer.write_all(&(check as u32).to_le_bytes())?;
                writer.write_all(&offset.to_le_bytes())?;
                writer.write_all(data)?;

                Ok(())
            }
        }
    }
}

fn write_basic<W: Write>(mut writer: W, ty: CommandType, data: &[u8]) -> std::io::Result<()> {
    writer.write_all(&[DIRECTION_COMMAND, ty as u8])?;
    writer.write_all(&(data.len() as u16).to_le_bytes())?;
    writer.write_all(&0u32.to_le_bytes())?;
    writer.write_all(data)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn encode(command: Command<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        command.write(&mut buf).unwrap();
        buf
    }

    #[test]
    fn checksum_folds_from_seed() {
        assert_eq!(checksum(&[], CHECKSUM_INIT), 0xEF);
        assert_eq!(checksum(&[0xEF], CHECKSUM_INIT), 0x00);
        assert_eq!(checksum(&[0xAA, 0xBB], CHECKSUM_INIT), 0xEF ^ 0xAA ^ 0xBB);
    }

    #[test]
    fn plain_commands_encode_to_empty_frames() {
        assert_eq!(encode(Command::Info), [0x00, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode(Command::List), [0x00, 0x02, 0, 0, 0, 0, 0, 0]);
        assert_eq!(encode(Command::EraseAll), [0x00, 0x04, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn write_command_carries_offset_data_and_checksum() {
        let frame = encode(Command::Write {
            offset: 0x1122_3344,
            data: &[0xAA, 0xBB],
        });

        assert_eq!(
            frame,
            [
                0x00, 0x03, // direction, opcode
                0x06, 0x00, // payload length: offset + 2 data bytes
                0xFE, 0x00, 0x00, 0x00, // checksum over the data
                0x44, 0x33, 0x22, 0x11, // offset
                0xAA, 0xBB, // data
            ]
        );
    }

    #[test]
    fn write_command_rejects_chunks_too_large_to_frame() {
        let data = vec![0; u16::MAX as usize];
        let err = Command::Write {
            offset: 0,
            data: &data,
        }
        .write(&mut Vec::new())
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn encoding_is_deterministic() {
        let data = [1, 2, 3];
        let command = Command::Write {
            offset: 42,
            data: &data,
        };

        assert_eq!(encode(command), encode(command));
    }

    #[test]
    fn erase_timeout_allows_for_slow_flash() {
        assert!(CommandType::EraseAll.timeout() > CommandType::Info.timeout());
    }

    #[test]
    fn write_timeout_scales_with_size() {
        let small = CommandType::Write.timeout_for_size(512);
        let large = CommandType::Write.timeout_for_size(8_000_000);

        assert_eq!(small, CommandType::Info.timeout());
        assert!(large > small);
    }
}
