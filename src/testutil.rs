//! A scripted saber double for exercising the protocol layers off-hardware

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    time::Duration,
};

use crate::{
    command::{CommandType, DIRECTION_RESPONSE},
    connection::Status,
    error::ConnectionError,
    interface::Transport,
};

const COMMAND_HEADER_LEN: usize = 8;

/// How the mock saber reacts to one received command frame
pub(crate) enum Reply {
    /// Queue these bytes for the host to read
    Frame(Vec<u8>),
    /// Swallow the command; the next read times out
    Silence,
}

/// An in-memory [Transport] that replies to command frames from a script
/// and records every frame the host writes.
pub(crate) struct MockDevice {
    replies: VecDeque<Reply>,
    pending: VecDeque<u8>,
    inbox: Vec<u8>,
    timeout: Duration,
    /// Every complete command frame received, in order
    pub writes: Vec<Vec<u8>>,
}

impl MockDevice {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        MockDevice {
            replies: replies.into_iter().collect(),
            pending: VecDeque::new(),
            inbox: Vec::new(),
            timeout: Duration::from_secs(3),
            writes: Vec::new(),
        }
    }

    /// Command frames recorded for the given opcode
    pub fn frames_for(&self, ty: CommandType) -> Vec<&[u8]> {
        self.writes
            .iter()
            .filter(|frame| frame.get(1) == Some(&(ty as u8)))
            .map(Vec::as_slice)
            .collect()
    }

    fn pump(&mut self) {
        while self.inbox.len() >= COMMAND_HEADER_LEN {
            let len = u16::from_le_bytes([self.inbox[2], self.inbox[3]]) as usize;
            let total = COMMAND_HEADER_LEN + len;
            if self.inbox.len() < total {
                break;
            }

            let rest = self.inbox.split_off(total);
            let frame = std::mem::replace(&mut self.inbox, rest);
            self.writes.push(frame);

            match self.replies.pop_front() {
                Some(Reply::Frame(bytes)) => self.pending.extend(bytes),
                Some(Reply::Silence) | None => {}
            }
        }
    }
}

impl Write for MockDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inbox.extend_from_slice(buf);
        self.pump();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timeout"));
        }

        let count = buf.len().min(self.pending.len());
        for slot in buf.iter_mut().take(count) {
            *slot = self.pending.pop_front().unwrap();
        }

        Ok(count)
    }
}

impl Transport for MockDevice {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Build a raw response frame for the given opcode, status and payload
pub(crate) fn response_frame(ty: CommandType, status: Status, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![DIRECTION_RESPONSE, ty as u8];
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.push(status as u8);
    frame.extend_from_slice(payload);
    frame
}

pub(crate) fn info_frame(version: &str, serial: &str) -> Vec<u8> {
    let mut payload = vec![version.len() as u8];
    payload.extend_from_slice(version.as_bytes());
    payload.push(serial.len() as u8);
    payload.extend_from_slice(serial.as_bytes());
    response_frame(CommandType::Info, Status::Ok, &payload)
}

pub(crate) fn list_frame(entries: &[(&str, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (name, size) in entries {
        payload.push(name.len() as u8);
        payload.extend_from_slice(name.as_bytes());
        payload.extend_from_slice(&size.to_le_bytes());
    }
    response_frame(CommandType::List, Status::Ok, &payload)
}

pub(crate) fn write_ok_frame(acked: u32) -> Vec<u8> {
    response_frame(CommandType::Write, Status::Ok, &acked.to_le_bytes())
}

pub(crate) fn erase_ok_frame() -> Vec<u8> {
    response_frame(CommandType::EraseAll, Status::Ok, &[])
}
