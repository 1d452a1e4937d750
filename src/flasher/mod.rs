//! Run user-facing operations against a saber
//!
//! The [Flasher] struct owns an exclusive session with a saber and exposes
//! the user-facing operations: query firmware identity, list stored files,
//! upload files and erase storage. A `Flasher` only exists for a saber
//! that answered the connection handshake, and every operation borrows it
//! mutably, so no two exchanges can ever interleave on the same link.

use std::{
    fs,
    io::Read,
    path::Path,
};

use log::{debug, info};

use crate::{
    command::Command,
    connection::{Connection, FileEntry},
    error::{ConnectionError, DeviceErrorKind, Error, ProtocolError},
    interface::Transport,
};

/// Largest chunk of file data carried by a single WRITE exchange, imposed
/// by the saber's serial receive buffer
pub const WRITE_CHUNK_SIZE: usize = 512;

/// How many times a chunk the saber rejected with a checksum mismatch is
/// sent again before the upload is aborted
const WRITE_CHUNK_RETRIES: usize = 3;

/// Progress update callbacks
pub trait ProgressCallbacks {
    /// Initialize some progress report
    fn init(&mut self, total: usize);
    /// Update some progress report
    fn update(&mut self, current: usize);
    /// Finish some progress report
    fn finish(&mut self);
}

/// Firmware identity reported by a saber
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub version: String,
    pub serial: String,
}

/// An established session with a saber, ready to run commands
pub struct Flasher<T: Transport> {
    connection: Connection<T>,
}

impl<T: Transport> Flasher<T> {
    /// Connect to a saber over the given transport.
    ///
    /// The handshake is an INFO probe with the standard retry budget: a
    /// session is only handed out for a device that answered it, so holding
    /// a `Flasher` means the saber is ready. Any handshake failure reports
    /// a connection error and leaves nothing behind.
    pub fn connect(serial: T) -> Result<Self, Error> {
        let mut connection = Connection::new(serial);

        match connection.command(Command::Info) {
            Ok(response) => {
                if let Ok((version, serial)) = response.value.into_info() {
                    info!("Connected to saber (firmware v{version}, serial {serial})");
                }

                Ok(Flasher { connection })
            }
            Err(err) => {
                debug!("Handshake failed: {err:?}");
                Err(Error::Connection(ConnectionError::ConnectionFailed))
            }
        }
    }

    /// Query firmware version and serial number
    pub fn device_info(&mut self) -> Result<DeviceInfo, Error> {
        let response = self.connection.command(Command::Info)?;
        let (version, serial) = response.value.into_info()?;

        Ok(DeviceInfo { version, serial })
    }

    /// List the files held in saber storage, in the order the saber
    /// reports them
    pub fn list_files(&mut self) -> Result<Vec<FileEntry>, Error> {
        let response = self.connection.command(Command::List)?;
        response.value.into_list()
    }

    /// Erase all files in saber storage. Irreversible; the saber reports
    /// OK only once the erase has completed.
    pub fn erase_all(&mut self) -> Result<(), Error> {
        info!("Erasing all files on the saber, this may take a few minutes");
        self.connection.command(Command::EraseAll)?;
        info!("Saber storage erased");

        Ok(())
    }

    /// Upload a local file to the saber, returning the number of bytes
    /// transferred
    pub fn upload_file(&mut self, path: &Path) -> Result<u64, Error> {
        self.upload_file_with_progress(path, None)
    }

    /// Upload a local file, reporting progress through the given callbacks
    pub fn upload_file_with_progress(
        &mut self,
        path: &Path,
        progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<u64, Error> {
        self.upload_file_chunked(path, WRITE_CHUNK_SIZE, progress)
    }

    /// Upload a local file in chunks of at most `chunk_size` bytes.
    ///
    /// The chunk size is clamped to [WRITE_CHUNK_SIZE] and stays fixed for
    /// the whole upload. A missing local file fails before any exchange
    /// reaches the saber.
    pub fn upload_file_chunked(
        &mut self,
        path: &Path,
        chunk_size: usize,
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<u64, Error> {
        if !path.is_file() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }

        let mut file = fs::File::open(path)
            .map_err(|err| Error::FileOpen(path.display().to_string(), err))?;
        let total = file
            .metadata()
            .map_err(|err| Error::FileOpen(path.display().to_string(), err))?
            .len();

        // The WRITE frame's offset field is 32 bits wide.
        if total > u64::from(u32::MAX) {
            return Err(Error::FileTooLarge {
                path: path.display().to_string(),
                size: total,
            });
        }

        let chunk_size = chunk_size.clamp(1, WRITE_CHUNK_SIZE);
        info!(
            "Uploading {} ({} bytes in chunks of {})",
            path.display(),
            total,
            chunk_size
        );

        if let Some(cb) = progress.as_deref_mut() {
            cb.init(total as usize);
        }

        let mut chunk = vec![0; chunk_size];
        let mut written: u64 = 0;
        let mut offset: u32 = 0;

        while written < total {
            let len = chunk_size.min((total - written) as usize);
            file.read_exact(&mut chunk[..len])
                .map_err(|err| Error::FileOpen(path.display().to_string(), err))?;

            let acked = self.write_chunk(offset, &chunk[..len], written)?;
            written += u64::from(acked);
            offset += acked;

            if let Some(cb) = progress.as_deref_mut() {
                cb.update(written as usize);
            }
        }

        if let Some(cb) = progress.as_deref_mut() {
            cb.finish();
        }
        info!("Finished upload of {}", path.display());

        Ok(written)
    }

    /// Run one WRITE exchange, resending the identical chunk while the
    /// saber reports a checksum mismatch. Never advances past a chunk that
    /// has not been acknowledged; every failure carries the failing offset
    /// and the byte count acknowledged so far.
    fn write_chunk(&mut self, offset: u32, data: &[u8], written: u64) -> Result<u32, Error> {
        let command = Command::Write { offset, data };
        let mut retries = 0;

        loop {
            match self.connection.command(command) {
                Ok(response) => {
                    let acked = response.value.into_write_ack()?;
                    if acked as usize != data.len() {
                        return Err(ProtocolError::AckMismatch {
                            expected: data.len(),
                            got: acked as usize,
                        }
                        .into());
                    }

                    return Ok(acked);
                }
                Err(Error::Device(device))
                    if device.kind() == DeviceErrorKind::ChecksumMismatch =>
                {
                    if retries == WRITE_CHUNK_RETRIES {
                        return Err(Error::ChecksumMismatch {
                            offset: offset as u64,
                            written,
                        });
                    }

                    retries += 1;
                    debug!(
                        "Checksum mismatch at offset {}, resending chunk ({}/{})",
                        offset, retries, WRITE_CHUNK_RETRIES
                    );
                }
                Err(err) => {
                    return Err(Error::WriteFailed {
                        offset: offset as u64,
                        written,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    /// Consume the session, returning the underlying transport
    pub fn into_serial(self) -> T {
        self.connection.into_serial()
    }
}
