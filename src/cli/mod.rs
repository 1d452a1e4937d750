//! CLI utilities shared by the saberflash binary
//!
//! No stability guaranties apply

use std::{path::PathBuf, time::Duration};

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, LevelFilter};
use serialport::{available_ports, SerialPortInfo, SerialPortType};

use crate::{
    error::Error,
    flasher::{Flasher, ProgressCallbacks},
    interface::Interface,
};

const DEFAULT_BAUD: u32 = 115_200;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Serial port connected to the saber; autodetected when omitted
    #[arg(short = 'p', long, env = "SABERFLASH_PORT")]
    pub port: Option<String>,
    /// Baud rate to use for the serial connection
    #[arg(short = 'b', long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
}

/// Initialize the logger with the given verbosity, honoring `RUST_LOG`
pub fn initialize_logger(filter: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(filter)
        .parse_default_env()
        .init();
}

/// Open a session with a saber, autodetecting the serial port when none
/// was given
pub fn connect(args: &ConnectArgs) -> Result<Flasher<Interface>, Error> {
    if let Some(port) = &args.port {
        info!("Serial port: {}", port);
        let interface = Interface::open(port, args.baud, DEFAULT_TIMEOUT)?;
        return Flasher::connect(interface);
    }

    detect_saber(args.baud)
}

/// Probe every plausible serial port with the connection handshake and
/// return a session on the first saber that answers
fn detect_saber(baud: u32) -> Result<Flasher<Interface>, Error> {
    println!("Searching for OpenCore saber...");

    for port_info in detect_usb_serial_ports()? {
        debug!("Probing serial port {}", port_info.port_name);

        let interface = match Interface::open(&port_info.port_name, baud, DEFAULT_TIMEOUT) {
            Ok(interface) => interface,
            Err(err) => {
                debug!("Failed to open {}: {err}", port_info.port_name);
                continue;
            }
        };

        match Flasher::connect(interface) {
            Ok(flasher) => {
                println!("OpenCore saber found on {}", port_info.port_name);
                return Ok(flasher);
            }
            Err(err) => debug!("No saber on {}: {err}", port_info.port_name),
        }
    }

    Err(Error::NoSaberFound)
}

fn detect_usb_serial_ports() -> Result<Vec<SerialPortInfo>, Error> {
    let ports = available_ports()?;
    let ports = ports
        .into_iter()
        .filter(|port_info| {
            matches!(
                &port_info.port_type,
                SerialPortType::UsbPort(..) | SerialPortType::Unknown
            )
        })
        .collect();

    Ok(ports)
}

/// Upload a batch of files, optionally skipping ones that do not exist
/// locally
pub fn upload_files(
    flasher: &mut Flasher<Interface>,
    files: &[PathBuf],
    continue_on_missing: bool,
) -> Result<(), Error> {
    for file in files {
        let mut progress = CliProgress::default();

        match flasher.upload_file_with_progress(file, Some(&mut progress)) {
            Ok(written) => println!("Uploaded {} ({} bytes)", file.display(), written),
            Err(Error::FileNotFound(path)) if continue_on_missing => {
                eprintln!("Skipping missing file {}", path.display());
            }
            Err(err) => return Err(err),
        }
    }

    Ok(())
}

/// Progress bar shown while uploading
#[derive(Default)]
pub struct CliProgress {
    pb: Option<ProgressBar>,
}

impl ProgressCallbacks for CliProgress {
    fn init(&mut self, total: usize) {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .unwrap()
            .progress_chars("=> "),
        );

        self.pb = Some(pb);
    }

    fn update(&mut self, current: usize) {
        if let Some(pb) = &self.pb {
            pb.set_position(current as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.pb.take() {
            pb.finish();
        }
    }
}
