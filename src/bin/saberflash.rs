use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};
use log::{debug, LevelFilter};
use miette::{IntoDiagnostic, Result};
use saberflash::cli::{connect, initialize_logger, upload_files, ConnectArgs};

#[derive(Debug, Parser)]
#[command(about, version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    subcommand: Commands,

    /// Show debugging information
    #[arg(short = 'D', long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Display the saber's firmware version and serial number
    Info(ConnectArgs),
    /// List all files stored on the saber
    List(ConnectArgs),
    /// Upload one or more files to the saber
    Upload(UploadArgs),
    /// Erase all files stored on the saber
    EraseAll(EraseArgs),
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// Files to upload, separated by spaces
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Skip files that do not exist locally instead of aborting
    #[arg(short = 'c', long)]
    continue_on_missing: bool,

    #[command(flatten)]
    connect_args: ConnectArgs,
}

#[derive(Debug, Args)]
struct EraseArgs {
    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    yes: bool,

    #[command(flatten)]
    connect_args: ConnectArgs,
}

fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();
    initialize_logger(if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    debug!("{:#?}", cli.subcommand);

    match cli.subcommand {
        Commands::Info(args) => info(args),
        Commands::List(args) => list(args),
        Commands::Upload(args) => upload(args),
        Commands::EraseAll(args) => erase_all(args),
    }
}

fn info(args: ConnectArgs) -> Result<()> {
    let mut flasher = connect(&args)?;
    let info = flasher.device_info()?;

    println!("Firmware version: v{}", info.version);
    println!("Serial number:    {}", info.serial);

    Ok(())
}

fn list(args: ConnectArgs) -> Result<()> {
    let mut flasher = connect(&args)?;
    let files = flasher.list_files()?;

    if files.is_empty() {
        println!("No files stored on the saber.");
    } else {
        // Device order, not re-sorted.
        for file in &files {
            println!("{:<32} {:>10}", file.name, file.size);
        }
    }

    Ok(())
}

fn upload(args: UploadArgs) -> Result<()> {
    let mut flasher = connect(&args.connect_args)?;
    upload_files(&mut flasher, &args.files, args.continue_on_missing)?;

    Ok(())
}

fn erase_all(args: EraseArgs) -> Result<()> {
    if !args.yes {
        println!("*** This will erase ALL files on the saber! ***");
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Do you want to continue?")
            .interact_opt()
            .into_diagnostic()?
            .unwrap_or(false);

        if !confirmed {
            println!("Aborting saber erase.");
            return Ok(());
        }
    }

    let mut flasher = connect(&args.connect_args)?;
    flasher.erase_all()?;
    println!("All files erased.");

    Ok(())
}
