use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "recsync")]
#[command(about = "Browse, unlock and download recordings from a networked PVR", long_about = None)]
pub struct Cli {
    /// JSON settings file; every field is optional
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan the recorder over UPnP and FTP and print what was found
    Scan,
    /// Scan, then download the recordings at the given tree paths
    Download {
        /// Tree paths such as `/Drama/Silent Witness_20240105_2100`
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Clear the copy-protection lock of one recording
    Unlock {
        path: String,
    },
}
