use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Command-line and environment configuration.
///
/// Every flag can also be given as a `COILSTOCK_*` environment variable or in
/// a `.env` file next to the binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "coilstock", version, about = "Coil stock import, adjustment and export service")]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "COILSTOCK_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: String,

    /// Directory holding users.json and the saved stock table
    #[arg(long, env = "COILSTOCK_DATA_DIR", default_value = "database")]
    pub data_dir: PathBuf,

    /// Directory served under /static
    #[arg(long, env = "COILSTOCK_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// How long a sign-in stays valid
    #[arg(long, env = "COILSTOCK_SESSION_HOURS", default_value_t = 24)]
    pub session_hours: u64,

    /// Largest accepted upload
    #[arg(long, env = "COILSTOCK_MAX_UPLOAD_MB", default_value_t = 10)]
    pub max_upload_mb: usize,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the web server (default)
    Serve,

    /// Register an account that can sign in
    AddUser { email: String, password: String },

    /// Write the saved stock table to an .xlsx file
    Export {
        /// Output path; defaults to Coils_Stock_<date>.xlsx in the working directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

impl Config {
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_hours * 60 * 60)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
