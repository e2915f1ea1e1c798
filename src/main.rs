#![cfg(not(tarpaulin_include))]

use std::fs;

use clap::Parser;
use coilstock::app;
use coilstock::config::{Command, Config};
use coilstock::downloader;
use coilstock::login::Accounts;
use coilstock::saving::{DocumentStore, FileStore, STOCK_DOCUMENT_KEY};
use coilstock::table::TableState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();

    match config.command() {
        Command::Serve => app::run(config).await,
        Command::AddUser { email, password } => {
            let accounts = Accounts::open(&config.data_dir, config.session_duration())?;
            accounts.register_user(&email, &password)?;
            println!("Registered {}", email.trim().to_lowercase());
            Ok(())
        }
        Command::Export { out } => {
            let store = FileStore::open(&config.data_dir)?;
            let document = store
                .get(STOCK_DOCUMENT_KEY)?
                .ok_or("No saved stock table to export")?;
            let mut table = TableState::new();
            table.replace_all(document.rows, document.source_file_name);
            table.set_as_at_date(&document.as_at_date)?;
            let file = downloader::to_xlsx(&table.snapshot())?;
            let path = out.unwrap_or_else(|| file.file_name.clone().into());
            fs::write(&path, &file.bytes)?;
            println!("Wrote {} rows to {}", table.len(), path.display());
            Ok(())
        }
    }
}
