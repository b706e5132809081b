use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use guestflow::config::{self, Config};
use guestflow::dispatch;
use guestflow::form::FormWorkflow;
use guestflow::sheet::{MirrorWorkflow, RestSheet};
use guestflow::store::SharedStore;
use guestflow::vms::{Credentials, ParkingMap, RegisterWorkflow, VmsClient};
use guestflow::{contacts, merge, sweep, vms};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import the staged reservation export into the store
    Merge,
    /// Submit pending rows to the web form
    Form,
    /// Export pending rows as a contact-list CSV
    Contacts,
    /// Register pending rows in the VMS one by one
    VmsRegister,
    /// Bulk-import pending rows into the VMS
    VmsImport,
    /// Append pending rows to the mirror sheet
    Mirror,
    /// Age out records past their retention window
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    match args.command {
        Command::Merge => {
            merge::run(&cfg)?;
        }
        Command::Form => {
            let store = open_store(&cfg)?;
            let workflow = Arc::new(FormWorkflow::from_config(&cfg));
            dispatch::run(&store, workflow, &cfg.app.completed_marker, cfg.app.workers).await?;
        }
        Command::Contacts => {
            let store = open_store(&cfg)?;
            contacts::run(&cfg, &store).await?;
        }
        Command::VmsRegister => {
            let store = open_store(&cfg)?;
            let client = VmsClient::new(&cfg.vms.base_url)?;
            let creds = Credentials {
                email: cfg.operator.email.clone(),
                password: cfg.vms.password.clone(),
            };
            let token = client.login(&creds).await?;
            let parking = ParkingMap::load(Path::new(&cfg.vms.parking_map_path))?;
            let workflow = Arc::new(RegisterWorkflow::new(
                Arc::new(client),
                token,
                parking,
                cfg.vms.fallback_email.clone(),
                cfg.vms.register.columns(),
            ));
            dispatch::run(&store, workflow, &cfg.app.completed_marker, cfg.app.workers).await?;
        }
        Command::VmsImport => {
            let store = open_store(&cfg)?;
            vms::bulk::run(&cfg, &store).await?;
        }
        Command::Mirror => {
            let store = open_store(&cfg)?;
            let sheet_cfg = match &cfg.sheet {
                Some(sheet) => sheet,
                None => bail!("sheet mirroring is not configured"),
            };
            let sheet = Arc::new(RestSheet::new(&sheet_cfg.base_url, &sheet_cfg.token)?);
            let columns = cfg.sheet_columns().context("sheet columns missing")?;
            let workflow = Arc::new(MirrorWorkflow::new(sheet, columns));
            dispatch::run(&store, workflow, &cfg.app.completed_marker, cfg.app.workers).await?;
        }
        Command::Sweep => {
            let removed =
                sweep::sweep_store(Path::new(&cfg.app.store_path), cfg.retention.store_days)?;
            info!(removed, "swept store");
            if let Some(sheet_cfg) = &cfg.sheet {
                let sheet = RestSheet::new(&sheet_cfg.base_url, &sheet_cfg.token)?;
                let removed = sweep::sweep_sheet(
                    &sheet,
                    guestflow::dates::today(),
                    sheet_cfg.retention_days,
                )
                .await?;
                info!(removed, "swept mirror sheet");
            }
        }
    }

    Ok(())
}

fn open_store(cfg: &Config) -> Result<SharedStore> {
    SharedStore::open(Path::new(&cfg.app.store_path))
}
