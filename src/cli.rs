use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::info;

use crate::config::{Config, StorePaths};
use crate::error::StaffbookError;
use crate::logging::init_logging;
use crate::migration::{MigrationCoordinator, MigrationReport};

#[derive(Parser)]
#[command(
    name = "staffbook",
    version,
    about = "Staffbook: employee records with a user-editable field schema"
)]
pub struct Cli {
    /// Configuration file (default: config.toml in the platform data directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the schema and every data store (overrides storage.data_dir)
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Migrate the stores, then start the server (default if no command specified)
    Serve,

    /// Bring every store in line with the current schema and exit
    Migrate,

    /// Show what renaming a field would touch, without changing anything
    Preview {
        /// The permanent id of the field to rename
        #[arg(long = "field-id")]
        field_id: String,

        /// The name the field would get
        #[arg(long = "new-name")]
        new_name: String,
    },

    /// Print the record column layout derived from the current schema
    Columns,
}

impl Cli {
    pub fn handle_command_line() -> Result<(), StaffbookError> {
        Cli::parse().run()
    }

    pub fn run(self) -> Result<(), StaffbookError> {
        let project_dirs = Config::project_dirs();
        let config_path = match (&self.config, &project_dirs) {
            (Some(path), _) => path.clone(),
            (None, Some(dirs)) => Config::default_config_path(dirs),
            (None, None) => PathBuf::from("config.toml"),
        };
        let config = Config::load_config(&config_path);

        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| config.data_dir(project_dirs.as_ref()));
        let paths = StorePaths::new(data_dir);
        fs::create_dir_all(&paths.data_dir)?;

        let _logger = init_logging(&config.logging, &paths.logs)?;
        info!(
            "Staffbook {} using config {} and data directory {}",
            env!("CARGO_PKG_VERSION"),
            config_path.display(),
            paths.data_dir.display()
        );

        let recovery = config.migration.recovery_mode();
        let server = config.server;

        let coordinator = MigrationCoordinator::new(paths, recovery);

        match self.command.unwrap_or(Command::Serve) {
            Command::Serve => Self::start_server(coordinator, server.host, server.port),
            Command::Migrate => {
                let report = coordinator.run_startup()?;
                print_report(&report);
                Ok(())
            }
            Command::Preview { field_id, new_name } => {
                let preview = coordinator.preview_rename(&field_id, &new_name)?;
                println!("{}", serde_json::to_string_pretty(&preview)?);
                Ok(())
            }
            Command::Columns => {
                for column in coordinator.columns()? {
                    println!("{}", column);
                }
                Ok(())
            }
        }
    }

    fn start_server(
        coordinator: MigrationCoordinator,
        host: String,
        port: u16,
    ) -> Result<(), StaffbookError> {
        let report = coordinator.run_startup()?;
        print_report(&report);

        info!("Starting server on {}:{}", host, port);

        let rt = tokio::runtime::Runtime::new()
            .map_err(|e| StaffbookError::Error(format!("Failed to create runtime: {}", e)))?;

        rt.block_on(async {
            let web_server = crate::server::WebServer::new(host, port, Arc::new(coordinator));
            web_server.start().await
        })
    }
}

fn print_report(report: &MigrationReport) {
    if let Some(replayed) = &report.replayed {
        println!("Completed an interrupted migration: {}", replayed.describe());
    }
    if report.bootstrapped {
        println!("Recorded the current schema as the migration baseline");
    }
    if report.renames.is_empty() {
        println!("No field renames detected");
    } else {
        println!(
            "Renamed {} column(s): {}",
            report.renames.len(),
            report.renames.describe()
        );
    }
}
