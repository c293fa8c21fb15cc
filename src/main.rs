use clap::{Parser, Subcommand};
use save_vault::backup::app_config::AppConfig;
use save_vault::backup::notifications::LogPublisher;
use save_vault::backup::orchestrator::BackupOrchestrator;
use save_vault::backup::repository::{JsonFileRepository, SaveGameRepository};
use save_vault::backup::result_error::error::Error;
use save_vault::backup::result_error::result::Result;
use save_vault::backup::save_game::{is_favorite, SaveGame};
use save_vault::backup::store::BackupStore;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Keep timestamped copies of game saves, only when they change
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up every enabled save game on its schedule, forever
    Run,
    /// Start tracking a save location, taking a first backup right away
    Add {
        #[arg(short, long)]
        source: PathBuf,
        /// Minutes between backups
        #[arg(short, long, default_value_t = 5)]
        frequency: u32,
        /// Non-favorite backups to keep
        #[arg(short, long, default_value_t = 10)]
        max_backups: u32,
    },
    /// Back up a save game now if it changed
    Backup {
        #[arg(long)]
        id: Uuid,
    },
    /// List backups of a save game, newest first
    List {
        #[arg(long)]
        id: Uuid,
    },
    /// Mark a backup as favorite so it is never rotated out
    Favorite {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        backup: PathBuf,
        #[arg(long)]
        unset: bool,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => {}
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(&args.config)?;
    let repository = Arc::new(JsonFileRepository::new(config.saves_path()));
    let store = BackupStore::new(
        config.data_dir().as_path(),
        config.latest_screenshot_name().as_str(),
        config.backup_screenshot_name().as_str(),
    );
    let orchestrator = BackupOrchestrator::new(
        store,
        repository.clone(),
        Arc::new(LogPublisher),
        Arc::new(config.thread_pool()?),
    );

    match args.command {
        Command::Run => {
            orchestrator.initialize()?;
            info!("Watching save games, press Ctrl-C to stop");
            loop {
                std::thread::park();
            }
        }
        Command::Add {
            source,
            frequency,
            max_backups,
        } => {
            orchestrator.load_persisted()?;
            let save_game = SaveGame::builder()
                .save_location(source)
                .frequency(frequency)
                .max_backups(max_backups)
                .build();
            let id = save_game.id();
            let backup = orchestrator.register(save_game)?;
            // the new record plus any duplicates it disabled
            repository.upsert(orchestrator.save_games().iter())?;

            println!("{id}");
            info!("First backup of {id} at {:?}", backup.path());
            Ok(())
        }
        Command::Backup { id } => {
            orchestrator.load_persisted()?;
            if orchestrator.save_game(id).is_none() {
                return Err(Error::UnknownSaveGame(id));
            }
            if orchestrator.trigger_manual_backup(id) {
                println!("backup created");
            } else {
                println!("no backup created");
            }
            Ok(())
        }
        Command::List { id } => {
            let metadata = repository.backup_metadata(id)?.unwrap_or_default();
            for backup in orchestrator.backups(id)? {
                let created = backup
                    .created()
                    .to_date_time()
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| backup.created().to_string());
                let star = if is_favorite(&metadata, backup.path()) {
                    "*"
                } else {
                    " "
                };
                println!("{star} {created} {}", backup.path().display());
            }
            Ok(())
        }
        Command::Favorite { id, backup, unset } => {
            let mut persisted = repository.load_all()?;
            let save_game = persisted
                .iter_mut()
                .find(|s| s.id() == id)
                .ok_or(Error::UnknownSaveGame(id))?;
            save_game.set_favorite(&backup, !unset);
            repository.save_all(&persisted)?;
            info!("Updated favorites in {:?}", repository.path());
            Ok(())
        }
    }
}
