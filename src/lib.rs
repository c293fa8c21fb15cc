//! # save-vault
//!
//! Periodic, content-deduplicated snapshots of game save files and folders.
//!
//! ## Features
//!
//! - **Per-game Timers**: Every tracked save game is checked on its own interval
//! - **Change Detection**: SHA-256 content digests, a backup is only taken on change
//! - **Plain Copies**: Each backup is a full copy under `<data_dir>/<id>/<ticks>/`
//! - **Retention Management**: Oldest non-favorite backups go first, favorites stay forever
//! - **Duplicate Suppression**: Only one enabled save game per save location
//!
//! ## Quick Start
//!
//! ```no_run
//! use save_vault::backup::app_config::AppConfig;
//! use save_vault::backup::notifications::LogPublisher;
//! use save_vault::backup::orchestrator::BackupOrchestrator;
//! use save_vault::backup::repository::JsonFileRepository;
//! use save_vault::backup::store::BackupStore;
//! use std::sync::Arc;
//!
//! let config = AppConfig::load("config.yml")?;
//! let store = BackupStore::new(
//!     config.data_dir().as_path(),
//!     config.latest_screenshot_name().as_str(),
//!     config.backup_screenshot_name().as_str(),
//! );
//! let orchestrator = BackupOrchestrator::new(
//!     store,
//!     Arc::new(JsonFileRepository::new(config.saves_path())),
//!     Arc::new(LogPublisher),
//!     Arc::new(config.thread_pool()?),
//! );
//! orchestrator.initialize()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
