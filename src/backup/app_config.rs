use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{validate_file_name, validate_parent_dir, validate_writable_dir};
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

pub static DEFAULT_LATEST_SCREENSHOT_NAME: &str = "latest_screenshot.png";
pub static DEFAULT_BACKUP_SCREENSHOT_NAME: &str = "screenshot.png";

/// Application configuration, loaded from YAML.
///
/// `data_dir` holds one folder per tracked save game; `saves_path` is the
/// persisted JSON list of save games shared with the UI.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder, Getters, CopyGetters)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_screenshot_names"))]
pub struct AppConfig {
    #[validate(custom(function = validate_writable_dir))]
    #[builder(into)]
    #[getset(get = "pub")]
    data_dir: PathBuf,
    #[validate(custom(function = validate_parent_dir))]
    #[builder(into)]
    #[getset(get = "pub")]
    saves_path: PathBuf,
    #[serde(default = "default_latest_screenshot_name")]
    #[validate(custom(function = validate_file_name))]
    #[builder(default = default_latest_screenshot_name(), into)]
    #[getset(get = "pub")]
    latest_screenshot_name: String,
    #[serde(default = "default_backup_screenshot_name")]
    #[validate(custom(function = validate_file_name))]
    #[builder(default = default_backup_screenshot_name(), into)]
    #[getset(get = "pub")]
    backup_screenshot_name: String,
    #[validate(range(min = 1))]
    #[getset(get_copy = "pub")]
    worker_threads: Option<usize>,
}

fn default_latest_screenshot_name() -> String {
    DEFAULT_LATEST_SCREENSHOT_NAME.to_string()
}

fn default_backup_screenshot_name() -> String {
    DEFAULT_BACKUP_SCREENSHOT_NAME.to_string()
}

fn validate_screenshot_names(config: &AppConfig) -> std::result::Result<(), ValidationError> {
    if config.latest_screenshot_name == config.backup_screenshot_name {
        return Err(ValidationError::new("DuplicateScreenshotName").with_message(
            "latest_screenshot_name and backup_screenshot_name must differ".into(),
        ));
    }

    Ok(())
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = File::open(path)
            .map_err(Error::from)
            .and_then(|f| {
                serde_yml::from_reader::<_, AppConfig>(f)
                    .map_err(Error::from)
                    .with_msg(format!("Parse YAML config failed: {:?}", path))
            })?;
        config
            .validate()
            .map_err(Error::from)
            .with_msg(format!("Config validation failed: {:?}", path))?;
        Ok(config)
    }

    pub fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("backup-{i}"));
        if let Some(threads) = self.worker_threads {
            builder = builder.num_threads(threads);
        }
        Ok(builder.build()?)
    }
}
