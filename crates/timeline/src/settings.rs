use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::calendar::{CalendarDays, DEFAULT_DATE_FORMAT};
use super::error::{
    CreateDirSnafu, ReadSettingsSnafu, RenameTempFileSnafu, SerializeSettingsSnafu,
    SettingsResult, WriteFileSnafu,
};
use super::types::Order;

pub const SETTINGS_DIRECTORY_NAME: &str = "chatrail";
pub const SETTINGS_FILE_NAME: &str = "timeline.json";
pub const SETTINGS_ENV_PREFIX: &str = "CHATRAIL_";

/// Construction-time knobs for a timeline store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSettings {
    #[serde(default)]
    pub order: Order,
    /// Fixed offset used to cut calendar days; `None` uses the local timezone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for TimelineSettings {
    fn default() -> Self {
        Self {
            order: Order::default(),
            utc_offset_minutes: None,
            date_format: default_date_format(),
        }
    }
}

impl TimelineSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".chatrail"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn load() -> SettingsResult<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Defaults, then the JSON file if present, then `CHATRAIL_*` variables.
    pub fn load_from(path: &Path) -> SettingsResult<Self> {
        let figment = Self::file_figment(path).merge(Env::prefixed(SETTINGS_ENV_PREFIX));
        Self::extract(figment)
    }

    /// Same as [`Self::load_from`] without the environment layer.
    pub fn load_file(path: &Path) -> SettingsResult<Self> {
        Self::extract(Self::file_figment(path))
    }

    fn file_figment(path: &Path) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            tracing::info!("loading timeline settings from {:?}", path);
            figment.merge(Json::file(path))
        } else {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            figment
        }
    }

    fn extract(figment: Figment) -> SettingsResult<Self> {
        let settings = figment
            .extract::<Self>()
            .context(ReadSettingsSnafu {
                stage: "extract-timeline-settings",
            })?
            .normalized();
        // Reject bad offsets/formats at load time rather than at store construction.
        settings.calendar()?;
        Ok(settings)
    }

    pub fn normalized(mut self) -> Self {
        self.date_format = self.date_format.trim().to_string();
        if self.date_format.is_empty() {
            tracing::warn!("blank date format in timeline settings, using default");
            self.date_format = default_date_format();
        }
        self
    }

    pub fn calendar(&self) -> SettingsResult<CalendarDays> {
        let calendar = match self.utc_offset_minutes {
            Some(minutes) => CalendarDays::with_offset_minutes(minutes)?,
            None => CalendarDays::local(),
        };
        calendar.with_format(&self.date_format)
    }

    pub fn persist(&self, path: &Path) -> SettingsResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(self).context(SerializeSettingsSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: path.to_path_buf(),
        })?;

        tracing::info!("saved timeline settings to {:?}", path);
        Ok(())
    }
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}
