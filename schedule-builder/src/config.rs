use std::str::FromStr;

use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ICS_FILENAME: &str = "schedule-selected-events";
pub const DEFAULT_TIMEZONE: &str = "UTC";
const STORAGE_KEY_PREFIX: &str = "schedule_builder_selections_";

static STORAGE_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());
static ICS_FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("selector `{0}` is required")]
    MissingSelector(&'static str),
    #[error("selector `{field}` could not be compiled: {selector:?}")]
    InvalidSelector {
        field: &'static str,
        selector: String,
    },
    #[error("storage key may only contain letters, numbers and underscores: {0:?}")]
    InvalidStorageKey(String),
    #[error("ICS filename may only contain letters, numbers, hyphens and underscores: {0:?}")]
    InvalidIcsFilename(String),
}

/// Raw selector strings, all relative to an event container except
/// `search_context`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorConfig {
    pub search_context: Option<String>,
    pub event_container: String,
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub date: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
}

/// Where the browser layer places the selection checkbox in a container.
/// Carried through unchanged; scanning and encoding do not depend on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckboxPosition {
    #[default]
    Beginning,
    End,
    BeforeTitle,
    AfterTitle,
}

/// Settings of one schedule builder block, shaped like the settings object a
/// host page hands to the browser layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockConfig {
    #[serde(default)]
    pub block_id: String,
    pub selectors: SelectorConfig,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub local_storage_key: String,
    #[serde(default = "default_ics_filename")]
    pub ics_filename: String,
    #[serde(default)]
    pub checkbox_position: CheckboxPosition,
    /// Extra CSS classes for the checkbox, passed through to the browser
    /// layer.
    #[serde(default)]
    pub checkbox_extra_classes: Option<String>,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_ics_filename() -> String {
    DEFAULT_ICS_FILENAME.to_string()
}

impl BlockConfig {
    #[must_use]
    pub fn new<S: Into<String>>(block_id: S, selectors: SelectorConfig) -> Self {
        Self {
            block_id: block_id.into(),
            selectors,
            timezone: default_timezone(),
            local_storage_key: String::new(),
            ics_filename: default_ics_filename(),
            checkbox_position: CheckboxPosition::default(),
            checkbox_extra_classes: None,
        }
    }

    /// The configured storage key, or one derived from the block id.
    #[must_use]
    pub fn storage_key(&self) -> String {
        if !self.local_storage_key.is_empty() {
            return self.local_storage_key.clone();
        }

        let block_id: String = self
            .block_id
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '_' => c,
                _ => '_',
            })
            .collect();

        format!("{STORAGE_KEY_PREFIX}{block_id}")
    }

    /// The configured zone resolved against the tz database, if known.
    #[must_use]
    pub fn tz(&self) -> Option<Tz> {
        Tz::from_str(&self.timezone).ok()
    }
}

/// Compiled search context, keeping its source for diagnostics.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub source: String,
    pub selector: Selector,
}

/// Selectors compiled once; optional ones are `None` when not configured.
#[derive(Debug, Clone)]
pub struct Selectors {
    pub search_context: Option<SearchContext>,
    pub event_container: Selector,
    pub title: Selector,
    pub start_time: Selector,
    pub end_time: Selector,
    pub date: Option<Selector>,
    pub location: Option<Selector>,
    pub description: Option<Selector>,
    pub link: Option<Selector>,
}

impl Selectors {
    pub fn compile(config: &SelectorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            search_context: optional("searchContext", config.search_context.as_deref())?.map(
                |selector| SearchContext {
                    source: config.search_context.as_deref().unwrap_or_default().trim().to_string(),
                    selector,
                },
            ),
            event_container: required("eventContainer", &config.event_container)?,
            title: required("title", &config.title)?,
            start_time: required("startTime", &config.start_time)?,
            end_time: required("endTime", &config.end_time)?,
            date: optional("date", config.date.as_deref())?,
            location: optional("location", config.location.as_deref())?,
            description: optional("description", config.description.as_deref())?,
            link: optional("link", config.link.as_deref())?,
        })
    }
}

/// A [`BlockConfig`] that passed validation, with its selectors compiled.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    config: BlockConfig,
    selectors: Selectors,
}

impl ValidatedConfig {
    pub fn new(config: BlockConfig) -> Result<Self, ConfigError> {
        let selectors = Selectors::compile(&config.selectors)?;

        if !config.local_storage_key.is_empty()
            && !STORAGE_KEY_PATTERN.is_match(&config.local_storage_key)
        {
            return Err(ConfigError::InvalidStorageKey(config.local_storage_key));
        }

        if !ICS_FILENAME_PATTERN.is_match(&config.ics_filename) {
            return Err(ConfigError::InvalidIcsFilename(config.ics_filename));
        }

        Ok(Self { config, selectors })
    }

    #[must_use]
    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    #[must_use]
    pub fn selectors(&self) -> &Selectors {
        &self.selectors
    }
}

impl TryFrom<BlockConfig> for ValidatedConfig {
    type Error = ConfigError;

    fn try_from(config: BlockConfig) -> Result<Self, Self::Error> {
        Self::new(config)
    }
}

fn required(field: &'static str, selector: &str) -> Result<Selector, ConfigError> {
    optional(field, Some(selector))?.ok_or(ConfigError::MissingSelector(field))
}

fn optional(field: &'static str, selector: Option<&str>) -> Result<Option<Selector>, ConfigError> {
    let Some(selector) = selector.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    Selector::parse(selector)
        .map(Some)
        .map_err(|_| ConfigError::InvalidSelector {
            field,
            selector: selector.to_string(),
        })
}
