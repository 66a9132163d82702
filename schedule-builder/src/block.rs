use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use scraper::Html;
use tracing::{info, warn};
use url::Url;

use crate::config::{BlockConfig, ConfigError, ValidatedConfig};
use crate::datetime::Normalizer;
use crate::extract::{Extraction, Extractor};
use crate::ics::encode_at;
use crate::selection::{filter_selected, Selection, SelectionStore};
use crate::structs::Event;

/// A calendar file ready to be offered for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcsDownload {
    pub filename: String,
    pub content: String,
}

impl IcsDownload {
    pub const CONTENT_TYPE: &'static str = "text/calendar; charset=utf-8";
}

/// One configured schedule builder block together with the store holding its
/// selection.
#[derive(Clone)]
pub struct ScheduleBlock {
    config: ValidatedConfig,
    normalizer: Normalizer,
    store: Arc<dyn SelectionStore>,
}

impl std::fmt::Debug for ScheduleBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleBlock")
            .field("block_id", &self.config.config().block_id)
            .field("storage_key", &self.storage_key())
            .finish_non_exhaustive()
    }
}

impl ScheduleBlock {
    pub fn new(config: BlockConfig, store: Arc<dyn SelectionStore>) -> Result<Self, ConfigError> {
        let config = ValidatedConfig::new(config)?;

        let local = config.config().tz().unwrap_or_else(|| {
            warn!(
                "Unknown timezone {:?} for block {}, reading page times as UTC",
                config.config().timezone,
                config.config().block_id
            );
            Tz::UTC
        });

        Ok(Self {
            config,
            normalizer: Normalizer::new(local),
            store,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BlockConfig {
        self.config.config()
    }

    #[must_use]
    pub fn storage_key(&self) -> String {
        self.config().storage_key()
    }

    #[must_use]
    pub fn extractor<'a>(&'a self, page_url: Option<&'a Url>) -> Extractor<'a> {
        Extractor::new(self.config.selectors(), self.normalizer).with_base_url(page_url)
    }

    /// Scans a listing page. Relative links resolve against `page_url`.
    pub fn scan(&self, html: &str, page_url: Option<&Url>) -> Extraction {
        let html = Html::parse_document(html);
        let extraction = self.extractor(page_url).extract(&html);

        if extraction.events.is_empty() {
            warn!(
                "No events found with selector: {} ({} containers matched)",
                self.config().selectors.event_container,
                extraction.containers_scanned
            );
        }

        extraction
    }

    #[must_use]
    pub fn selection(&self) -> Selection {
        self.store.load(&self.storage_key())
    }

    /// Flips `event_id` in the stored selection and returns what is stored
    /// afterwards. If the change cannot be written the stored selection is
    /// returned unchanged.
    pub fn toggle(&self, event_id: &str) -> Selection {
        let key = self.storage_key();
        let mut selected = false;

        let updated = self
            .store
            .update(&key, &mut |selection: &mut Selection| {
                selected = selection.toggle(event_id);
            });

        match updated {
            Some(selection) => {
                info!(block = %self.config().block_id, event_id, selected, "Toggled event");
                selection
            }
            None => {
                warn!(block = %self.config().block_id, event_id, "Toggle was not saved");
                self.selection()
            }
        }
    }

    /// The stored selection applied to `extraction`, in page order.
    #[must_use]
    pub fn selected_events(&self, extraction: &Extraction) -> Vec<Event> {
        filter_selected(&extraction.events, &self.selection())
    }

    /// The calendar for the stored selection, `None` if nothing is selected.
    #[must_use]
    pub fn download(&self, extraction: &Extraction) -> Option<IcsDownload> {
        self.download_selection(extraction, &self.selection(), Utc::now())
    }

    /// The calendar for an explicit selection.
    #[must_use]
    pub fn download_selection(
        &self,
        extraction: &Extraction,
        selection: &Selection,
        now: DateTime<Utc>,
    ) -> Option<IcsDownload> {
        let events = filter_selected(&extraction.events, selection);
        if events.is_empty() {
            return None;
        }

        let content = encode_at(&events, &self.config().timezone, now);
        if content.is_empty() {
            return None;
        }

        Some(IcsDownload {
            filename: format!("{}.ics", self.config().ics_filename),
            content,
        })
    }
}
