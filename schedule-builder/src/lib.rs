mod block;
mod config;
mod datetime;
mod extract;
mod ics;
mod identity;
mod selection;
mod structs;
mod timezone;

pub use block::{IcsDownload, ScheduleBlock};
pub use config::{
    BlockConfig, CheckboxPosition, ConfigError, SearchContext, SelectorConfig, Selectors,
    ValidatedConfig, DEFAULT_ICS_FILENAME, DEFAULT_TIMEZONE,
};
pub use datetime::{Normalized, Normalizer, UnparseableDate};
pub use extract::{extract_events, ExtractWarning, Extraction, Extractor};
pub use identity::make_id;
pub use self::ics::{encode, encode_at, escape_text, CALENDAR_NAME, PRODUCT_ID};
pub use selection::{
    filter_selected, FileSelectionStore, MemorySelectionStore, Selection, SelectionStore,
    StoreError,
};
pub use structs::{format_duration, Event, InvalidTimestamp, Timestamp, TimezoneKind};
pub use timezone::{is_utc, vtimezone};
