use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::{Selectors, ValidatedConfig};
use crate::datetime::{Normalizer, UnparseableDate};
use crate::identity::make_id;
use crate::structs::{format_duration, Event, Timestamp};

/// Diagnostics collected during a scan. None of them stops the scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractWarning {
    #[error("search context not found with selector {0:?}, falling back to document")]
    SearchContextNotFound(String),
    #[error("container {index}: could not parse {field} {value:?}")]
    UnparseableDate {
        index: usize,
        field: &'static str,
        value: String,
    },
    #[error("container {index}: invalid link {href:?}: {reason}")]
    InvalidLink {
        index: usize,
        href: String,
        reason: String,
    },
}

/// Outcome of one pass over a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub events: Vec<Event>,
    /// Containers matched by the container selector, complete or not.
    pub containers_scanned: usize,
    pub warnings: Vec<ExtractWarning>,
}

#[derive(Debug, Default)]
struct Fields {
    summary: Option<String>,
    start: Option<Timestamp>,
    end: Option<Timestamp>,
    location: Option<String>,
    description: Option<String>,
    link: Option<String>,
}

impl Fields {
    fn into_event(self, index: usize) -> Option<Event> {
        let summary = self.summary?;
        let start_time = self.start?;
        let end_time = self.end?;

        Some(Event {
            id: make_id(&start_time, &summary, index),
            duration: format_duration(&start_time, &end_time),
            summary,
            start_time,
            end_time,
            location: self.location,
            description: self.description,
            link: self.link,
        })
    }
}

/// Applies a block's selectors to a parsed page.
#[derive(Debug, Clone, Copy)]
pub struct Extractor<'a> {
    selectors: &'a Selectors,
    normalizer: Normalizer,
    base_url: Option<&'a Url>,
}

impl<'a> Extractor<'a> {
    #[must_use]
    pub fn new(selectors: &'a Selectors, normalizer: Normalizer) -> Self {
        Self {
            selectors,
            normalizer,
            base_url: None,
        }
    }

    /// Relative `href`s are resolved against `base_url`.
    #[must_use]
    pub fn with_base_url(mut self, base_url: Option<&'a Url>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn extract(&self, html: &Html) -> Extraction {
        let mut extraction = Extraction::default();
        let containers = self.scan_containers(html, &mut extraction.warnings);
        extraction.containers_scanned = containers.len();

        for (index, container) in containers.into_iter().enumerate() {
            match self.read_fields(container, index, &mut extraction.warnings) {
                Ok(fields) => {
                    if let Some(event) = fields.into_event(index) {
                        extraction.events.push(event);
                    }
                }
                Err(err) => {
                    warn!("Error extracting event from container: {err}");
                    extraction.warnings.push(err);
                }
            }
        }

        debug!(
            containers = extraction.containers_scanned,
            events = extraction.events.len(),
            "Scanned page"
        );

        extraction
    }

    /// Containers in document order, below the search context if it resolves.
    pub fn containers<'h>(&self, html: &'h Html) -> Vec<ElementRef<'h>> {
        self.scan_containers(html, &mut Vec::new())
    }

    /// The id the event scraped from `container` carries, if it is complete.
    ///
    /// `index` is the container's position in [`Extractor::containers`].
    #[must_use]
    pub fn container_id(&self, container: ElementRef<'_>, index: usize) -> Option<String> {
        self.read_fields(container, index, &mut Vec::new())
            .ok()?
            .into_event(index)
            .map(|event| event.id)
    }

    fn scan_containers<'h>(
        &self,
        html: &'h Html,
        warnings: &mut Vec<ExtractWarning>,
    ) -> Vec<ElementRef<'h>> {
        let mut root = html.root_element();

        if let Some(context) = &self.selectors.search_context {
            match html.select(&context.selector).next() {
                Some(element) => root = element,
                None => {
                    warn!(
                        "Search context not found with selector: {}, falling back to document",
                        context.source
                    );
                    warnings.push(ExtractWarning::SearchContextNotFound(context.source.clone()));
                }
            }
        }

        root.select(&self.selectors.event_container).collect()
    }

    fn read_fields(
        &self,
        container: ElementRef<'_>,
        index: usize,
        warnings: &mut Vec<ExtractWarning>,
    ) -> Result<Fields, ExtractWarning> {
        let selectors = self.selectors;

        let summary = first(container, &selectors.title)
            .map(text)
            .filter(|summary| !summary.is_empty());

        let date = selectors
            .date
            .as_ref()
            .and_then(|selector| first(container, selector))
            .and_then(|element| non_empty(text(element)).or_else(|| attr(element, "data-date")));

        let start = first(container, &selectors.start_time)
            .and_then(|element| time_value(element, "data-start-time"))
            .and_then(|value| self.timestamp(&value, date.as_deref(), index, "start time", warnings));

        let end = first(container, &selectors.end_time)
            .and_then(|element| time_value(element, "data-end-time"))
            .and_then(|value| self.timestamp(&value, date.as_deref(), index, "end time", warnings));

        let location = selectors
            .location
            .as_ref()
            .and_then(|selector| first(container, selector))
            .and_then(|element| attr(element, "data-location").or_else(|| non_empty(text(element))));

        let description = selectors
            .description
            .as_ref()
            .and_then(|selector| first(container, selector))
            .and_then(|element| non_empty(text(element)));

        let link = match selectors
            .link
            .as_ref()
            .and_then(|selector| first(container, selector))
            .and_then(|element| attr(element, "href"))
        {
            Some(href) => Some(self.resolve_link(href, index)?),
            None => None,
        };

        Ok(Fields {
            summary,
            start,
            end,
            location,
            description,
            link,
        })
    }

    fn timestamp(
        &self,
        value: &str,
        date: Option<&str>,
        index: usize,
        field: &'static str,
        warnings: &mut Vec<ExtractWarning>,
    ) -> Option<Timestamp> {
        match self.normalizer.normalize(value, date) {
            Ok(normalized) => normalized.timestamp,
            Err(UnparseableDate { value }) => {
                warn!("Could not parse date/time: {value}");
                warnings.push(ExtractWarning::UnparseableDate {
                    index,
                    field,
                    value,
                });
                None
            }
        }
    }

    fn resolve_link(&self, href: String, index: usize) -> Result<String, ExtractWarning> {
        let Some(base_url) = self.base_url else {
            return Ok(href);
        };

        base_url
            .join(&href)
            .map(String::from)
            .map_err(|err| ExtractWarning::InvalidLink {
                index,
                href,
                reason: err.to_string(),
            })
    }
}

/// Scans `html` with the selectors and zone of `config`.
pub fn extract_events<S: AsRef<str>>(html: S, config: &ValidatedConfig) -> Extraction {
    let html = Html::parse_document(html.as_ref());
    let normalizer = Normalizer::new(config.config().tz().unwrap_or(chrono_tz::Tz::UTC));
    Extractor::new(config.selectors(), normalizer).extract(&html)
}

fn first<'h>(container: ElementRef<'h>, selector: &Selector) -> Option<ElementRef<'h>> {
    container.select(selector).next()
}

fn text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// `datetime` attribute, then the field's data attribute, then the text.
fn time_value(element: ElementRef<'_>, data_attr: &str) -> Option<String> {
    attr(element, "datetime")
        .or_else(|| attr(element, data_attr))
        .or_else(|| non_empty(text(element)))
}
