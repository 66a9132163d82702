mod blocks;
mod cache;
mod cli;

use std::{env, sync::Arc};

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use schedule_builder::{Event, FileSelectionStore, IcsDownload, Selection, SelectionStore};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use crate::blocks::{Block, Blocks};
use crate::cache::PageCache;

const DEFAULT_LOG_FILTER: &str = "schedule_proxy=info,schedule_builder=warn";

#[derive(Clone)]
struct AppState {
    blocks: Arc<Blocks>,
    pages: Arc<PageCache>,
    client: reqwest::Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let args = cli::parse(env::args().skip(1).collect());

    let store: Arc<dyn SelectionStore> = Arc::new(FileSelectionStore::new(&args.selections));
    let blocks = Blocks::load(&args.config, store)?;
    if blocks.is_empty() {
        warn!("No blocks configured in {}", args.config.display());
    } else {
        info!("Loaded {} blocks from {}", blocks.len(), args.config.display());
    }

    let state = AppState {
        blocks: Arc::new(blocks),
        pages: Arc::new(PageCache::new(cache::Config {
            enabled: args.enable_cache,
            ttl: args.cache_ttl,
        })),
        client: reqwest::Client::new(),
    };

    let listener = TcpListener::bind(args.address).await?;
    info!("Listening at http://{}", args.address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(handle_events))
        .route("/calendar", get(handle_calendar))
        .route("/selection", post(handle_selection))
        .fallback(|| async { Redirect::permanent(env!("CARGO_PKG_REPOSITORY")) })
        .with_state(state)
}

fn init_logging() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| anyhow::anyhow!("Failed to set up logging: {err}"))
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutting down");
}

enum ProxyError {
    UnknownBlock(String),
    ForeignUrl(String),
    Upstream(reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::UnknownBlock(id) => {
                (StatusCode::NOT_FOUND, format!("Unknown block `{id}`")).into_response()
            }
            Self::ForeignUrl(url) => (
                StatusCode::BAD_REQUEST,
                format!("Page URL `{url}` is not on this block's site"),
            )
                .into_response(),
            Self::Upstream(err) => {
                warn!("Failed to fetch page: {err}");
                (StatusCode::BAD_GATEWAY, "Failed to fetch page").into_response()
            }
        }
    }
}

#[derive(Deserialize)]
struct PageQuery {
    block: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ids: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventsResponse {
    events: Vec<Event>,
    containers_scanned: usize,
    warnings: Vec<String>,
}

async fn handle_events(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<EventsResponse>, ProxyError> {
    let (block, url) = state.resolve(&query)?;
    let html = state.fetch_page(url.clone()).await?;
    let extraction = block.schedule.scan(&html, Some(&url));

    Ok(Json(EventsResponse {
        events: extraction.events,
        containers_scanned: extraction.containers_scanned,
        warnings: extraction.warnings.iter().map(ToString::to_string).collect(),
    }))
}

async fn handle_calendar(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Response, ProxyError> {
    let (block, url) = state.resolve(&query)?;
    let html = state.fetch_page(url.clone()).await?;
    let block = &block.schedule;
    let extraction = block.scan(&html, Some(&url));

    let selection = match query.ids.as_deref() {
        Some(ids) => parse_ids(ids),
        None => block.selection(),
    };

    let Some(IcsDownload { filename, content }) =
        block.download_selection(&extraction, &selection, Utc::now())
    else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    Ok((
        [
            (header::CONTENT_TYPE, IcsDownload::CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        content,
    )
        .into_response())
}

#[derive(Deserialize)]
struct SelectionQuery {
    block: String,
    event: String,
}

async fn handle_selection(
    State(state): State<AppState>,
    Query(query): Query<SelectionQuery>,
) -> Result<Json<Selection>, ProxyError> {
    let block = state.block(&query.block)?;
    Ok(Json(block.schedule.toggle(&query.event)))
}

impl AppState {
    fn block(&self, id: &str) -> Result<&Block, ProxyError> {
        self.blocks
            .get(id)
            .ok_or_else(|| ProxyError::UnknownBlock(id.to_string()))
    }

    /// The block and the page to scan for it. Only pages on the origin of
    /// the block's configured page are fetched.
    fn resolve(&self, query: &PageQuery) -> Result<(&Block, Url), ProxyError> {
        let block = self.block(&query.block)?;
        let url = block
            .page(query.url.as_deref())
            .ok_or_else(|| ProxyError::ForeignUrl(query.url.clone().unwrap_or_default()))?;
        Ok((block, url))
    }

    async fn fetch_page(&self, url: Url) -> Result<Arc<String>, ProxyError> {
        if let Some(html) = self.pages.get(&url).await {
            return Ok(html);
        }

        let html = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(ProxyError::Upstream)?
            .text()
            .await
            .map_err(ProxyError::Upstream)?;

        info!("Fetched {url}");
        Ok(self.pages.insert(url, html).await)
    }
}

/// `a,b,,c` to the set `{a, b, c}`.
fn parse_ids(ids: &str) -> Selection {
    ids.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use schedule_builder::MemorySelectionStore;
    use tokio::time::Duration;
    use tower::ServiceExt;

    const BLOCKS: &str = r#"
        [blocks.program]
        pageUrl = "https://conf.example/program"
        timezone = "America/New_York"
        icsFilename = "devconf"

        [blocks.program.selectors]
        eventContainer = ".session"
        title = "h3"
        startTime = ".start"
        endTime = ".end"
    "#;

    const PAGE: &str = r#"
        <div class="session">
          <h3>Keynote</h3>
          <span class="start">2025-10-14T09:30:00</span>
          <span class="end">2025-10-14T10:30:00</span>
        </div>
        <div class="session">
          <h3>Lunch</h3>
          <span class="start">2025-10-14T12:00:00</span>
          <span class="end">2025-10-14T13:00:00</span>
        </div>
        <div class="session"><h3>Untimed</h3></div>
    "#;

    const KEYNOTE: &str = "2025-10-14-09:30:00-keynote";
    const LUNCH: &str = "2025-10-14-12:00:00-lunch-1";

    async fn app() -> Router {
        let blocks = Blocks::from_toml(BLOCKS, Arc::new(MemorySelectionStore::new())).unwrap();

        let pages = PageCache::new(cache::Config {
            enabled: true,
            ttl: Duration::from_secs(3600),
        });
        pages
            .insert(Url::parse("https://conf.example/program").unwrap(), PAGE.to_string())
            .await;

        let client = reqwest::Client::builder()
            .tls_built_in_root_certs(false)
            .build()
            .unwrap();

        router(AppState {
            blocks: Arc::new(blocks),
            pages: Arc::new(pages),
            client,
        })
    }

    async fn send(app: &Router, method: &str, uri: &str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_parse_ids() {
        let selection = parse_ids(" a ,b,,a,");
        assert_eq!(selection.iter().collect::<Vec<_>>(), ["a", "b"]);
        assert!(parse_ids("").is_empty());
    }

    #[tokio::test]
    async fn test_events_json() {
        let app = app().await;
        let response = send(&app, "GET", "/events?block=program").await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body(response).await).unwrap();
        assert_eq!(json["containersScanned"], 3);
        assert_eq!(json["warnings"], serde_json::json!([]));

        let events = json["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["id"], KEYNOTE);
        assert_eq!(events[0]["startTime"], "2025-10-14T09:30:00");
        assert_eq!(events[0]["startTimezoneKind"], "unknown");
        assert_eq!(events[0]["duration"], "PT1H");
        assert_eq!(events[1]["id"], LUNCH);
    }

    #[tokio::test]
    async fn test_calendar_follows_stored_selection() {
        let app = app().await;

        let response = send(&app, "GET", "/calendar?block=program").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let toggle = format!("/selection?block=program&event={KEYNOTE}");
        let response = send(&app, "POST", &toggle).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, format!(r#"["{KEYNOTE}"]"#));

        let response = send(&app, "GET", "/calendar?block=program").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/calendar; charset=utf-8"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            r#"attachment; filename="devconf.ics""#
        );

        let ics = body(response).await;
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.contains("SUMMARY:Keynote\r\n"));
        assert!(ics.contains("DTSTART;TZID=America/New_York:20251014T093000\r\n"));
        assert!(!ics.contains("Lunch"));

        let response = send(&app, "POST", &toggle).await;
        assert_eq!(body(response).await, "[]");
    }

    #[tokio::test]
    async fn test_calendar_with_explicit_ids() {
        let app = app().await;

        let uri = format!(
            "/calendar?block=program&url=https%3A%2F%2Fconf.example%2Fprogram&ids={LUNCH},unknown"
        );
        let response = send(&app, "GET", &uri).await;
        assert_eq!(response.status(), StatusCode::OK);

        let ics = body(response).await;
        assert!(ics.contains("SUMMARY:Lunch\r\n"));
        assert!(!ics.contains("Keynote"));
    }

    #[tokio::test]
    async fn test_unknown_block_is_not_found() {
        let app = app().await;

        for uri in ["/events?block=missing", "/calendar?block=missing"] {
            assert_eq!(send(&app, "GET", uri).await.status(), StatusCode::NOT_FOUND);
        }
        let response = send(&app, "POST", "/selection?block=missing&event=x").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pages_off_the_block_site_are_refused() {
        let app = app().await;

        for url in [
            "http%3A%2F%2F169.254.169.254%2Flatest%2Fmeta-data",
            "http%3A%2F%2Fconf.example%2Fprogram",
            "file%3A%2F%2F%2Fetc%2Fpasswd",
            "not%20a%20url",
        ] {
            let response = send(&app, "GET", &format!("/events?block=program&url={url}")).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{url}");
        }
    }
}
