use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use schedule_builder::{BlockConfig, ScheduleBlock, SelectionStore};
use serde::Deserialize;
use tracing::info;
use url::Url;

#[derive(Deserialize)]
struct BlocksFile {
    #[serde(default)]
    blocks: BTreeMap<String, BlockEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockEntry {
    page_url: String,
    #[serde(flatten)]
    config: BlockConfig,
}

/// A configured block and the listing page it scans.
#[derive(Debug)]
pub struct Block {
    pub schedule: ScheduleBlock,
    pub page_url: Url,
}

impl Block {
    /// The page to scan: `requested` if it shares the configured page's
    /// origin, the configured page if nothing is requested.
    pub fn page(&self, requested: Option<&str>) -> Option<Url> {
        let Some(requested) = requested else {
            return Some(self.page_url.clone());
        };

        let url = Url::parse(requested).ok()?;
        (url.origin() == self.page_url.origin()).then_some(url)
    }
}

/// Configured blocks by id.
#[derive(Debug, Default)]
pub struct Blocks(HashMap<String, Block>);

impl Blocks {
    pub fn load(path: &Path, store: Arc<dyn SelectionStore>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read block config {}", path.display()))?;

        Self::from_toml(&raw, store)
            .with_context(|| format!("Invalid block config {}", path.display()))
    }

    pub fn from_toml(raw: &str, store: Arc<dyn SelectionStore>) -> Result<Self> {
        let file: BlocksFile = toml::from_str(raw)?;

        let mut blocks = HashMap::with_capacity(file.blocks.len());
        for (id, BlockEntry { page_url, mut config }) in file.blocks {
            if config.block_id.is_empty() {
                config.block_id = id.clone();
            }

            let page_url = Url::parse(&page_url)
                .with_context(|| format!("Block `{id}`: invalid pageUrl {page_url:?}"))?;
            if !matches!(page_url.scheme(), "http" | "https") {
                bail!("Block `{id}`: pageUrl must be http or https, got {page_url}");
            }

            let schedule = ScheduleBlock::new(config, Arc::clone(&store))
                .with_context(|| format!("Block `{id}`"))?;

            info!(block = %id, page = %page_url, storage_key = %schedule.storage_key(), "Loaded block");
            blocks.insert(id, Block { schedule, page_url });
        }

        Ok(Self(blocks))
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
