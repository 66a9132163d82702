//! The user's chosen events and where that choice is kept between visits.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::structs::Event;

/// Set of selected event ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(BTreeSet<String>);

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn insert<S: Into<String>>(&mut self, id: S) -> bool {
        self.0.insert(id.into())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.0.remove(id)
    }

    /// Flips the membership of `id`, returning whether it is now selected.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.0.remove(id) {
            false
        } else {
            self.0.insert(id.to_string());
            true
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Selection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// The selected events, in the order they appear on the page.
#[must_use]
pub fn filter_selected(events: &[Event], selection: &Selection) -> Vec<Event> {
    events
        .iter()
        .filter(|event| selection.contains(&event.id))
        .cloned()
        .collect()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not access selection file: {0}")]
    Io(#[from] io::Error),
    #[error("selection file is not a JSON array of ids: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("selection store lock is poisoned")]
    Poisoned,
}

/// Keeps selections keyed by a block's storage key.
///
/// Implementors report failures through [`StoreError`]; callers go through
/// [`SelectionStore::load`], [`SelectionStore::save`] and
/// [`SelectionStore::update`], which never fail.
pub trait SelectionStore: Send + Sync {
    fn try_load(&self, key: &str) -> Result<Option<Selection>, StoreError>;

    fn try_save(&self, key: &str, selection: &Selection) -> Result<(), StoreError>;

    /// Applies `change` to the stored selection and stores the result.
    ///
    /// No other load, save or update of the same store interleaves with it.
    fn try_update(
        &self,
        key: &str,
        change: &mut dyn FnMut(&mut Selection),
    ) -> Result<Selection, StoreError>;

    /// The stored selection, or an empty one if nothing usable is stored.
    fn load(&self, key: &str) -> Selection {
        match self.try_load(key) {
            Ok(selection) => selection.unwrap_or_default(),
            Err(err) => {
                warn!("Could not load selections for {key}: {err}");
                Selection::default()
            }
        }
    }

    /// Returns whether the selection was written.
    fn save(&self, key: &str, selection: &Selection) -> bool {
        match self.try_save(key, selection) {
            Ok(()) => true,
            Err(err) => {
                warn!("Could not save selections for {key}: {err}");
                false
            }
        }
    }

    /// The updated selection, or `None` if nothing was written.
    fn update(&self, key: &str, change: &mut dyn FnMut(&mut Selection)) -> Option<Selection> {
        match self.try_update(key, change) {
            Ok(selection) => Some(selection),
            Err(err) => {
                warn!("Could not update selections for {key}: {err}");
                None
            }
        }
    }
}

/// One `<key>.json` file per storage key, holding a JSON array of ids.
///
/// Files are replaced atomically, so a reader never sees a partial write.
#[derive(Debug)]
pub struct FileSelectionStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileSelectionStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read(&self, key: &str) -> Result<Option<Selection>, StoreError> {
        let raw = match fs::read_to_string(self.path(key)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if raw.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write(&self, key: &str, selection: &Selection) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;

        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut file, selection)?;
        file.flush()?;
        file.persist(self.path(key)).map_err(|err| err.error)?;
        Ok(())
    }
}

impl SelectionStore for FileSelectionStore {
    fn try_load(&self, key: &str) -> Result<Option<Selection>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.read(key)
    }

    fn try_save(&self, key: &str, selection: &Selection) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.write(key, selection)
    }

    fn try_update(
        &self,
        key: &str,
        change: &mut dyn FnMut(&mut Selection),
    ) -> Result<Selection, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;

        let mut selection = self.read(key)?.unwrap_or_default();
        change(&mut selection);
        self.write(key, &selection)?;
        Ok(selection)
    }
}

#[derive(Debug, Default)]
pub struct MemorySelectionStore {
    inner: RwLock<HashMap<String, Selection>>,
}

impl MemorySelectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn try_load(&self, key: &str) -> Result<Option<Selection>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.get(key).cloned())
    }

    fn try_save(&self, key: &str, selection: &Selection) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.insert(key.to_string(), selection.clone());
        Ok(())
    }

    fn try_update(
        &self,
        key: &str,
        change: &mut dyn FnMut(&mut Selection),
    ) -> Result<Selection, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let selection = inner.entry(key.to_string()).or_default();
        change(selection);
        Ok(selection.clone())
    }
}
