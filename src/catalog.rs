// Scripted action catalog
//
// Actions live in a paged motion file: fixed 512-byte pages, each starting
// with a 64-byte header. Page 0 is reserved. A page whose step count is
// zero holds no motion and is left out of the catalog.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::{debug, info};

/// Size of one page in the motion file
pub const PAGE_SIZE: usize = 512;

/// Maximum number of pages a motion file can hold
pub const MAX_PAGES: usize = 256;

const NAME_LEN: usize = 14;
const STEP_COUNT_OFFSET: usize = 20;

/// Identifier of a scripted action (a motion file page number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionIndex(pub u32);

impl fmt::Display for ActionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for ActionIndex {
    fn from(page: u32) -> Self {
        Self(page)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read motion file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Motion file size {size} is not a multiple of the 512-byte page")]
    Truncated { size: usize },

    #[error("Motion file holds {pages} pages, at most 256 are supported")]
    TooManyPages { pages: usize },
}

/// Read-only set of actions available to the controller
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    actions: BTreeMap<ActionIndex, String>,
}

impl ActionCatalog {
    /// Build a catalog of unnamed pages
    pub fn with_pages(pages: RangeInclusive<u32>) -> Self {
        let actions = pages
            .map(|page| (ActionIndex(page), String::new()))
            .collect();
        Self { actions }
    }

    /// Load and parse a motion file from disk
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        info!("Loading action catalog from {}", path.display());
        let bytes = std::fs::read(path)?;
        let catalog = Self::from_motion_file(&bytes)?;
        info!("Loaded {} actions", catalog.len());
        Ok(catalog)
    }

    /// Parse the contents of a motion file
    pub fn from_motion_file(bytes: &[u8]) -> Result<Self, CatalogError> {
        if bytes.len() % PAGE_SIZE != 0 {
            return Err(CatalogError::Truncated { size: bytes.len() });
        }
        let pages = bytes.len() / PAGE_SIZE;
        if pages > MAX_PAGES {
            return Err(CatalogError::TooManyPages { pages });
        }

        let mut actions = BTreeMap::new();
        for (page, data) in bytes.chunks_exact(PAGE_SIZE).enumerate().skip(1) {
            if data[STEP_COUNT_OFFSET] == 0 {
                continue;
            }
            let name = page_name(&data[..NAME_LEN]);
            debug!("Page {}: '{}' ({} steps)", page, name, data[STEP_COUNT_OFFSET]);
            actions.insert(ActionIndex(page as u32), name);
        }

        Ok(Self { actions })
    }

    pub fn contains(&self, index: ActionIndex) -> bool {
        self.actions.contains_key(&index)
    }

    /// Page name, if the action exists (empty for unnamed pages)
    pub fn name(&self, index: ActionIndex) -> Option<&str> {
        self.actions.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Decode a NUL-padded page name
fn page_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}
