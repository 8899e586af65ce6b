use crate::{
    error::{Result, SineError},
    fetch::Fetch,
    registry::Registry,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const DEFAULT_MARKETPLACE_URL: &str = "https://sineorg.github.io/store/marketplace.json";
pub const PER_PAGE: usize = 6;

/// One candidate mod in the store listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<Vec<String>>,
    #[serde(rename = "notFork", default, skip_serializing_if = "Option::is_none")]
    pub not_fork: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ListingEntry {
    /// Whether the entry targets platform `os` on browser `fork`.
    pub fn supports(&self, os: &str, fork: &str) -> bool {
        let os_ok = self
            .os
            .as_ref()
            .map_or(true, |list| list.iter().any(|item| item.contains(os)));
        let fork_ok = self
            .fork
            .as_ref()
            .map_or(true, |list| list.iter().any(|item| item.contains(fork)));
        let not_fork_ok = self
            .not_fork
            .as_ref()
            .map_or(true, |list| !list.iter().any(|item| item.contains(fork)));
        os_ok && fork_ok && not_fork_ok
    }
}

pub type Listing = BTreeMap<String, ListingEntry>;

/// Downloads the listing and keeps entries usable on `os`/`fork`.
/// Entries that do not parse are dropped.
pub fn fetch_listing(fetch: &dyn Fetch, url: &str, os: &str, fork: &str) -> Result<Listing> {
    let raw = fetch
        .fetch_object(url)
        .ok_or_else(|| SineError::NotFound(url.to_string()))?;
    let total = raw.len();
    let listing: Listing = raw
        .into_iter()
        .filter_map(|(id, value)| match serde_json::from_value::<ListingEntry>(value) {
            Ok(entry) => Some((id, entry)),
            Err(err) => {
                debug!(id = %id, %err, "skipping malformed listing entry");
                None
            }
        })
        .filter(|(_, entry)| entry.supports(os, fork))
        .collect();
    info!(url, total, kept = listing.len(), "marketplace listing loaded");
    Ok(listing)
}

/// Listing entries not yet installed.
pub fn available(listing: &Listing, registry: &Registry) -> Vec<(String, ListingEntry)> {
    listing
        .iter()
        .filter(|(id, _)| !registry.contains(id))
        .map(|(id, entry)| (id.clone(), entry.clone()))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub index: usize,
    pub total_pages: usize,
}

/// Slice `items` into pages of `per_page`; an out-of-range index is clamped
/// to the last page.
pub fn page<T: Clone>(items: &[T], index: usize, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let total_pages = items.len().div_ceil(per_page);
    let index = index.min(total_pages.saturating_sub(1));
    let start = index * per_page;
    let end = (start + per_page).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        index,
        total_pages,
    }
}
