//! Scene collection over a paged catalog.

use crate::config_storage::CatalogConfig;
use chrono::NaiveDate;
use log::{debug, info, warn};
use shared::indices::OPTICAL_COLLECTIONS;
use shared::{Bbox, CatalogError, Scene, SceneCatalog, SceneQuery, SortOrder};
use std::collections::HashSet;

/// Whether scene-level cloud cover filtering applies to `collection`.
pub fn is_optical(collection: &str) -> bool {
    OPTICAL_COLLECTIONS.contains(&collection)
}

/// Every scene of `collections` over `bbox` within the inclusive date range,
/// oldest first.
///
/// Pages are requested in ascending date order until a page comes back short
/// or empty, a request fails, or `config.max_pages` pages have been read.
/// Whatever was gathered before a failure is kept. Scenes repeated across
/// pages are returned once.
pub fn collect_scenes<C: SceneCatalog + ?Sized>(
    catalog: &C,
    collections: &[&str],
    bbox: &Bbox,
    date_range: (NaiveDate, NaiveDate),
    config: &CatalogConfig,
) -> Vec<Scene> {
    let mut base = SceneQuery {
        collections: collections.iter().map(|c| c.to_string()).collect(),
        ..SceneQuery::new(String::new(), *bbox)
    }
    .with_date_range(date_range.0, date_range.1)
    .with_limit(config.page_size)
    .with_sort(SortOrder::Ascending);
    if collections.iter().any(|c| is_optical(c)) {
        base = base.with_max_cloud_cover(config.max_cloud_cover);
    }

    let mut scenes = Vec::new();
    let mut seen = HashSet::new();
    let mut page = 0;
    loop {
        if page >= config.max_pages {
            warn!("Hit page limit ({} pages)", config.max_pages);
            break;
        }

        let items = match catalog.search(&base.clone().with_page(page)) {
            Ok(items) => items,
            Err(e) => {
                warn!("Catalog search failed on page {}: {}", page + 1, e);
                break;
            }
        };
        debug!("Page {} returned {} scenes", page + 1, items.len());

        let last_page = items.len() < config.page_size;
        for scene in items {
            if seen.insert(scene.id.clone()) {
                scenes.push(scene);
            }
        }
        if last_page {
            break;
        }
        page += 1;
    }

    scenes.sort_by_key(|s| s.acquired);
    info!(
        "Found {} scenes from {} to {}",
        scenes.len(),
        date_range.0,
        date_range.1
    );
    scenes
}

/// The `lookback` most recent scenes of `collection`, newest first.
pub fn latest_scenes<C: SceneCatalog + ?Sized>(
    catalog: &C,
    collection: &str,
    bbox: &Bbox,
    lookback: usize,
) -> Result<Vec<Scene>, CatalogError> {
    let query = SceneQuery::new(collection, *bbox)
        .with_limit(lookback.max(1))
        .with_sort(SortOrder::Descending);
    catalog.search(&query)
}
