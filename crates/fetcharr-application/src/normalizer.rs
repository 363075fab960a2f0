// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;

use chrono::NaiveDate;
use fetcharr_domain::{MediaItem, MediaType, Version};
use tracing::debug;

use crate::content_sources::WantedItem;

/// Batch normalization settings for one content source.
#[derive(Debug, Clone)]
pub struct NormalizerOptions {
    pub source_name: String,
    /// Drop wanted entries that are not of this media type.
    pub media_type_filter: Option<MediaType>,
    /// When false, movies with a future release date are deferred to a
    /// later poll instead of being inserted now.
    pub ingest_future_movies: bool,
    /// Items from this source wait for the real release date and are
    /// excluded from upgrade sweeps.
    pub no_early_release: bool,
}

/// Expand wanted entries into one `MediaItem` per version profile,
/// deduplicated by identity+version within the batch. Store-side dedup
/// against existing rows happens in the upsert.
pub fn normalize(
    options: &NormalizerOptions,
    wanted: &[WantedItem],
    versions: &[String],
    today: NaiveDate,
) -> Vec<MediaItem> {
    let mut seen = HashSet::new();
    let mut items = Vec::new();

    for entry in wanted {
        if let Some(filter) = options.media_type_filter {
            if entry.media_type != filter {
                continue;
            }
        }
        if entry.media_type == MediaType::Movie
            && !options.ingest_future_movies
            && entry.release_date.map(|d| d > today).unwrap_or(false)
        {
            debug!(target: "normalizer", title = %entry.title, "deferred future movie");
            continue;
        }

        for version in versions {
            let mut item = match entry.media_type {
                MediaType::Movie => {
                    MediaItem::new_movie(entry.title.clone(), Version::new(version))
                }
                MediaType::Episode => MediaItem::new_episode(
                    entry.title.clone(),
                    entry.season.unwrap_or(1),
                    entry.episode.unwrap_or(1),
                    Version::new(version),
                ),
            };
            item.imdb_id = entry.imdb_id.clone();
            item.tmdb_id = entry.tmdb_id;
            item.year = entry.year;
            item.release_date = entry.release_date;
            item.genres = entry.genres.clone();
            item.anime = entry
                .genres
                .iter()
                .any(|g| g.eq_ignore_ascii_case("anime"));
            item.no_early_release = options.no_early_release;
            item.content_source = options.source_name.clone();
            item.content_source_detail = entry.content_source_detail.clone();
            item.requested_season = entry.requested_season;

            let key = (item.identity(), item.version.stripped().to_string());
            if seen.insert(key) {
                items.push(item);
            }
        }
    }

    items
}
