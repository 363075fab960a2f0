// SPDX-License-Identifier: GPL-3.0-or-later
//! Release selection: filters scraped releases against an item's version
//! profile and ranks the survivors.
//!
//! Selection is deterministic. Candidates are evaluated in input order and
//! the final sort is stable, so equal score and size preserve scraper order.

use std::collections::HashMap;

use chrono::NaiveDate;
use fetcharr_domain::{AnimeFilterMode, Resolution, ResolutionWanted, VersionProfile};
use regex::RegexBuilder;
use tracing::trace;

use crate::release_name::{parse_title, ParsedTitle};
use crate::scrapers::ScrapedRelease;
use crate::similarity::{char_overlap, normalized_similarity};

/// Years of disagreement tolerated between the known year and a parsed one.
const YEAR_TOLERANCE: i32 = 1;
/// Deducted when an anime title passes the fuzzy threshold but has weak
/// character overlap with the wanted title.
const ANIME_SANITY_PENALTY: i32 = 5;
/// Added to forced releases so they outrank everything without removing
/// the rest of the list.
const FORCE_PRIORITY_BOOST: i32 = 10_000;
/// MB per runtime minute beyond which an unmarked release is treated as a
/// disguised pack.
const PACK_DENSITY_MB_PER_MIN: f64 = 300.0;

/// Everything the selector needs to know about the item being filled,
/// derived from the media item and (for episodes) its show record.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub title: String,
    pub aliases: Vec<String>,
    pub year: Option<i32>,
    pub anime: bool,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    /// Show-wide episode number for anime absolute numbering.
    pub absolute_episode: Option<u32>,
    /// Episodes in the requested season, used to normalize pack sizes.
    pub season_episode_count: Option<u32>,
    /// Pack mode: the item wants a whole season, not a single episode.
    pub multi: bool,
    pub runtime_minutes: Option<u32>,
    pub physical_release_date: Option<NaiveDate>,
    pub today: NaiveDate,
    /// Terms whose matches are re-ranked to the top of the accepted list.
    pub force_priority: Vec<String>,
}

impl SelectionContext {
    pub fn for_movie(title: &str, year: Option<i32>, today: NaiveDate) -> Self {
        Self {
            title: title.to_string(),
            aliases: Vec::new(),
            year,
            anime: false,
            season: None,
            episode: None,
            absolute_episode: None,
            season_episode_count: None,
            multi: false,
            runtime_minutes: None,
            physical_release_date: None,
            today,
            force_priority: Vec::new(),
        }
    }

    pub fn for_episode(
        title: &str,
        season: i32,
        episode: i32,
        anime: bool,
        today: NaiveDate,
    ) -> Self {
        Self {
            title: title.to_string(),
            aliases: Vec::new(),
            year: None,
            anime,
            season: Some(season),
            episode: Some(episode),
            absolute_episode: None,
            season_episode_count: None,
            multi: false,
            runtime_minutes: None,
            physical_release_date: None,
            today,
            force_priority: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub release: ScrapedRelease,
    pub parsed: ParsedTitle,
    pub score: i32,
}

/// Result of a selection run. `pre_size_filtered` holds candidates that
/// passed every stage except the size/bitrate bounds; callers surface them
/// for manual overrides.
#[derive(Debug, Default)]
pub struct SelectionOutcome {
    pub accepted: Vec<ScoredCandidate>,
    pub pre_size_filtered: Vec<ScoredCandidate>,
}

impl SelectionOutcome {
    pub fn best(&self) -> Option<&ScoredCandidate> {
        self.accepted.first()
    }
}

/// Stateful wrapper so repeated selection runs over overlapping scrape
/// results parse each release name once.
#[derive(Default)]
pub struct Selector {
    cache: HashMap<String, ParsedTitle>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_cached(&mut self, raw: &str) -> ParsedTitle {
        self.cache
            .entry(raw.to_string())
            .or_insert_with(|| parse_title(raw))
            .clone()
    }

    pub fn select(
        &mut self,
        ctx: &SelectionContext,
        profile: &VersionProfile,
        candidates: &[ScrapedRelease],
    ) -> SelectionOutcome {
        let mut outcome = SelectionOutcome::default();

        if profile.require_physical_release {
            let released = ctx
                .physical_release_date
                .map(|d| d <= ctx.today)
                .unwrap_or(false);
            if !released {
                trace!(target: "selector", item = %ctx.title, "no physical release yet");
                return outcome;
            }
        }

        match profile.anime_filter_mode {
            AnimeFilterMode::Only if !ctx.anime => return outcome,
            AnimeFilterMode::Exclude if ctx.anime => return outcome,
            _ => {}
        }

        let threshold = if ctx.anime {
            profile.similarity_threshold_anime
        } else {
            profile.similarity_threshold
        };

        for release in candidates {
            let parsed = self.parse_cached(&release.title);

            if parsed.trash {
                trace!(target: "selector", release = %release.title, "rejected: trash source");
                continue;
            }

            let (similarity, overlap) = self.identity_match(ctx, &parsed);
            if similarity < threshold {
                trace!(target: "selector", release = %release.title, similarity, "rejected: title mismatch");
                continue;
            }
            // Fuzzy matching over-accepts short anime titles; a candidate
            // sharing under half the wanted title's characters is noise.
            if overlap < 0.5 {
                trace!(target: "selector", release = %release.title, overlap, "rejected: character overlap");
                continue;
            }
            let sanity_warning = ctx.anime && overlap < 0.9;

            if let (Some(known), Some(found)) = (ctx.year, parsed.year) {
                if (known - found).abs() > YEAR_TOLERANCE {
                    trace!(target: "selector", release = %release.title, found, "rejected: year mismatch");
                    continue;
                }
            }

            if !resolution_acceptable(profile, parsed.resolution) {
                continue;
            }
            if (parsed.hdr || parsed.dolby_vision) && !profile.enable_hdr {
                continue;
            }

            if let Some(code) = &profile.language_code {
                // Untagged releases are assumed to be in the original
                // language and pass.
                if !parsed.languages.is_empty() {
                    let code = code.to_lowercase();
                    if !parsed
                        .languages
                        .iter()
                        .any(|l| *l == code || l == "multi")
                    {
                        continue;
                    }
                }
            }

            if !self.episode_stage_passes(ctx, release, &parsed) {
                continue;
            }

            if !profile.filter_in.is_empty()
                && !profile
                    .filter_in
                    .iter()
                    .any(|t| term_matches(t, release, &parsed))
            {
                continue;
            }
            if profile
                .filter_out
                .iter()
                .any(|t| term_matches(t, release, &parsed))
            {
                continue;
            }

            let score = self.score(ctx, profile, release, &parsed, sanity_warning);
            let candidate = ScoredCandidate {
                release: release.clone(),
                parsed: parsed.clone(),
                score,
            };

            if self.within_size_bounds(ctx, profile, release, &parsed) {
                outcome.accepted.push(candidate);
            } else {
                outcome.pre_size_filtered.push(candidate);
            }
        }

        rank(&mut outcome.accepted);
        rank(&mut outcome.pre_size_filtered);
        outcome
    }

    /// Best similarity and overlap across the wanted title and its aliases.
    fn identity_match(&self, ctx: &SelectionContext, parsed: &ParsedTitle) -> (f64, f64) {
        let mut best_similarity = 0.0_f64;
        let mut best_overlap = 0.0_f64;
        for wanted in std::iter::once(&ctx.title).chain(ctx.aliases.iter()) {
            let similarity = normalized_similarity(wanted, &parsed.title);
            let overlap = char_overlap(wanted, &parsed.title);
            if similarity > best_similarity {
                best_similarity = similarity;
                best_overlap = overlap;
            } else if similarity == best_similarity && overlap > best_overlap {
                best_overlap = overlap;
            }
        }
        (best_similarity, best_overlap)
    }

    fn episode_stage_passes(
        &self,
        ctx: &SelectionContext,
        release: &ScrapedRelease,
        parsed: &ParsedTitle,
    ) -> bool {
        let Some(episode) = ctx.episode else {
            // Movies never want season or episode markers.
            if parsed.has_season_marker() || parsed.is_pack() {
                trace!(target: "selector", release = %release.title, "rejected: tv markers on movie");
                return false;
            }
            return true;
        };
        let season = ctx.season.unwrap_or(1);

        if parsed.is_pack() {
            if !ctx.multi {
                trace!(target: "selector", release = %release.title, "rejected: pack in single mode");
                return false;
            }
            let covers = parsed.complete_marker || parsed.seasons.contains(&season);
            if !covers {
                trace!(target: "selector", release = %release.title, season, "rejected: pack misses season");
            }
            return covers;
        }

        if !episode_matches(ctx, parsed, season, episode) {
            trace!(target: "selector", release = %release.title, season, episode, "rejected: episode mismatch");
            return false;
        }

        // A single-episode-looking release whose size implies several
        // episodes worth of video is a mislabeled pack.
        if !ctx.multi {
            if let Some(runtime) = ctx.runtime_minutes.filter(|r| *r > 0) {
                let mb = release.size_bytes as f64 / (1024.0 * 1024.0);
                if mb / runtime as f64 > PACK_DENSITY_MB_PER_MIN {
                    trace!(target: "selector", release = %release.title, "rejected: pack-sized single episode");
                    return false;
                }
            }
        }
        true
    }

    fn score(
        &self,
        ctx: &SelectionContext,
        profile: &VersionProfile,
        release: &ScrapedRelease,
        parsed: &ParsedTitle,
        sanity_warning: bool,
    ) -> i32 {
        let mut score = 0;

        if parsed.resolution == profile.max_resolution {
            score += profile.resolution_weight;
        }
        if profile.enable_hdr && (parsed.hdr || parsed.dolby_vision) {
            score += profile.hdr_weight;
        }
        if ctx.year.is_some() && ctx.year == parsed.year {
            score += profile.year_match_weight;
        }
        for (term, weight) in &profile.preferred_filter_in {
            if term_matches(term, release, parsed) {
                score += weight;
            }
        }
        for (term, weight) in &profile.preferred_filter_out {
            if term_matches(term, release, parsed) {
                score -= weight;
            }
        }
        if sanity_warning {
            score -= ANIME_SANITY_PENALTY;
        }
        if ctx
            .force_priority
            .iter()
            .any(|t| term_matches(t, release, parsed))
        {
            score += FORCE_PRIORITY_BOOST;
        }

        score
    }

    fn within_size_bounds(
        &self,
        ctx: &SelectionContext,
        profile: &VersionProfile,
        release: &ScrapedRelease,
        parsed: &ParsedTitle,
    ) -> bool {
        // Packs are judged per episode.
        let divisor = if parsed.is_pack() {
            ctx.season_episode_count
                .map(|c| c as f64)
                .or_else(|| {
                    let n = parsed.episodes.len();
                    (n > 1).then_some(n as f64)
                })
                .unwrap_or(1.0)
                .max(1.0)
        } else {
            1.0
        };

        let size_gb = release.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0) / divisor;
        // Bounds are inclusive on both ends.
        if size_gb < profile.min_size_gb || size_gb > profile.max_size_gb {
            trace!(target: "selector", release = %release.title, size_gb, "size outside bounds");
            return false;
        }

        if let Some(runtime) = ctx.runtime_minutes.filter(|r| *r > 0) {
            let mbps = (release.size_bytes as f64 / divisor) * 8.0
                / (runtime as f64 * 60.0)
                / 1_000_000.0;
            if mbps < profile.min_bitrate_mbps || mbps > profile.max_bitrate_mbps {
                trace!(target: "selector", release = %release.title, mbps, "bitrate outside bounds");
                return false;
            }
        }
        true
    }
}

fn resolution_acceptable(profile: &VersionProfile, candidate: Resolution) -> bool {
    if candidate == Resolution::Unknown {
        // An untagged release cannot exceed a ceiling but cannot prove a
        // floor or an exact match.
        return profile.resolution_wanted == ResolutionWanted::AtMost;
    }
    profile
        .resolution_wanted
        .matches(candidate, profile.max_resolution)
}

/// Episode identity for a non-pack release. Anime accepts three encodings:
/// plain SxxEyy, a bare absolute number, and the absolute number inside the
/// episode slot of a season marker. Season 1 additionally accepts a bare
/// episode number, since numbering has not diverged yet.
fn episode_matches(ctx: &SelectionContext, parsed: &ParsedTitle, season: i32, episode: i32) -> bool {
    if parsed.seasons.contains(&season) && parsed.episodes.contains(&episode) {
        return true;
    }
    if !ctx.anime {
        return false;
    }
    if let Some(absolute) = ctx.absolute_episode {
        if parsed.seasons.contains(&season) && parsed.episodes.contains(&(absolute as i32)) {
            return true;
        }
        if !parsed.has_season_marker() && parsed.absolute_episode == Some(absolute) {
            return true;
        }
    }
    season == 1 && !parsed.has_season_marker() && parsed.absolute_episode == Some(episode as u32)
}

/// Term matching for filter lists. `/pattern/` terms are case-insensitive
/// regexes; anything else is a case-insensitive substring. Terms match the
/// raw release name or any parsed field, so `x265` hits the codec slot even
/// when the name writes it as `HEVC`. Invalid regexes never match.
fn term_matches(term: &str, release: &ScrapedRelease, parsed: &ParsedTitle) -> bool {
    let mut fields: Vec<&str> = vec![&release.title];
    if parsed.resolution != Resolution::Unknown {
        fields.push(parsed.resolution.as_str());
    }
    fields.extend(parsed.source.as_deref());
    fields.extend(parsed.codec.as_deref());
    fields.extend(parsed.audio.as_deref());
    fields.extend(parsed.group.as_deref());
    fields.extend(parsed.languages.iter().map(String::as_str));

    if term.len() > 2 && term.starts_with('/') && term.ends_with('/') {
        return RegexBuilder::new(&term[1..term.len() - 1])
            .case_insensitive(true)
            .build()
            .map(|re| fields.iter().any(|f| re.is_match(f)))
            .unwrap_or(false);
    }
    let term = term.to_lowercase();
    fields.iter().any(|f| f.to_lowercase().contains(&term))
}

/// Stable rank: score descending, then size ascending. Full ties keep
/// input order.
fn rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.release.size_bytes.cmp(&b.release.size_bytes))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn release(title: &str, size_bytes: u64) -> ScrapedRelease {
        ScrapedRelease {
            title: title.to_string(),
            size_bytes,
            magnet: None,
            url: None,
            seeders: None,
            indexer_id: "test".to_string(),
        }
    }

    fn profile() -> VersionProfile {
        VersionProfile {
            name: "default".to_string(),
            max_resolution: Resolution::R1080p,
            resolution_wanted: ResolutionWanted::AtMost,
            enable_hdr: false,
            hdr_weight: 0,
            resolution_weight: 15,
            filter_in: Vec::new(),
            filter_out: Vec::new(),
            preferred_filter_in: Vec::new(),
            preferred_filter_out: Vec::new(),
            min_size_gb: 0.0,
            max_size_gb: 200.0,
            min_bitrate_mbps: 0.0,
            max_bitrate_mbps: 1000.0,
            language_code: None,
            require_physical_release: false,
            similarity_threshold: 0.85,
            similarity_threshold_anime: 0.70,
            year_match_weight: 5,
            anime_filter_mode: AnimeFilterMode::Allow,
            fallback_version: None,
            wake_count: 6,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn ranks_by_resolution_then_size() {
        let ctx = SelectionContext::for_movie("Inception", Some(2010), today());
        let candidates = vec![
            release("Inception.2010.720p.BluRay.x264-A", 4 * GIB),
            release("Inception.2010.1080p.BluRay.x264-B", 10 * GIB),
            release("Inception.2010.1080p.WEB-DL.x265-C", 6 * GIB),
            release("Inception.2010.2160p.UHD.BluRay-D", 40 * GIB),
        ];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);

        let titles: Vec<&str> = outcome
            .accepted
            .iter()
            .map(|c| c.release.title.as_str())
            .collect();
        // 2160p exceeds the AtMost ceiling, both 1080p entries outrank the
        // 720p one, and the smaller 1080p wins the tie.
        assert_eq!(
            titles,
            vec![
                "Inception.2010.1080p.WEB-DL.x265-C",
                "Inception.2010.1080p.BluRay.x264-B",
                "Inception.2010.720p.BluRay.x264-A",
            ]
        );
    }

    #[test]
    fn rejects_dissimilar_titles_and_bad_years() {
        let ctx = SelectionContext::for_movie("Inception", Some(2010), today());
        let candidates = vec![
            release("Interstellar.2014.1080p.BluRay.x264-A", 8 * GIB),
            release("Inception.2008.1080p.BluRay.x264-B", 8 * GIB),
            release("Inception.2009.1080p.BluRay.x264-C", 8 * GIB),
        ];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);

        // The wrong title and the two-years-off release fall out; the
        // off-by-one year survives.
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Inception.2009.1080p.BluRay.x264-C"
        );
    }

    #[test]
    fn size_bounds_are_inclusive_and_feed_pre_size_filtered() {
        let mut profile = profile();
        profile.min_size_gb = 1.0;
        profile.max_size_gb = 10.0;
        let ctx = SelectionContext::for_movie("Inception", Some(2010), today());

        let candidates = vec![
            release("Inception.2010.1080p.BluRay.x264-EXACT", 10 * GIB),
            release("Inception.2010.1080p.REMUX.AVC-BIG", 11 * GIB),
            release("Inception.2010.1080p.WEBRip.x264-TINY", GIB / 2),
        ];

        let outcome = Selector::new().select(&ctx, &profile, &candidates);

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Inception.2010.1080p.BluRay.x264-EXACT"
        );
        assert_eq!(outcome.pre_size_filtered.len(), 2);
        // Size-filtered candidates still carry a usable score.
        assert!(outcome.pre_size_filtered.iter().all(|c| c.score > 0));
    }

    #[test]
    fn season_pack_only_in_multi_mode() {
        let mut ctx = SelectionContext::for_episode("Severance", 1, 3, false, today());
        let pack = release("Severance.S01.1080p.WEB-DL.x265-PACK", 30 * GIB);
        let single = release("Severance.S01E03.1080p.WEB-DL.x265-EP", 3 * GIB);
        let wrong_pack = release("Severance.S02.1080p.WEB-DL.x265-PACK", 30 * GIB);
        let candidates = vec![pack, single, wrong_pack];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Severance.S01E03.1080p.WEB-DL.x265-EP"
        );

        ctx.multi = true;
        ctx.season_episode_count = Some(9);
        let candidates = vec![
            release("Severance.S01.1080p.WEB-DL.x265-PACK", 30 * GIB),
            release("Severance.S02.1080p.WEB-DL.x265-PACK", 30 * GIB),
        ];
        let outcome = Selector::new().select(&ctx, &profile(), &candidates);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Severance.S01.1080p.WEB-DL.x265-PACK"
        );
    }

    #[test]
    fn anime_accepts_absolute_numbering() {
        // Episode 5 of season 2 of a show with a 12-episode first season.
        let mut ctx = SelectionContext::for_episode("Mob Psycho 100", 2, 5, true, today());
        ctx.absolute_episode = Some(17);

        let candidates = vec![
            release("Mob Psycho 100 - 17 [1080p]", 1 * GIB),
            release("Mob Psycho 100 S02E05 1080p WEB x264", 1 * GIB),
            release("Mob Psycho 100 S02E17 1080p WEB x264", 1 * GIB),
            release("Mob Psycho 100 - 05 [1080p]", 1 * GIB),
        ];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);
        let titles: Vec<&str> = outcome
            .accepted
            .iter()
            .map(|c| c.release.title.as_str())
            .collect();
        // The bare "- 05" is ambiguous past season 1 and falls out.
        assert_eq!(titles.len(), 3);
        assert!(!titles.contains(&"Mob Psycho 100 - 05 [1080p]"));
    }

    #[test]
    fn anime_season_one_accepts_bare_episode_numbers() {
        let ctx = SelectionContext::for_episode("Frieren", 1, 7, true, today());
        let candidates = vec![release("Frieren - 07 [1080p][HEVC]", 1 * GIB)];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn filter_out_supports_substrings_and_regex() {
        let mut profile = profile();
        profile.filter_out = vec!["x265".to_string(), "/web-?rip/".to_string()];
        let ctx = SelectionContext::for_movie("Inception", Some(2010), today());

        let candidates = vec![
            release("Inception.2010.1080p.BluRay.x265-A", 6 * GIB),
            release("Inception.2010.1080p.WEBRip.x264-B", 6 * GIB),
            release("Inception.2010.1080p.BluRay.x264-C", 6 * GIB),
        ];

        let outcome = Selector::new().select(&ctx, &profile, &candidates);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Inception.2010.1080p.BluRay.x264-C"
        );
    }

    #[test]
    fn terms_match_parsed_fields_as_well_as_raw_name() {
        // "4K" parses to the 2160p resolution slot, so the canonical term
        // hits even though the name never spells it out.
        let rel = release("Inception.2010.4K.UHD.BluRay.x264-GRP", 20 * GIB);
        let parsed = parse_title(&rel.title);
        assert!(term_matches("2160p", &rel, &parsed));
        // Anchored regexes can target an exact field value, which the raw
        // name would never satisfy.
        assert!(term_matches("/^x264$/", &rel, &parsed));
        assert!(term_matches("/^grp$/", &rel, &parsed));
        assert!(!term_matches("x265", &rel, &parsed));
    }

    #[test]
    fn force_priority_reranks_without_excluding() {
        let mut ctx = SelectionContext::for_movie("Inception", Some(2010), today());
        ctx.force_priority = vec!["720p".to_string()];

        let candidates = vec![
            release("Inception.2010.1080p.BluRay.x264-A", 8 * GIB),
            release("Inception.2010.720p.BluRay.x264-B", 4 * GIB),
        ];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Inception.2010.720p.BluRay.x264-B"
        );
    }

    #[test]
    fn hdr_gate_and_weight() {
        let ctx = SelectionContext::for_movie("Dune", Some(2021), today());
        let candidates = vec![
            release("Dune.2021.1080p.BluRay.HDR.x265-A", 8 * GIB),
            release("Dune.2021.1080p.BluRay.x264-B", 8 * GIB),
        ];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Dune.2021.1080p.BluRay.x264-B"
        );

        let mut hdr_profile = profile();
        hdr_profile.enable_hdr = true;
        hdr_profile.hdr_weight = 10;
        let outcome = Selector::new().select(&ctx, &hdr_profile, &candidates);
        assert_eq!(outcome.accepted.len(), 2);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Dune.2021.1080p.BluRay.HDR.x265-A"
        );
    }

    #[test]
    fn physical_release_gate() {
        let mut profile = profile();
        profile.require_physical_release = true;
        let mut ctx = SelectionContext::for_movie("Inception", Some(2010), today());
        let candidates = vec![release("Inception.2010.1080p.BluRay.x264-A", 8 * GIB)];

        let outcome = Selector::new().select(&ctx, &profile, &candidates);
        assert!(outcome.accepted.is_empty());

        ctx.physical_release_date = NaiveDate::from_ymd_opt(2024, 5, 1);
        let outcome = Selector::new().select(&ctx, &profile, &candidates);
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[test]
    fn movies_reject_tv_marked_releases() {
        let ctx = SelectionContext::for_movie("Fargo", Some(1996), today());
        let candidates = vec![
            release("Fargo.S01.1080p.BluRay.x264-TV", 20 * GIB),
            release("Fargo.1996.1080p.BluRay.x264-FILM", 8 * GIB),
        ];

        let outcome = Selector::new().select(&ctx, &profile(), &candidates);
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(
            outcome.accepted[0].release.title,
            "Fargo.1996.1080p.BluRay.x264-FILM"
        );
    }

    #[test]
    fn anime_filter_mode_gates_whole_runs() {
        let mut only = profile();
        only.anime_filter_mode = AnimeFilterMode::Only;
        let movie_ctx = SelectionContext::for_movie("Inception", Some(2010), today());
        let candidates = vec![release("Inception.2010.1080p.BluRay.x264-A", 8 * GIB)];
        assert!(Selector::new()
            .select(&movie_ctx, &only, &candidates)
            .accepted
            .is_empty());

        let mut exclude = profile();
        exclude.anime_filter_mode = AnimeFilterMode::Exclude;
        let anime_ctx = SelectionContext::for_episode("Frieren", 1, 7, true, today());
        let candidates = vec![release("Frieren - 07 [1080p][HEVC]", 1 * GIB)];
        assert!(Selector::new()
            .select(&anime_ctx, &exclude, &candidates)
            .accepted
            .is_empty());
    }
}
