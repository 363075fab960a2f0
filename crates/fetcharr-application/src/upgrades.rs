// SPDX-License-Identifier: GPL-3.0-or-later
use chrono::{DateTime, Duration, Utc};
use fetcharr_domain::{ItemState, MediaItem};
use tracing::info;

use crate::selector::ScoredCandidate;

/// Content source name for manually assigned magnets; those items are never
/// auto-upgraded.
pub const MAGNET_ASSIGNER_SOURCE: &str = "magnet_assigner";

#[derive(Debug, Clone, Copy)]
pub struct UpgradePolicy {
    pub window_days: i64,
    /// Minimum relative score improvement before a promotion happens.
    pub percentage_threshold: f64,
}

impl UpgradePolicy {
    pub fn new(window_days: i64, percentage_threshold: f64) -> Self {
        Self {
            window_days,
            percentage_threshold,
        }
    }

    /// The window is inclusive at its boundary: an item collected exactly
    /// `window_days` ago is still eligible, one second later it is not.
    pub fn within_window(&self, original_collected_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now <= original_collected_at + Duration::days(self.window_days)
    }

    pub fn eligible(&self, item: &MediaItem, now: DateTime<Utc>) -> bool {
        if item.state != ItemState::Collected {
            return false;
        }
        if item.content_source.eq_ignore_ascii_case(MAGNET_ASSIGNER_SOURCE) {
            return false;
        }
        if item.no_early_release {
            return false;
        }
        match item.original_collected_at.or(item.collected_at) {
            Some(collected) => self.within_window(collected, now),
            None => false,
        }
    }

    /// Whether a rescored candidate beats the item's current score by more
    /// than the threshold. Items holding no score accept any positive one.
    pub fn should_upgrade(&self, current_score: Option<i32>, candidate_score: i32) -> bool {
        match current_score {
            Some(current) if current > 0 => {
                let improvement = (candidate_score - current) as f64 / current as f64;
                improvement > self.percentage_threshold
            }
            _ => candidate_score > 0,
        }
    }
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self::new(7, 0.10)
    }
}

/// Cleanup left behind after a promotion commits. Every action is
/// idempotent; failures are logged and never revert the upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    DeleteFile(String),
    RemoveTorrent(String),
}

#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub candidate: ScoredCandidate,
    pub previous_file: Option<String>,
    pub previous_torrent_id: Option<String>,
}

impl UpgradePlan {
    pub fn cleanup_actions(&self) -> Vec<CleanupAction> {
        let mut actions = Vec::new();
        if let Some(file) = &self.previous_file {
            actions.push(CleanupAction::DeleteFile(file.clone()));
        }
        if let Some(torrent_id) = &self.previous_torrent_id {
            actions.push(CleanupAction::RemoveTorrent(torrent_id.clone()));
        }
        actions
    }
}

/// Record what the item is being upgraded away from and hand back the plan.
/// The caller is responsible for the Collected -> Upgrading transition.
pub fn begin_upgrade(item: &mut MediaItem, candidate: ScoredCandidate) -> UpgradePlan {
    let plan = UpgradePlan {
        previous_file: item.filled_by_file.clone(),
        previous_torrent_id: item.filled_by_torrent_id.clone(),
        candidate,
    };

    item.upgrading_from = item.filled_by_file.clone();
    item.upgrading_from_version = Some(item.version.clone());
    item.upgrading_from_torrent_id = item.filled_by_torrent_id.clone();

    info!(
        target: "upgrades",
        item_id = %item.id,
        title = %item.title,
        score = plan.candidate.score,
        "promoting item to upgrading"
    );
    plan
}

/// Finalize a verified upgrade: the new fulfillment is already written by
/// the Checking pass, this marks the row as upgraded while preserving the
/// original collection time that anchors the window.
pub fn complete_upgrade(item: &mut MediaItem, new_score: i32, now: DateTime<Utc>) {
    item.upgraded = true;
    item.current_score = Some(new_score);
    item.collected_at = Some(now);
    if item.original_collected_at.is_none() {
        item.original_collected_at = item.collected_at;
    }
}

/// A failed upgrade restores the previous fulfillment and drops the
/// upgrading markers.
pub fn abort_upgrade(item: &mut MediaItem, plan: &UpgradePlan) {
    item.filled_by_file = plan.previous_file.clone();
    item.filled_by_torrent_id = plan.previous_torrent_id.clone();
    item.upgrading_from = None;
    item.upgrading_from_version = None;
    item.upgrading_from_torrent_id = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release_name::parse_title;
    use crate::scrapers::ScrapedRelease;
    use fetcharr_domain::Version;

    fn candidate(title: &str, score: i32) -> ScoredCandidate {
        ScoredCandidate {
            release: ScrapedRelease {
                title: title.to_string(),
                size_bytes: 4 << 30,
                magnet: None,
                url: None,
                seeders: None,
                indexer_id: "test".to_string(),
            },
            parsed: parse_title(title),
            score,
        }
    }

    fn collected_item() -> MediaItem {
        let mut item = MediaItem::new_movie("Inception", Version::new("1080p"));
        item.state = ItemState::Collected;
        item.content_source = "trakt".to_string();
        item.filled_by_file = Some("Inception.2010.720p.mkv".to_string());
        item.filled_by_torrent_id = Some("RD100".to_string());
        item.current_score = Some(70);
        item.collected_at = Some(Utc::now());
        item.original_collected_at = item.collected_at;
        item
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let policy = UpgradePolicy::default();
        let collected = Utc::now();
        let boundary = collected + Duration::days(7);

        assert!(policy.within_window(collected, boundary));
        assert!(!policy.within_window(collected, boundary + Duration::seconds(1)));
    }

    #[test]
    fn threshold_is_relative_improvement() {
        let policy = UpgradePolicy::default();

        // 70 -> 82 is a 17% improvement.
        assert!(policy.should_upgrade(Some(70), 82));
        // 70 -> 75 is only 7%.
        assert!(!policy.should_upgrade(Some(70), 75));
        // Equal or worse never upgrades.
        assert!(!policy.should_upgrade(Some(70), 70));
        assert!(!policy.should_upgrade(Some(70), 40));
        // Unscored items take any positive candidate.
        assert!(policy.should_upgrade(None, 1));
        assert!(!policy.should_upgrade(None, 0));
    }

    #[test]
    fn manually_assigned_items_are_skipped() {
        let policy = UpgradePolicy::default();
        let mut item = collected_item();
        assert!(policy.eligible(&item, Utc::now()));

        item.content_source = "Magnet_Assigner".to_string();
        assert!(!policy.eligible(&item, Utc::now()));
    }

    #[test]
    fn no_early_release_items_are_skipped() {
        let policy = UpgradePolicy::default();
        let mut item = collected_item();
        assert!(policy.eligible(&item, Utc::now()));

        item.no_early_release = true;
        assert!(!policy.eligible(&item, Utc::now()));
    }

    #[test]
    fn begin_records_previous_fulfillment_and_cleanup() {
        let mut item = collected_item();
        let plan = begin_upgrade(&mut item, candidate("Inception.2010.1080p.BluRay.x264-NEW", 82));

        assert_eq!(item.upgrading_from.as_deref(), Some("Inception.2010.720p.mkv"));
        assert_eq!(item.upgrading_from_torrent_id.as_deref(), Some("RD100"));
        assert_eq!(
            plan.cleanup_actions(),
            vec![
                CleanupAction::DeleteFile("Inception.2010.720p.mkv".to_string()),
                CleanupAction::RemoveTorrent("RD100".to_string()),
            ]
        );
    }

    #[test]
    fn complete_marks_upgraded_and_keeps_original_collection_time() {
        let mut item = collected_item();
        let original = item.original_collected_at;
        begin_upgrade(&mut item, candidate("Inception.2010.1080p.BluRay.x264-NEW", 82));

        let now = Utc::now() + Duration::days(2);
        complete_upgrade(&mut item, 82, now);

        assert!(item.upgraded);
        assert_eq!(item.current_score, Some(82));
        assert_eq!(item.collected_at, Some(now));
        assert_eq!(item.original_collected_at, original);
    }

    #[test]
    fn abort_restores_previous_fulfillment() {
        let mut item = collected_item();
        let plan = begin_upgrade(&mut item, candidate("Inception.2010.1080p.BluRay.x264-NEW", 82));

        item.filled_by_file = Some("partial.mkv".to_string());
        abort_upgrade(&mut item, &plan);

        assert_eq!(item.filled_by_file.as_deref(), Some("Inception.2010.720p.mkv"));
        assert_eq!(item.filled_by_torrent_id.as_deref(), Some("RD100"));
        assert!(item.upgrading_from.is_none());
    }
}
