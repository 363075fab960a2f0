// SPDX-License-Identifier: GPL-3.0-or-later
use fetcharr_domain::ItemState;

/// Whether the scheduler may move an item between two states. Admin
/// actions (reset, blacklist) have their own table below; everything the
/// pipeline does goes through here first, then through the store's
/// conditional update.
pub fn flow_allowed(from: ItemState, to: ItemState) -> bool {
    use ItemState::*;
    matches!(
        (from, to),
        (Wanted, Scraping)
            | (Wanted, Unreleased)
            | (Unreleased, Wanted)
            | (Scraping, Adding)
            | (Scraping, Sleeping)
            | (Adding, Checking)
            | (Adding, PendingUncached)
            | (Adding, Scraping)
            | (Adding, Blacklisted)
            | (PendingUncached, Checking)
            | (PendingUncached, Scraping)
            | (Checking, Collected)
            | (Checking, Scraping)
            | (Sleeping, Wanted)
            | (Sleeping, Blacklisted)
            | (Collected, Upgrading)
            | (Upgrading, Collected)
    )
}

/// Admin surface transitions: reset anything to Wanted, blacklist anything,
/// and lift a blacklist back to Wanted.
pub fn admin_allowed(from: ItemState, to: ItemState) -> bool {
    if from == to {
        return false;
    }
    matches!(to, ItemState::Wanted | ItemState::Blacklisted)
}
