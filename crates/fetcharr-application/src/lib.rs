// SPDX-License-Identifier: GPL-3.0-or-later
pub mod breaker;
pub mod content_sources;
pub mod debrid;
pub mod events;
pub mod library;
pub mod metadata;
pub mod normalizer;
pub mod not_wanted;
pub mod pipeline;
pub mod queues;
pub mod rate_limit;
pub mod release_name;
pub mod scrapers;
pub mod selector;
pub mod similarity;
pub mod transitions;
pub mod upgrades;

pub use pipeline::Pipeline;
pub use queues::QueueSet;
pub use selector::{SelectionContext, SelectionOutcome, Selector};
