use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatErrorCategory};

/// Aggregation mode applied to reactions on a message.
///
/// The backend aggregates each mode independently, so the same emoji can
/// carry different tallies under different modes. Unknown mode names are
/// rejected at the string boundary rather than silently coerced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    /// At most one reaction per client; a new emoji replaces the old one.
    Unique,
    /// At most one reaction per client per emoji.
    Distinct,
    /// Any number of reactions per client, with accumulating counts.
    Multiple,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 3] = [
        ReactionKind::Unique,
        ReactionKind::Distinct,
        ReactionKind::Multiple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Unique => "unique",
            ReactionKind::Distinct => "distinct",
            ReactionKind::Multiple => "multiple",
        }
    }
}

impl FromStr for ReactionKind {
    type Err = ChatError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "unique" => Ok(ReactionKind::Unique),
            "distinct" => Ok(ReactionKind::Distinct),
            "multiple" => Ok(ReactionKind::Multiple),
            other => Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_reaction_kind",
                format!("unknown reaction kind '{other}' (expected unique, distinct or multiple)"),
            )),
        }
    }
}

/// Count and contributing clients for a single emoji under one mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionTally {
    /// Total reaction count for this emoji.
    pub total: u64,
    /// Clients currently contributing to `total`.
    pub client_ids: BTreeSet<String>,
}

impl ReactionTally {
    pub fn new(total: u64, client_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            total,
            client_ids: client_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Aggregated reactions for one message, one emoji map per mode.
///
/// Summaries arrive from the backend as complete replacement snapshots.
/// A later summary always supersedes an earlier one for the same message;
/// there is no client-side merging of individual reaction events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionSummary {
    /// Tallies keyed by emoji for `ReactionKind::Unique`.
    pub unique: BTreeMap<String, ReactionTally>,
    /// Tallies keyed by emoji for `ReactionKind::Distinct`.
    pub distinct: BTreeMap<String, ReactionTally>,
    /// Tallies keyed by emoji for `ReactionKind::Multiple`.
    pub multiple: BTreeMap<String, ReactionTally>,
}

impl ReactionSummary {
    pub fn is_empty(&self) -> bool {
        self.unique.is_empty() && self.distinct.is_empty() && self.multiple.is_empty()
    }

    /// Tallies for one aggregation mode.
    pub fn tallies(&self, kind: ReactionKind) -> &BTreeMap<String, ReactionTally> {
        match kind {
            ReactionKind::Unique => &self.unique,
            ReactionKind::Distinct => &self.distinct,
            ReactionKind::Multiple => &self.multiple,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_kind() {
        for kind in ReactionKind::ALL {
            let parsed: ReactionKind = kind.as_str().parse().expect("known kind should parse");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn rejects_unknown_kind_with_stable_code() {
        let error = "thumbs".parse::<ReactionKind>().expect_err("unknown kind should fail");

        assert_eq!(error.code, "invalid_reaction_kind");
        assert_eq!(error.category, ChatErrorCategory::Config);
    }

    #[test]
    fn kind_names_serialize_lowercase() {
        let encoded = serde_json::to_string(&ReactionKind::Distinct).expect("kind should encode");

        assert_eq!(encoded, "\"distinct\"");
    }

    #[test]
    fn summary_reports_emptiness_across_all_modes() {
        let mut summary = ReactionSummary::default();
        assert!(summary.is_empty());

        summary
            .multiple
            .insert("🎉".to_owned(), ReactionTally::new(3, ["client:a"]));
        assert!(!summary.is_empty());
        assert_eq!(summary.tallies(ReactionKind::Multiple).len(), 1);
        assert!(summary.tallies(ReactionKind::Unique).is_empty());
    }

    #[test]
    fn equal_summaries_compare_equal_regardless_of_insertion_order() {
        let mut first = ReactionSummary::default();
        first
            .distinct
            .insert("👍".to_owned(), ReactionTally::new(2, ["client:a", "client:b"]));
        first
            .distinct
            .insert("❤️".to_owned(), ReactionTally::new(1, ["client:b"]));

        let mut second = ReactionSummary::default();
        second
            .distinct
            .insert("❤️".to_owned(), ReactionTally::new(1, ["client:b"]));
        second
            .distinct
            .insert("👍".to_owned(), ReactionTally::new(2, ["client:b", "client:a"]));

        assert_eq!(first, second);
    }
}
