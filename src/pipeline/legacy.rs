//! Fixed legacy phase sequence.

use std::fmt;
use std::str::FromStr;

/// Phases of the legacy pipeline, in advance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyPhase {
    Idle,
    PmPhase,
    ArchPhase,
    BaPhase,
    DevPhase,
    QaPhase,
    CommitPhase,
    Complete,
}

impl LegacyPhase {
    pub const ALL: [LegacyPhase; 8] = [
        LegacyPhase::Idle,
        LegacyPhase::PmPhase,
        LegacyPhase::ArchPhase,
        LegacyPhase::BaPhase,
        LegacyPhase::DevPhase,
        LegacyPhase::QaPhase,
        LegacyPhase::CommitPhase,
        LegacyPhase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegacyPhase::Idle => "idle",
            LegacyPhase::PmPhase => "pm_phase",
            LegacyPhase::ArchPhase => "arch_phase",
            LegacyPhase::BaPhase => "ba_phase",
            LegacyPhase::DevPhase => "dev_phase",
            LegacyPhase::QaPhase => "qa_phase",
            LegacyPhase::CommitPhase => "commit_phase",
            LegacyPhase::Complete => "complete",
        }
    }

    /// Successor in the table; `None` for `Complete`.
    pub fn next(&self) -> Option<LegacyPhase> {
        match self {
            LegacyPhase::Idle => Some(LegacyPhase::PmPhase),
            LegacyPhase::PmPhase => Some(LegacyPhase::ArchPhase),
            LegacyPhase::ArchPhase => Some(LegacyPhase::BaPhase),
            LegacyPhase::BaPhase => Some(LegacyPhase::DevPhase),
            LegacyPhase::DevPhase => Some(LegacyPhase::QaPhase),
            LegacyPhase::QaPhase => Some(LegacyPhase::CommitPhase),
            LegacyPhase::CommitPhase => Some(LegacyPhase::Complete),
            LegacyPhase::Complete => None,
        }
    }
}

impl fmt::Display for LegacyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LegacyPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LegacyPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown legacy phase '{}'", s))
    }
}
