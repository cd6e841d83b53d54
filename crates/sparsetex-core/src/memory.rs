//! Committed memory accounting
//!
//! Sparse textures only consume physical memory for committed pages. These
//! types count those pages and compare the total against a budget.

use serde::{Deserialize, Serialize};

/// Committed memory budget
///
/// The budget is advisory: crossing it is logged, it never blocks a commit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitBudget {
    /// Maximum committed bytes
    pub max_bytes: u64,
    /// Warning threshold (fraction of max)
    pub warning_threshold: f32,
}

impl Default for CommitBudget {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024, // 256 MB default
            warning_threshold: 0.8,
        }
    }
}

/// Where the committed total sits relative to the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BudgetStatus {
    Within,
    Warning,
    Exceeded,
}

impl CommitBudget {
    /// Classify a committed byte count
    pub fn status(&self, committed_bytes: u64) -> BudgetStatus {
        if committed_bytes > self.max_bytes {
            BudgetStatus::Exceeded
        } else if committed_bytes as f64 >= self.max_bytes as f64 * self.warning_threshold as f64 {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Within
        }
    }

    /// Committed bytes as a percentage of the budget
    pub fn usage_percent(&self, committed_bytes: u64) -> f32 {
        if self.max_bytes == 0 {
            return 100.0;
        }
        committed_bytes as f32 / self.max_bytes as f32 * 100.0
    }
}

/// Page commitment statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Pages currently committed
    pub committed_pages: u64,
    /// Bytes currently committed
    pub committed_bytes: u64,
    /// Peak committed bytes
    pub peak_bytes: u64,
    /// Number of commit operations
    pub commit_count: u64,
    /// Number of decommit operations
    pub decommit_count: u64,
}

impl CommitStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commitment of `pages` pages totalling `bytes`
    pub fn record_commit(&mut self, pages: u64, bytes: u64) {
        self.committed_pages += pages;
        self.committed_bytes += bytes;
        self.commit_count += 1;
        self.peak_bytes = self.peak_bytes.max(self.committed_bytes);
    }

    /// Record a decommitment of `pages` pages totalling `bytes`
    pub fn record_decommit(&mut self, pages: u64, bytes: u64) {
        self.committed_pages = self.committed_pages.saturating_sub(pages);
        self.committed_bytes = self.committed_bytes.saturating_sub(bytes);
        self.decommit_count += 1;
    }

    /// Reset statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
