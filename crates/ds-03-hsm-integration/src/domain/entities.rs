//! Availability snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_types::ProviderTag;

/// Result of probing one registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: ProviderTag,
    /// The connectivity probe succeeded.
    pub available: bool,
    pub checked_at: DateTime<Utc>,
}
