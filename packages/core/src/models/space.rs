use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named top-level scope owning one root group document.
///
/// All ordering and query operations are scoped to a single space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: String,
    pub name: String,
    /// URL prefix for every document in the space
    pub route: String,
    /// Root group document id
    pub root_group: String,
    pub created_at: DateTime<Utc>,
}
