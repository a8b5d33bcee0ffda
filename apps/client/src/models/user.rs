use serde::{Deserialize, Serialize};

/// Cached summary of the signed-in user, refreshed after each generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub credits: Option<i64>,
}
