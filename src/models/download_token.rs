use serde::{Deserialize, Serialize};

/// Single-use, time-limited download grant for a digital purchase.
///
/// Lifecycle: issued -> used, or issued -> expired. Both end states are terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadToken {
    pub token: String,
    pub purchase_id: String,
    pub session_id: String,
    pub product_key: String,
    pub object_key: String,
    pub expires_at: i64,
    pub used_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Issued,
    Used,
    Expired,
}

impl DownloadToken {
    /// Used takes precedence over expired so a consumed token keeps reporting "already used".
    pub fn state_at(&self, now: i64) -> TokenState {
        if self.used_at.is_some() {
            TokenState::Used
        } else if self.expires_at <= now {
            TokenState::Expired
        } else {
            TokenState::Issued
        }
    }
}
