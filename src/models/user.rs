use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub tier: UserTier,
    pub free_pack_uses: i64,
    pub paid_pack_uses: i64,
    pub adaptive_pack_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Tier transitions only ever move free -> paid (payment) or to
/// admin-exempt (owner action); never back down automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum UserTier {
    Free,
    Paid,
    AdminExempt,
}

impl Default for UserTier {
    fn default() -> Self {
        Self::Free
    }
}

impl UserTier {
    /// Paid and admin-exempt users share the paid entitlements.
    pub fn is_paid(self) -> bool {
        matches!(self, Self::Paid | Self::AdminExempt)
    }
}
