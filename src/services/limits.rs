//! Pure limit policy: tier/usage in, allowed-or-denied out.
//!
//! Flow entry points consult this for early feedback and the pack store
//! re-evaluates it at commit time, so a decision can never go stale between
//! a prompt and the actual mutation.

use crate::config::LimitsConfig;
use crate::error::AppError;
use crate::models::{Pack, PackKind, User};

/// Capabilities gated to the configured owner account in this phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Adaptive,
    Duplicate,
    AdminGrant,
    Broadcast,
    OperatorSettings,
}

/// Config-supplied authorization predicate. Flow code never compares ids
/// inline; it asks this.
#[derive(Debug, Clone)]
pub struct Authorizer {
    owner_id: i64,
}

impl Authorizer {
    pub fn new(owner_id: i64) -> Self {
        Self { owner_id }
    }

    pub fn is_authorized(&self, user_id: i64, _capability: Capability) -> bool {
        user_id == self.owner_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    QuotaExceeded,
    CapacityExceeded,
    NameLengthInvalid,
    NotEntitled,
    OwnerOnly,
}

impl From<Denial> for AppError {
    fn from(d: Denial) -> Self {
        match d {
            Denial::QuotaExceeded => AppError::QuotaExceeded,
            Denial::CapacityExceeded => AppError::CapacityExceeded,
            Denial::NameLengthInvalid => AppError::NameLengthInvalid,
            Denial::NotEntitled => AppError::NotEntitled,
            Denial::OwnerOnly => AppError::OwnerOnly,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitPolicy {
    limits: LimitsConfig,
    authorizer: Authorizer,
}

impl LimitPolicy {
    pub fn new(limits: LimitsConfig, authorizer: Authorizer) -> Self {
        Self { limits, authorizer }
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Item capacity for a pack of the given kind and payment scope.
    pub fn capacity(&self, kind: PackKind, paid: bool) -> i64 {
        if paid {
            return self.limits.paid_max_items;
        }
        match kind {
            PackKind::Emoji | PackKind::AdaptiveEmoji => self.limits.free_max_emojis,
            PackKind::Sticker => self.limits.free_max_stickers,
        }
    }

    /// Whether the user may start (and commit) a pack creation.
    pub fn check_create(&self, user: &User, paid_pack: bool) -> Result<(), Denial> {
        if paid_pack {
            if !user.tier.is_paid() {
                return Err(Denial::NotEntitled);
            }
            return Ok(());
        }
        if user.tier.is_paid() {
            return Ok(());
        }
        if user.free_pack_uses <= 0 {
            return Err(Denial::QuotaExceeded);
        }
        Ok(())
    }

    /// Whether one more item fits in the pack.
    pub fn check_add(&self, pack: &Pack) -> Result<(), Denial> {
        if pack.item_count >= self.capacity(pack.kind, pack.is_paid_pack) {
            return Err(Denial::CapacityExceeded);
        }
        Ok(())
    }

    /// Duplicate pre-check: the whole source must fit the user's target
    /// capacity before anything is charged or mutated.
    pub fn check_duplicate(
        &self,
        user: &User,
        kind: PackKind,
        source_count: i64,
    ) -> Result<(), Denial> {
        if !self.authorizer.is_authorized(user.user_id, Capability::Duplicate) {
            return Err(Denial::OwnerOnly);
        }
        if source_count > self.capacity(kind, user.tier.is_paid()) {
            return Err(Denial::CapacityExceeded);
        }
        Ok(())
    }

    pub fn check_adaptive(&self, user: &User) -> Result<(), Denial> {
        if !self.authorizer.is_authorized(user.user_id, Capability::Adaptive) {
            return Err(Denial::OwnerOnly);
        }
        Ok(())
    }

    /// Name length bounds differ between the free and paid naming scopes.
    pub fn validate_name(&self, name: &str, paid: bool) -> Result<(), Denial> {
        let len = name.chars().count();
        let (min, max) = if paid {
            (self.limits.paid_name_min_len, self.limits.paid_name_max_len)
        } else {
            (self.limits.free_name_min_len, self.limits.free_name_max_len)
        };
        if len < min || len > max {
            return Err(Denial::NameLengthInvalid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::models::UserTier;

    fn limits() -> LimitsConfig {
        LimitsConfig {
            free_max_stickers: 30,
            free_max_emojis: 40,
            paid_max_items: 120,
            free_name_min_len: 4,
            free_name_max_len: 12,
            paid_name_min_len: 1,
            paid_name_max_len: 32,
            free_pack_allowance: 1,
            session_ttl: Duration::from_secs(3600),
        }
    }

    fn policy() -> LimitPolicy {
        LimitPolicy::new(limits(), Authorizer::new(1000))
    }

    fn user(id: i64, tier: UserTier, free_uses: i64) -> User {
        User {
            user_id: id,
            tier,
            free_pack_uses: free_uses,
            paid_pack_uses: 0,
            adaptive_pack_id: None,
            created_at: Utc::now(),
        }
    }

    fn pack(kind: PackKind, paid: bool, item_count: i64) -> Pack {
        Pack {
            pack_id: 1,
            owner_user_id: 1,
            name: "test_pack".into(),
            title: "Test".into(),
            kind,
            is_paid_pack: paid,
            external_link: "https://t.me/addemoji/test_pack".into(),
            item_count,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn free_user_with_quota_can_create() {
        assert_eq!(policy().check_create(&user(1, UserTier::Free, 1), false), Ok(()));
    }

    #[test]
    fn free_user_without_quota_is_denied() {
        assert_eq!(
            policy().check_create(&user(1, UserTier::Free, 0), false),
            Err(Denial::QuotaExceeded)
        );
    }

    #[test]
    fn free_user_cannot_create_paid_pack() {
        assert_eq!(
            policy().check_create(&user(1, UserTier::Free, 5), true),
            Err(Denial::NotEntitled)
        );
    }

    #[test]
    fn paid_user_ignores_free_quota() {
        assert_eq!(policy().check_create(&user(1, UserTier::Paid, 0), false), Ok(()));
        assert_eq!(policy().check_create(&user(1, UserTier::Paid, 0), true), Ok(()));
    }

    #[test]
    fn admin_exempt_counts_as_paid() {
        assert_eq!(
            policy().check_create(&user(1, UserTier::AdminExempt, 0), true),
            Ok(())
        );
    }

    #[test]
    fn capacity_depends_on_kind_and_scope() {
        let p = policy();
        assert_eq!(p.capacity(PackKind::Emoji, false), 40);
        assert_eq!(p.capacity(PackKind::Sticker, false), 30);
        assert_eq!(p.capacity(PackKind::Sticker, true), 120);
        assert_eq!(p.capacity(PackKind::AdaptiveEmoji, false), 40);
    }

    #[test]
    fn add_is_denied_at_capacity() {
        let p = policy();
        assert_eq!(p.check_add(&pack(PackKind::Emoji, false, 39)), Ok(()));
        assert_eq!(
            p.check_add(&pack(PackKind::Emoji, false, 40)),
            Err(Denial::CapacityExceeded)
        );
        assert_eq!(p.check_add(&pack(PackKind::Sticker, true, 119)), Ok(()));
    }

    #[test]
    fn duplicate_capacity_checked_against_target_tier() {
        let p = policy();
        // Owner account on the free tier: 50 items cannot fit a 40-cap pack.
        assert_eq!(
            p.check_duplicate(&user(1000, UserTier::Free, 1), PackKind::Emoji, 50),
            Err(Denial::CapacityExceeded)
        );
        assert_eq!(
            p.check_duplicate(&user(1000, UserTier::Paid, 0), PackKind::Emoji, 50),
            Ok(())
        );
    }

    #[test]
    fn duplicate_and_adaptive_are_owner_gated() {
        let p = policy();
        assert_eq!(
            p.check_duplicate(&user(2, UserTier::Paid, 0), PackKind::Emoji, 5),
            Err(Denial::OwnerOnly)
        );
        assert_eq!(
            p.check_adaptive(&user(2, UserTier::Paid, 0)),
            Err(Denial::OwnerOnly)
        );
        assert_eq!(p.check_adaptive(&user(1000, UserTier::Free, 0)), Ok(()));
    }

    #[test]
    fn name_length_bounds_per_scope() {
        let p = policy();
        assert_eq!(p.validate_name("abcd", false), Ok(()));
        assert_eq!(p.validate_name("abc", false), Err(Denial::NameLengthInvalid));
        assert_eq!(
            p.validate_name("thirteenchars", false),
            Err(Denial::NameLengthInvalid)
        );
        assert_eq!(p.validate_name("x", true), Ok(()));
        assert_eq!(
            p.validate_name(&"x".repeat(33), true),
            Err(Denial::NameLengthInvalid)
        );
    }
}
