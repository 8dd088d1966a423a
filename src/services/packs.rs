//! Pack store: transactional CRUD over users, packs and items, plus the
//! two-phase commit against the platform pack API.
//!
//! Mutation protocol per pack: take the pack lock, re-check the limit
//! policy, call the platform, then commit the local transaction. Platform
//! failure leaves local state untouched; a local failure after platform
//! success is reported as inconsistent state and logged for reconciliation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::models::{AssetFormat, Pack, PackItem, PackKind, User, UserTier};
use crate::platform::types::{InputSticker, PlatformPack};
use crate::platform::PackPlatform;

use super::limits::LimitPolicy;

/// Collapse arbitrary input into a platform-safe slug.
pub fn normalize_pack_name(base: &str) -> String {
    let mut slug = String::with_capacity(base.len());
    let mut last_was_sep = false;
    for c in base.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    slug.trim_matches('_').to_string()
}

/// Accepts a t.me pack link or a bare slug; returns the slug.
pub fn parse_pack_link(link: &str) -> Option<String> {
    let link = link.trim();
    for marker in ["t.me/addstickers/", "t.me/addemoji/"] {
        if let Some(idx) = link.find(marker) {
            let slug = &link[idx + marker.len()..];
            let slug: String = slug
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !slug.is_empty() {
                return Some(slug);
            }
        }
    }
    if !link.is_empty()
        && link
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Some(link.to_string());
    }
    None
}

pub fn external_link(kind: PackKind, slug: &str) -> String {
    format!("https://t.me/{}/{}", kind.link_prefix(), slug)
}

fn input_sticker(content_ref: &str, format: AssetFormat, emoji: Option<&str>) -> InputSticker {
    InputSticker {
        sticker: content_ref.to_string(),
        format: format.as_str().to_string(),
        emoji_list: vec![emoji.unwrap_or("\u{1F600}").to_string()],
    }
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.message().contains("UNIQUE") {
            return AppError::DuplicateName;
        }
    }
    e.into()
}

/// New item handed to the store for insertion.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub content_ref: String,
    pub emoji: Option<String>,
    pub format: AssetFormat,
}

pub struct PackStore {
    db: SqlitePool,
    platform: Arc<dyn PackPlatform>,
    policy: LimitPolicy,
    free_pack_allowance: i64,
    /// Per-pack mutual exclusion held across both commit phases.
    pack_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    /// Serializes creations; pack ids do not exist yet at that point.
    create_lock: Mutex<()>,
}

impl PackStore {
    pub fn new(
        db: SqlitePool,
        platform: Arc<dyn PackPlatform>,
        policy: LimitPolicy,
        free_pack_allowance: i64,
    ) -> Self {
        Self {
            db,
            platform,
            policy,
            free_pack_allowance,
            pack_locks: Mutex::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    async fn pack_lock(&self, pack_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.pack_locks.lock().await;
        locks
            .entry(pack_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ---- Users ----

    pub async fn get_or_create_user(&self, user_id: i64) -> AppResult<User> {
        sqlx::query(
            "INSERT OR IGNORE INTO users (user_id, free_pack_uses, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(self.free_pack_allowance)
        .bind(Utc::now())
        .execute(&self.db)
        .await?;

        self.get_user(user_id).await
    }

    pub async fn get_user(&self, user_id: i64) -> AppResult<User> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        user.ok_or(AppError::UserNotFound)
    }

    /// Payment-driven upgrade; the only automatic tier transition.
    pub async fn upgrade_to_paid(&self, user_id: i64) -> AppResult<()> {
        self.get_or_create_user(user_id).await?;
        sqlx::query("UPDATE users SET tier = 'paid' WHERE user_id = ? AND tier = 'free'")
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Owner action: exempt a user from payments and top up their quota.
    pub async fn grant_admin_exempt(&self, user_id: i64, free_uses: i64) -> AppResult<()> {
        self.get_or_create_user(user_id).await?;
        sqlx::query("UPDATE users SET tier = 'admin-exempt', free_pack_uses = ? WHERE user_id = ?")
            .bind(free_uses)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn set_adaptive_pack(&self, user_id: i64, pack_id: i64) -> AppResult<()> {
        sqlx::query("UPDATE users SET adaptive_pack_id = ? WHERE user_id = ?")
            .bind(pack_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_user_ids(&self) -> AppResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT user_id FROM users ORDER BY user_id")
            .fetch_all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    // ---- Settings ----

    pub async fn get_setting(&self, key: &str) -> AppResult<Option<serde_json::Value>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.and_then(|(v,)| serde_json::from_str(&v).ok()))
    }

    pub async fn set_setting(&self, key: &str, value: &serde_json::Value) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    // ---- Packs ----

    pub async fn get_pack(&self, pack_id: i64) -> AppResult<Pack> {
        let pack: Option<Pack> = sqlx::query_as("SELECT * FROM packs WHERE pack_id = ?")
            .bind(pack_id)
            .fetch_optional(&self.db)
            .await?;
        pack.ok_or(AppError::PackNotFound)
    }

    pub async fn list_packs(&self, user_id: i64, kind: Option<PackKind>) -> AppResult<Vec<Pack>> {
        let packs: Vec<Pack> = if let Some(kind) = kind {
            sqlx::query_as(
                "SELECT * FROM packs WHERE owner_user_id = ? AND kind = ? ORDER BY pack_id DESC",
            )
            .bind(user_id)
            .bind(kind)
            .fetch_all(&self.db)
            .await?
        } else {
            sqlx::query_as("SELECT * FROM packs WHERE owner_user_id = ? ORDER BY pack_id DESC")
                .bind(user_id)
                .fetch_all(&self.db)
                .await?
        };
        Ok(packs)
    }

    pub async fn find_item(&self, pack_id: i64, content_ref: &str) -> AppResult<Option<PackItem>> {
        let item: Option<PackItem> =
            sqlx::query_as("SELECT * FROM items WHERE pack_id = ? AND content_ref = ?")
                .bind(pack_id)
                .bind(content_ref)
                .fetch_optional(&self.db)
                .await?;
        Ok(item)
    }

    /// Create a pack: platform set creation first, then the local rows. The
    /// limit policy and name uniqueness are re-checked here, under the
    /// creation lock, regardless of what the flow saw at entry.
    pub async fn create_pack(
        &self,
        user_id: i64,
        kind: PackKind,
        slug: &str,
        title: &str,
        paid: bool,
        first: NewItem,
    ) -> AppResult<Pack> {
        let _guard = self.create_lock.lock().await;

        let user = self.get_or_create_user(user_id).await?;
        // Adaptive packs are entitled by the apack purchase and the owner
        // gate upstream, not by tier or quota.
        if kind != PackKind::AdaptiveEmoji {
            self.policy.check_create(&user, paid)?;
        }

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT pack_id FROM packs WHERE name = ? AND is_paid_pack = ?")
                .bind(slug)
                .bind(paid)
                .fetch_optional(&self.db)
                .await?;
        if existing.is_some() {
            return Err(AppError::DuplicateName);
        }

        // Phase 1: the platform owns the namespace; create the set there.
        let sticker = input_sticker(&first.content_ref, first.format, first.emoji.as_deref());
        self.platform
            .create_pack(user_id, slug, title, kind.platform_type(), &sticker)
            .await?;

        // Phase 2: local rows, all-or-nothing.
        let link = external_link(kind, slug);
        let commit = async {
            let mut tx = self.db.begin().await?;

            let pack: Pack = sqlx::query_as(
                "INSERT INTO packs (owner_user_id, name, title, kind, is_paid_pack, external_link, item_count, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, 1, ?)
                 RETURNING *",
            )
            .bind(user_id)
            .bind(slug)
            .bind(title)
            .bind(kind)
            .bind(paid)
            .bind(&link)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_unique_violation)?;

            sqlx::query(
                "INSERT INTO items (pack_id, content_ref, emoji, kind, added_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(pack.pack_id)
            .bind(&first.content_ref)
            .bind(&first.emoji)
            .bind(kind)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

            if !paid && user.tier == UserTier::Free {
                sqlx::query(
                    "UPDATE users SET free_pack_uses = free_pack_uses - 1
                     WHERE user_id = ? AND free_pack_uses > 0",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            } else if paid {
                sqlx::query("UPDATE users SET paid_pack_uses = paid_pack_uses + 1 WHERE user_id = ?")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok::<Pack, AppError>(pack)
        };

        match commit.await {
            Ok(pack) => Ok(pack),
            Err(e) => {
                tracing::error!(
                    user_id,
                    slug,
                    error = %e,
                    "local commit failed after platform pack creation"
                );
                Err(AppError::InconsistentState(format!(
                    "pack '{}' created on platform but not recorded locally",
                    slug
                )))
            }
        }
    }

    /// Add one item. Capacity is re-checked under the pack lock so two
    /// interleaved adds cannot both squeeze past the limit.
    pub async fn add_item(&self, pack_id: i64, item: NewItem) -> AppResult<PackItem> {
        let lock = self.pack_lock(pack_id).await;
        let _guard = lock.lock().await;

        let pack = self.get_pack(pack_id).await?;
        self.policy.check_add(&pack)?;

        let sticker = input_sticker(&item.content_ref, item.format, item.emoji.as_deref());
        self.platform.add_item(&pack.name, &sticker).await?;

        let commit = async {
            let mut tx = self.db.begin().await?;

            let row: PackItem = sqlx::query_as(
                "INSERT INTO items (pack_id, content_ref, emoji, kind, added_at)
                 VALUES (?, ?, ?, ?, ?)
                 RETURNING *",
            )
            .bind(pack_id)
            .bind(&item.content_ref)
            .bind(&item.emoji)
            .bind(pack.kind)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("UPDATE packs SET item_count = item_count + 1 WHERE pack_id = ?")
                .bind(pack_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<PackItem, AppError>(row)
        };

        match commit.await {
            Ok(row) => Ok(row),
            Err(e) => {
                tracing::error!(pack_id, error = %e, "local commit failed after platform add");
                Err(AppError::InconsistentState(format!(
                    "item added to platform set '{}' but not recorded locally",
                    pack.name
                )))
            }
        }
    }

    /// Remove one item by content reference. A second removal of the same
    /// item reports `not_found`; it never crashes or double-decrements.
    pub async fn remove_item(&self, pack_id: i64, content_ref: &str) -> AppResult<()> {
        let lock = self.pack_lock(pack_id).await;
        let _guard = lock.lock().await;

        let pack = self.get_pack(pack_id).await?;
        let item = self
            .find_item(pack_id, content_ref)
            .await?
            .ok_or(AppError::ItemNotFound)?;

        self.platform.remove_item(content_ref).await?;

        let commit = async {
            let mut tx = self.db.begin().await?;

            let result = sqlx::query("DELETE FROM items WHERE item_id = ?")
                .bind(item.item_id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(AppError::ItemNotFound);
            }

            sqlx::query(
                "UPDATE packs SET item_count = item_count - 1 WHERE pack_id = ? AND item_count > 0",
            )
            .bind(pack_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        };

        match commit.await {
            Ok(()) => Ok(()),
            Err(AppError::ItemNotFound) => Err(AppError::ItemNotFound),
            Err(e) => {
                tracing::error!(pack_id, content_ref, error = %e, "local commit failed after platform remove");
                Err(AppError::InconsistentState(format!(
                    "item removed from platform set '{}' but still recorded locally",
                    pack.name
                )))
            }
        }
    }

    /// Delete a pack and all of its items. The owning relationship means no
    /// orphan item rows can survive this.
    pub async fn delete_pack(&self, pack_id: i64) -> AppResult<()> {
        let lock = self.pack_lock(pack_id).await;
        let _guard = lock.lock().await;

        let pack = self.get_pack(pack_id).await?;

        self.platform.delete_pack(&pack.name).await?;

        let commit = async {
            let mut tx = self.db.begin().await?;

            sqlx::query("DELETE FROM items WHERE pack_id = ?")
                .bind(pack_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM packs WHERE pack_id = ?")
                .bind(pack_id)
                .execute(&mut *tx)
                .await?;
            // The adaptive back-reference is a convenience, not lifecycle
            // authority; clear it when its target goes away.
            sqlx::query("UPDATE users SET adaptive_pack_id = NULL WHERE adaptive_pack_id = ?")
                .bind(pack_id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        };

        match commit.await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(pack_id, error = %e, "local commit failed after platform delete");
                Err(AppError::InconsistentState(format!(
                    "pack '{}' deleted on platform but still recorded locally",
                    pack.name
                )))
            }
        }
    }

    /// Duplicate a platform pack into a new local pack owned by `user_id`.
    /// The capacity pre-check ran before payment; it is re-checked here at
    /// commit time.
    pub async fn duplicate_pack(
        &self,
        user_id: i64,
        source: &PlatformPack,
        slug: &str,
        title: &str,
    ) -> AppResult<Pack> {
        let kind = if source.sticker_type == "custom_emoji" {
            PackKind::Emoji
        } else {
            PackKind::Sticker
        };

        let user = self.get_or_create_user(user_id).await?;
        self.policy
            .check_duplicate(&user, kind, source.stickers.len() as i64)?;

        let first = source
            .stickers
            .first()
            .ok_or_else(|| AppError::Validation("Source pack has no items".into()))?;

        let to_input = |s: &crate::platform::types::TgSticker| {
            let format = if s.is_video {
                AssetFormat::Video
            } else if s.is_animated {
                AssetFormat::Animated
            } else {
                AssetFormat::Static
            };
            input_sticker(&s.file_id, format, s.emoji.as_deref())
        };

        self.platform
            .create_pack(user_id, slug, title, kind.platform_type(), &to_input(first))
            .await?;
        for s in &source.stickers[1..] {
            self.platform.add_item(slug, &to_input(s)).await?;
        }

        let link = external_link(kind, slug);
        let commit = async {
            let mut tx = self.db.begin().await?;

            let pack: Pack = sqlx::query_as(
                "INSERT INTO packs (owner_user_id, name, title, kind, is_paid_pack, external_link, item_count, created_at)
                 VALUES (?, ?, ?, ?, 1, ?, ?, ?)
                 RETURNING *",
            )
            .bind(user_id)
            .bind(slug)
            .bind(title)
            .bind(kind)
            .bind(&link)
            .bind(source.stickers.len() as i64)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_unique_violation)?;

            for s in &source.stickers {
                sqlx::query(
                    "INSERT INTO items (pack_id, content_ref, emoji, kind, added_at) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(pack.pack_id)
                .bind(&s.file_id)
                .bind(&s.emoji)
                .bind(kind)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<Pack, AppError>(pack)
        };

        match commit.await {
            Ok(pack) => Ok(pack),
            Err(e) => {
                tracing::error!(user_id, slug, error = %e, "local commit failed after platform duplication");
                Err(AppError::InconsistentState(format!(
                    "duplicated pack '{}' exists on platform but is not recorded locally",
                    slug
                )))
            }
        }
    }

    /// Live item row count; `packs.item_count` must always agree with this.
    pub async fn item_rows(&self, pack_id: i64) -> AppResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM items WHERE pack_id = ?")
            .bind(pack_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_flattens_non_slug_chars() {
        assert_eq!(normalize_pack_name("My Pack!"), "my_pack");
        assert_eq!(normalize_pack_name("__weird--name__"), "weird_name");
        assert_eq!(normalize_pack_name("abcd"), "abcd");
    }

    #[test]
    fn parse_pack_link_accepts_links_and_slugs() {
        assert_eq!(
            parse_pack_link("https://t.me/addstickers/cool_pack"),
            Some("cool_pack".into())
        );
        assert_eq!(
            parse_pack_link("https://t.me/addemoji/fancy_emojis"),
            Some("fancy_emojis".into())
        );
        assert_eq!(parse_pack_link("bare_slug"), Some("bare_slug".into()));
        assert_eq!(parse_pack_link("not a slug!"), None);
        assert_eq!(parse_pack_link(""), None);
    }

    #[test]
    fn external_link_prefix_follows_kind() {
        assert_eq!(
            external_link(PackKind::Emoji, "p1"),
            "https://t.me/addemoji/p1"
        );
        assert_eq!(
            external_link(PackKind::Sticker, "p1"),
            "https://t.me/addstickers/p1"
        );
    }
}
