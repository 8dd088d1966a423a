//! Export/import of the persisted state as JSON snapshots.
//!
//! Import is all-or-nothing: the snapshot is validated up front (no item may
//! reference an absent pack) and restored inside a single transaction.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};
use crate::models::{Pack, PackItem, Snapshot, User, SNAPSHOT_VERSION};

pub struct BackupService {
    db: SqlitePool,
    dir: PathBuf,
}

impl BackupService {
    pub fn new(db: SqlitePool, dir: impl AsRef<Path>) -> Self {
        Self {
            db,
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Snapshot one user's slice, or the whole store when `user_id` is None.
    pub async fn snapshot(&self, user_id: Option<i64>) -> AppResult<Snapshot> {
        let (users, packs, items) = match user_id {
            Some(uid) => {
                let users: Vec<User> = sqlx::query_as("SELECT * FROM users WHERE user_id = ?")
                    .bind(uid)
                    .fetch_all(&self.db)
                    .await?;
                let packs: Vec<Pack> =
                    sqlx::query_as("SELECT * FROM packs WHERE owner_user_id = ? ORDER BY pack_id")
                        .bind(uid)
                        .fetch_all(&self.db)
                        .await?;
                let items: Vec<PackItem> = sqlx::query_as(
                    "SELECT * FROM items WHERE pack_id IN
                     (SELECT pack_id FROM packs WHERE owner_user_id = ?) ORDER BY item_id",
                )
                .bind(uid)
                .fetch_all(&self.db)
                .await?;
                (users, packs, items)
            }
            None => {
                let users: Vec<User> = sqlx::query_as("SELECT * FROM users ORDER BY user_id")
                    .fetch_all(&self.db)
                    .await?;
                let packs: Vec<Pack> = sqlx::query_as("SELECT * FROM packs ORDER BY pack_id")
                    .fetch_all(&self.db)
                    .await?;
                let items: Vec<PackItem> = sqlx::query_as("SELECT * FROM items ORDER BY item_id")
                    .fetch_all(&self.db)
                    .await?;
                (users, packs, items)
            }
        };

        Ok(Snapshot::new(users, packs, items))
    }

    /// Serialize a snapshot into the backup directory; returns the path.
    pub async fn export_to_dir(&self, user_id: Option<i64>) -> AppResult<PathBuf> {
        let snapshot = self.snapshot(user_id).await?;
        let content = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| AppError::Internal(e.into()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        let stamp = Utc::now().timestamp();
        let name = match user_id {
            Some(uid) => format!("export_{}_{}.json", uid, stamp),
            None => format!("export_all_{}.json", stamp),
        };
        let path = self.dir.join(name);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(path)
    }

    pub fn parse(content: &[u8]) -> AppResult<Snapshot> {
        let snapshot: Snapshot = serde_json::from_slice(content)
            .map_err(|e| AppError::InvalidSnapshot(format!("bad JSON: {}", e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Restore a snapshot. Rejects orphan items before touching the store;
    /// the writes run in one transaction, so a failure restores nothing.
    pub async fn import(&self, snapshot: &Snapshot) -> AppResult<()> {
        let orphans = snapshot.orphan_items();
        if !orphans.is_empty() {
            return Err(AppError::InvalidSnapshot(format!(
                "items reference absent packs: {:?}",
                orphans
            )));
        }

        let mut tx = self.db.begin().await?;

        for user in &snapshot.users {
            sqlx::query(
                "INSERT OR REPLACE INTO users
                 (user_id, tier, free_pack_uses, paid_pack_uses, adaptive_pack_id, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(user.user_id)
            .bind(user.tier)
            .bind(user.free_pack_uses)
            .bind(user.paid_pack_uses)
            .bind(user.adaptive_pack_id)
            .bind(user.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for pack in &snapshot.packs {
            sqlx::query(
                "INSERT OR REPLACE INTO packs
                 (pack_id, owner_user_id, name, title, kind, is_paid_pack, external_link, item_count, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(pack.pack_id)
            .bind(pack.owner_user_id)
            .bind(&pack.name)
            .bind(&pack.title)
            .bind(pack.kind)
            .bind(pack.is_paid_pack)
            .bind(&pack.external_link)
            .bind(pack.item_count)
            .bind(pack.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for item in &snapshot.items {
            sqlx::query(
                "INSERT OR REPLACE INTO items
                 (item_id, pack_id, content_ref, emoji, kind, added_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(item.item_id)
            .bind(item.pack_id)
            .bind(&item.content_ref)
            .bind(&item.emoji)
            .bind(item.kind)
            .bind(item.added_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
