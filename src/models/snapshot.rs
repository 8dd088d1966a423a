use serde::{Deserialize, Serialize};

use super::{Pack, PackItem, User};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized export of users, packs and items. Import restores it
/// all-or-nothing and rejects items whose pack is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub users: Vec<User>,
    pub packs: Vec<Pack>,
    pub items: Vec<PackItem>,
}

impl Snapshot {
    pub fn new(users: Vec<User>, packs: Vec<Pack>, items: Vec<PackItem>) -> Self {
        Snapshot {
            version: SNAPSHOT_VERSION,
            users,
            packs,
            items,
        }
    }

    /// Item ids referencing no pack in this snapshot, in encounter order.
    pub fn orphan_items(&self) -> Vec<i64> {
        self.items
            .iter()
            .filter(|it| !self.packs.iter().any(|p| p.pack_id == it.pack_id))
            .map(|it| it.item_id)
            .collect()
    }
}
