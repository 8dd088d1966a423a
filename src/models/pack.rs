use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pack {
    pub pack_id: i64,
    pub owner_user_id: i64,
    pub name: String,
    pub title: String,
    pub kind: PackKind,
    pub is_paid_pack: bool,
    /// Assigned once at creation, immutable afterwards.
    pub external_link: String,
    /// Must equal the number of live item rows at every observable point.
    pub item_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum PackKind {
    Emoji,
    Sticker,
    AdaptiveEmoji,
}

impl PackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Emoji => "emoji",
            Self::Sticker => "sticker",
            Self::AdaptiveEmoji => "adaptive-emoji",
        }
    }

    /// Platform sticker-set type for this pack kind.
    pub fn platform_type(self) -> &'static str {
        match self {
            Self::Emoji | Self::AdaptiveEmoji => "custom_emoji",
            Self::Sticker => "regular",
        }
    }

    /// Adaptive packs only ever hold statically rendered output.
    pub fn allows_animated(self) -> bool {
        !matches!(self, Self::AdaptiveEmoji)
    }

    /// The t.me path component for the public pack link.
    pub fn link_prefix(self) -> &'static str {
        match self {
            Self::Emoji | Self::AdaptiveEmoji => "addemoji",
            Self::Sticker => "addstickers",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "emoji" => Some(Self::Emoji),
            "sticker" => Some(Self::Sticker),
            "adaptive-emoji" => Some(Self::AdaptiveEmoji),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PackItem {
    pub item_id: i64,
    pub pack_id: i64,
    /// Opaque handle: a platform file reference or custom-emoji reference.
    pub content_ref: String,
    pub emoji: Option<String>,
    pub kind: PackKind,
    pub added_at: DateTime<Utc>,
}
