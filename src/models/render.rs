use serde::{Deserialize, Serialize};

use super::PackKind;

/// Named font styles offered during the adaptive text flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    Classic,
    ClassicBold,
    Serif,
    SerifBold,
    Mono,
    Script,
    Rounded,
    Condensed,
    Outline,
    Shadow,
    Pixel,
    Marker,
}

impl FontStyle {
    pub const ALL: [FontStyle; 12] = [
        FontStyle::Classic,
        FontStyle::ClassicBold,
        FontStyle::Serif,
        FontStyle::SerifBold,
        FontStyle::Mono,
        FontStyle::Script,
        FontStyle::Rounded,
        FontStyle::Condensed,
        FontStyle::Outline,
        FontStyle::Shadow,
        FontStyle::Pixel,
        FontStyle::Marker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::ClassicBold => "classic_bold",
            Self::Serif => "serif",
            Self::SerifBold => "serif_bold",
            Self::Mono => "mono",
            Self::Script => "script",
            Self::Rounded => "rounded",
            Self::Condensed => "condensed",
            Self::Outline => "outline",
            Self::Shadow => "shadow",
            Self::Pixel => "pixel",
            Self::Marker => "marker",
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    None,
    HalfTransparent,
    FillOnly,
}

impl BackgroundMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::HalfTransparent => "half_transparent",
            Self::FillOnly => "fill_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "half_transparent" => Some(Self::HalfTransparent),
            "fill_only" => Some(Self::FillOnly),
            _ => None,
        }
    }

    /// Half-transparent fills need renderer-side alpha support.
    pub fn needs_transparency(self) -> bool {
        matches!(self, Self::HalfTransparent)
    }
}

/// What the pipeline is asked to turn into a pack item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderInput {
    /// Existing custom emoji; passed through with scaling only.
    EmojiRef { file_id: String, animated: bool },
    /// Existing sticker; passed through with scaling only.
    StickerRef { file_id: String, animated: bool },
    /// Uploaded photo, auto-scaled/cropped to the target aspect.
    Photo { file_id: String },
    /// Collected text lines rendered under a font and background mode.
    Text {
        lines: Vec<String>,
        font: FontStyle,
        background: BackgroundMode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetFormat {
    Static,
    Animated,
    Video,
}

impl AssetFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Animated => "animated",
            Self::Video => "video",
        }
    }

    pub fn is_animated(self) -> bool {
        !matches!(self, Self::Static)
    }
}

/// Finished output of the render pipeline: an opaque asset handle plus the
/// format the encoder settled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAsset {
    pub content_ref: String,
    pub format: AssetFormat,
}

/// Options threaded through to the renderer collaborator.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub canvas_size: u32,
    pub target_kind: PackKind,
}
