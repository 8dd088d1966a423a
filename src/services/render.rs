//! Adaptive render pipeline.
//!
//! Decides how an input becomes a finished pack item: pass-through for
//! existing emoji/sticker references, encoder round-trip for photos and
//! text, background feasibility checks, and the animated-output rule.
//! Actual pixel work lives behind the [`Renderer`] collaborator.

use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{
    AssetFormat, BackgroundMode, PackKind, RenderInput, RenderOptions, RenderedAsset,
};
use crate::platform::renderer::Renderer;
use crate::platform::PackPlatform;

pub struct RenderService {
    renderer: Arc<dyn Renderer>,
    platform: Arc<dyn PackPlatform>,
    canvas_size: u32,
}

impl RenderService {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        platform: Arc<dyn PackPlatform>,
        canvas_size: u32,
    ) -> Self {
        Self {
            renderer,
            platform,
            canvas_size,
        }
    }

    /// Checked when the user picks a background, before the flow accepts it.
    pub fn validate_background(&self, mode: BackgroundMode) -> AppResult<()> {
        if mode.needs_transparency() && !self.renderer.supports_transparency() {
            return Err(AppError::UnsupportedBackground);
        }
        Ok(())
    }

    /// Turn an input into a finished asset for the target pack kind.
    pub async fn produce(
        &self,
        owner_user_id: i64,
        input: RenderInput,
        target_kind: PackKind,
    ) -> AppResult<RenderedAsset> {
        match &input {
            // Existing references pass through; the platform scales them to
            // the target dimensions and no manual edits are accepted.
            RenderInput::EmojiRef { file_id, animated }
            | RenderInput::StickerRef { file_id, animated } => {
                let format = if *animated && target_kind.allows_animated() {
                    AssetFormat::Animated
                } else {
                    AssetFormat::Static
                };
                Ok(RenderedAsset {
                    content_ref: file_id.clone(),
                    format,
                })
            }

            RenderInput::Photo { .. } | RenderInput::Text { .. } => {
                if let RenderInput::Text { background, .. } = &input {
                    // Re-validated here as well: the feasibility answer may
                    // have changed between selection and commit.
                    self.validate_background(*background)?;
                }

                let options = RenderOptions {
                    canvas_size: self.canvas_size,
                    target_kind,
                };
                let blob = self.renderer.render(&input, options).await?;

                let format = if blob.format.is_animated() && target_kind.allows_animated() {
                    blob.format
                } else {
                    AssetFormat::Static
                };

                let content_ref = self
                    .platform
                    .upload_asset(owner_user_id, blob.bytes, format)
                    .await?;

                Ok(RenderedAsset {
                    content_ref,
                    format,
                })
            }
        }
    }
}
