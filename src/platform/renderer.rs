use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use crate::config::RenderConfig;
use crate::error::{AppError, AppResult};
use crate::models::{AssetFormat, RenderInput, RenderOptions};

/// Raw encoder output: asset bytes plus the format the codec settled on.
#[derive(Debug, Clone)]
pub struct RenderedBlob {
    pub bytes: Bytes,
    pub format: AssetFormat,
}

/// External render/codec collaborator. The pipeline only decides *what* to
/// render; encoding happens on the other side of this trait.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Whether the encoder can produce alpha-blended backgrounds.
    fn supports_transparency(&self) -> bool;

    async fn render(&self, input: &RenderInput, options: RenderOptions) -> AppResult<RenderedBlob>;
}

/// HTTP client for the render service.
pub struct HttpRenderer {
    http: reqwest::Client,
    base_url: String,
    supports_transparency: bool,
}

impl HttpRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.service_url.clone(),
            supports_transparency: config.supports_transparency,
        }
    }

    fn job_body(input: &RenderInput, options: RenderOptions) -> serde_json::Value {
        match input {
            RenderInput::EmojiRef { file_id, animated } => json!({
                "kind": "emoji_ref",
                "file_id": file_id,
                "animated": animated,
                "canvas": options.canvas_size,
            }),
            RenderInput::StickerRef { file_id, animated } => json!({
                "kind": "sticker_ref",
                "file_id": file_id,
                "animated": animated,
                "canvas": options.canvas_size,
            }),
            RenderInput::Photo { file_id } => json!({
                "kind": "photo",
                "file_id": file_id,
                "canvas": options.canvas_size,
            }),
            RenderInput::Text {
                lines,
                font,
                background,
            } => json!({
                "kind": "text",
                "lines": lines,
                "font": font.as_str(),
                "background": background.as_str(),
                "canvas": options.canvas_size,
            }),
        }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    fn supports_transparency(&self) -> bool {
        self.supports_transparency
    }

    async fn render(&self, input: &RenderInput, options: RenderOptions) -> AppResult<RenderedBlob> {
        let resp = self
            .http
            .post(format!("{}/render", self.base_url))
            .json(&Self::job_body(input, options))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(AppError::PlatformFailure(format!(
                "render service returned {}",
                resp.status()
            )));
        }

        let format = resp
            .headers()
            .get("x-asset-format")
            .and_then(|v| v.to_str().ok())
            .map(|v| match v {
                "animated" => AssetFormat::Animated,
                "video" => AssetFormat::Video,
                _ => AssetFormat::Static,
            })
            .unwrap_or(AssetFormat::Static);

        let bytes = resp.bytes().await?;
        Ok(RenderedBlob { bytes, format })
    }
}
