pub mod renderer;
pub mod telegram;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AppResult;
use crate::models::AssetFormat;
use types::{InlineKeyboardMarkup, InputSticker, PlatformPack};

/// Outbound chat surface of the messaging platform. Everything the flow
/// controller says to a user goes through here.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()>;

    async fn send_inline_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> AppResult<()>;

    async fn answer_callback(&self, callback_id: &str) -> AppResult<()>;

    async fn send_invoice(
        &self,
        chat_id: i64,
        title: &str,
        description: &str,
        payload: &str,
        amount: i64,
    ) -> AppResult<()>;

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> AppResult<()>;

    async fn download_file(&self, file_id: &str) -> AppResult<Bytes>;
}

/// Pack API of the messaging platform. Every platform-visible pack mutation
/// the store makes goes through here; the seam exists so the two-phase
/// commit can be exercised against a scripted double.
#[async_trait]
pub trait PackPlatform: Send + Sync {
    async fn create_pack(
        &self,
        owner_user_id: i64,
        name: &str,
        title: &str,
        pack_type: &str,
        first: &InputSticker,
    ) -> AppResult<()>;

    async fn add_item(&self, name: &str, sticker: &InputSticker) -> AppResult<()>;

    /// Removes by item content reference; the platform addresses set members
    /// by file id, not by set.
    async fn remove_item(&self, content_ref: &str) -> AppResult<()>;

    async fn delete_pack(&self, name: &str) -> AppResult<()>;

    async fn get_pack(&self, name: &str) -> AppResult<PlatformPack>;

    /// Uploads raw asset bytes, returning the platform file reference to use
    /// as an item content handle.
    async fn upload_asset(
        &self,
        owner_user_id: i64,
        data: Bytes,
        format: AssetFormat,
    ) -> AppResult<String>;
}
