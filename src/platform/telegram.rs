use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::TelegramConfig;
use crate::error::{AppError, AppResult};
use crate::models::AssetFormat;

use super::types::{
    ApiResponse, InlineKeyboardMarkup, InputSticker, LabeledPrice, PlatformPack, TgFile,
};
use super::{ChatTransport, PackPlatform};

/// Thin typed client over the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            token: config.bot_token.clone(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> AppResult<T> {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?;

        let api: ApiResponse<T> = resp.json().await?;
        if api.ok {
            api.result.ok_or_else(|| {
                AppError::PlatformFailure(format!("{}: empty result", method))
            })
        } else {
            Err(AppError::PlatformFailure(format!(
                "{}: {}",
                method,
                api.description.unwrap_or_else(|| "unknown error".into())
            )))
        }
    }

    /// Fire-and-check variant for methods whose result payload is irrelevant.
    async fn call_ok(&self, method: &str, body: serde_json::Value) -> AppResult<()> {
        let _: serde_json::Value = self.call(method, body).await?;
        Ok(())
    }

    fn sticker_format_str(format: AssetFormat) -> &'static str {
        match format {
            AssetFormat::Static => "static",
            AssetFormat::Animated => "animated",
            AssetFormat::Video => "video",
        }
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.call_ok(
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text }),
        )
        .await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> AppResult<()> {
        self.call_ok(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
                "reply_markup": keyboard,
            }),
        )
        .await
    }

    async fn answer_callback(&self, callback_id: &str) -> AppResult<()> {
        self.call_ok(
            "answerCallbackQuery",
            json!({ "callback_query_id": callback_id }),
        )
        .await
    }

    async fn send_invoice(
        &self,
        chat_id: i64,
        title: &str,
        description: &str,
        payload: &str,
        amount: i64,
    ) -> AppResult<()> {
        let prices = vec![LabeledPrice {
            label: title.to_string(),
            amount,
        }];
        self.call_ok(
            "sendInvoice",
            json!({
                "chat_id": chat_id,
                "title": title,
                "description": description,
                "payload": payload,
                // Stars invoices use the XTR currency and no provider token.
                "currency": "XTR",
                "prices": prices,
            }),
        )
        .await
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        ok: bool,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        let mut body = json!({ "pre_checkout_query_id": query_id, "ok": ok });
        if let Some(msg) = error_message {
            body["error_message"] = json!(msg);
        }
        self.call_ok("answerPreCheckoutQuery", body).await
    }

    async fn download_file(&self, file_id: &str) -> AppResult<Bytes> {
        let file: TgFile = self.call("getFile", json!({ "file_id": file_id })).await?;
        let path = file.file_path.ok_or_else(|| {
            AppError::PlatformFailure("getFile returned no file_path".into())
        })?;
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, path);
        let resp = self.http.get(url).send().await?;
        Ok(resp.bytes().await?)
    }
}

#[async_trait]
impl PackPlatform for TelegramClient {
    async fn create_pack(
        &self,
        owner_user_id: i64,
        name: &str,
        title: &str,
        pack_type: &str,
        first: &InputSticker,
    ) -> AppResult<()> {
        self.call_ok(
            "createNewStickerSet",
            json!({
                "user_id": owner_user_id,
                "name": name,
                "title": title,
                "sticker_type": pack_type,
                "stickers": [first],
            }),
        )
        .await
    }

    async fn add_item(&self, name: &str, sticker: &InputSticker) -> AppResult<()> {
        self.call_ok(
            "addStickerToSet",
            json!({ "name": name, "sticker": sticker }),
        )
        .await
    }

    async fn remove_item(&self, content_ref: &str) -> AppResult<()> {
        self.call_ok(
            "deleteStickerFromSet",
            json!({ "sticker": content_ref }),
        )
        .await
    }

    async fn delete_pack(&self, name: &str) -> AppResult<()> {
        self.call_ok("deleteStickerSet", json!({ "name": name })).await
    }

    async fn get_pack(&self, name: &str) -> AppResult<PlatformPack> {
        self.call("getStickerSet", json!({ "name": name })).await
    }

    async fn upload_asset(
        &self,
        owner_user_id: i64,
        data: Bytes,
        format: AssetFormat,
    ) -> AppResult<String> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("asset.webp");
        let form = reqwest::multipart::Form::new()
            .text("user_id", owner_user_id.to_string())
            .text(
                "sticker_format",
                Self::sticker_format_str(format).to_string(),
            )
            .part("sticker", part);

        let resp = self
            .http
            .post(self.method_url("uploadStickerFile"))
            .multipart(form)
            .send()
            .await?;

        let api: ApiResponse<TgFile> = resp.json().await?;
        if api.ok {
            api.result
                .map(|f| f.file_id)
                .ok_or_else(|| AppError::PlatformFailure("uploadStickerFile: empty result".into()))
        } else {
            Err(AppError::PlatformFailure(format!(
                "uploadStickerFile: {}",
                api.description.unwrap_or_else(|| "unknown error".into())
            )))
        }
    }
}
