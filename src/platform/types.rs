//! Minimal typed subset of the Telegram Bot API wire format, plus the
//! normalized [`InboundEvent`] the flow controller consumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
    pub pre_checkout_query: Option<PreCheckoutQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<TgUser>,
    pub chat: Chat,
    pub text: Option<String>,
    pub sticker: Option<TgSticker>,
    pub photo: Option<Vec<PhotoSize>>,
    pub document: Option<Document>,
    pub successful_payment: Option<SuccessfulPayment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub chat_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgSticker {
    pub file_id: String,
    #[serde(rename = "type", default)]
    pub sticker_type: String,
    pub emoji: Option<String>,
    #[serde(default)]
    pub is_animated: bool,
    #[serde(default)]
    pub is_video: bool,
}

impl TgSticker {
    pub fn is_custom_emoji(&self) -> bool {
        self.sticker_type == "custom_emoji"
    }

    pub fn animated(&self) -> bool {
        self.is_animated || self.is_video
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessfulPayment {
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: TgUser,
    pub invoice_payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TgUser,
    pub message: Option<Box<Message>>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgFile {
    pub file_id: String,
    pub file_path: Option<String>,
}

/// Outbound sticker payload for set mutations.
#[derive(Debug, Clone, Serialize)]
pub struct InputSticker {
    pub sticker: String,
    pub format: String,
    pub emoji_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        InlineKeyboardButton {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        InlineKeyboardButton {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    pub fn rows(rows: Vec<Vec<InlineKeyboardButton>>) -> Self {
        InlineKeyboardMarkup {
            inline_keyboard: rows,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LabeledPrice {
    pub label: String,
    pub amount: i64,
}

/// Sticker set as reported by the platform, used by the duplicate flow.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformPack {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub sticker_type: String,
    pub stickers: Vec<TgSticker>,
}

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

/// One normalized inbound event as consumed by the flow controller.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub user_id: i64,
    pub chat_id: i64,
    pub payload: EventPayload,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Command { name: String, args: Vec<String> },
    Text(String),
    Sticker(TgSticker),
    Photo { file_id: String },
    Document { file_id: String },
    Callback { id: String, data: String },
    PreCheckout { id: String, payload: String },
    PaymentSucceeded { payload: String },
}

impl Update {
    /// Flatten a raw update into the event the controller understands.
    /// Updates with no actionable payload yield `None`.
    pub fn into_event(self) -> Option<InboundEvent> {
        if let Some(q) = self.pre_checkout_query {
            return Some(InboundEvent {
                user_id: q.from.id,
                chat_id: q.from.id,
                payload: EventPayload::PreCheckout {
                    id: q.id,
                    payload: q.invoice_payload,
                },
            });
        }

        if let Some(q) = self.callback_query {
            let chat_id = q.message.as_ref().map(|m| m.chat.id).unwrap_or(q.from.id);
            let data = q.data.unwrap_or_default();
            return Some(InboundEvent {
                user_id: q.from.id,
                chat_id,
                payload: EventPayload::Callback { id: q.id, data },
            });
        }

        let msg = self.message?;
        let user_id = msg.from.as_ref()?.id;
        let chat_id = msg.chat.id;

        let payload = if let Some(p) = msg.successful_payment {
            EventPayload::PaymentSucceeded {
                payload: p.invoice_payload,
            }
        } else if let Some(s) = msg.sticker {
            EventPayload::Sticker(s)
        } else if let Some(photos) = msg.photo {
            // Largest size last, per the API ordering.
            let file_id = photos.last()?.file_id.clone();
            EventPayload::Photo { file_id }
        } else if let Some(d) = msg.document {
            EventPayload::Document { file_id: d.file_id }
        } else if let Some(text) = msg.text {
            if let Some(stripped) = text.strip_prefix('/') {
                let mut parts = stripped.split_whitespace();
                let name = parts
                    .next()
                    .map(|c| c.split('@').next().unwrap_or(c).to_lowercase())
                    .unwrap_or_default();
                let args = parts.map(str::to_string).collect();
                EventPayload::Command { name, args }
            } else {
                EventPayload::Text(text)
            }
        } else {
            return None;
        };

        Some(InboundEvent {
            user_id,
            chat_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing_strips_bot_suffix_and_lowercases() {
        let update = Update {
            update_id: 1,
            message: Some(Message {
                message_id: 10,
                from: Some(TgUser {
                    id: 42,
                    username: None,
                }),
                chat: Chat {
                    id: 42,
                    chat_type: "private".into(),
                },
                text: Some("/Create@packsmith_bot emoji".into()),
                sticker: None,
                photo: None,
                document: None,
                successful_payment: None,
            }),
            callback_query: None,
            pre_checkout_query: None,
        };

        let event = update.into_event().unwrap();
        match event.payload {
            EventPayload::Command { name, args } => {
                assert_eq!(name, "create");
                assert_eq!(args, vec!["emoji".to_string()]);
            }
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn photo_event_picks_largest_size() {
        let update = Update {
            update_id: 2,
            message: Some(Message {
                message_id: 11,
                from: Some(TgUser {
                    id: 7,
                    username: None,
                }),
                chat: Chat {
                    id: 7,
                    chat_type: "private".into(),
                },
                text: None,
                sticker: None,
                photo: Some(vec![
                    PhotoSize {
                        file_id: "small".into(),
                        width: 90,
                        height: 90,
                    },
                    PhotoSize {
                        file_id: "large".into(),
                        width: 800,
                        height: 800,
                    },
                ]),
                document: None,
                successful_payment: None,
            }),
            callback_query: None,
            pre_checkout_query: None,
        };

        let event = update.into_event().unwrap();
        match event.payload {
            EventPayload::Photo { file_id } => assert_eq!(file_id, "large"),
            other => panic!("unexpected payload: {:?}", other),
        }
    }
}
