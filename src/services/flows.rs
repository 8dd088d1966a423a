//! Flow controller: routes each inbound event to the open session for that
//! user, to a new session when the event starts a flow, or to a stateless
//! command. All user-facing messaging for the flows lives here.

use std::future::Future;
use std::sync::Arc;

use rand::Rng;

use crate::error::{AppError, AppResult};
use crate::models::{
    BackgroundMode, ConfirmAction, FlowCategory, FlowState, FontStyle, PackKind, PendingItem,
    RenderInput, RenderSource, SelectionIntent,
};
use crate::platform::types::{
    EventPayload, InboundEvent, InlineKeyboardButton, InlineKeyboardMarkup, TgSticker,
};
use crate::platform::{ChatTransport, PackPlatform};

use super::backup::BackupService;
use super::broadcast::BroadcastService;
use super::limits::Capability;
use super::packs::{normalize_pack_name, parse_pack_link, NewItem, PackStore};
use super::payments::{PaymentPurpose, PaymentsService};
use super::render::RenderService;
use super::sessions::SessionManager;

const HELP_TEXT: &str = "Commands:\n\
/create <emoji|sticker> - Create a pack.\n\
/bpack <emoji|sticker> - Buy paid pack creation.\n\
/apack - Buy an adaptive emoji pack.\n\
/acr - Create an adaptive emoji from text/photo/emoji.\n\
/duplicate <pack_link> - Duplicate a pack (paid).\n\
/rem - Remove an item from a pack.\n\
/delete <emoji|sticker> - Delete a whole pack.\n\
/mypack - List your packs.\n\
/import - Restore a backup (send the JSON file as a document).\n\
/export - Export your data as JSON.\n\
/cancel - Abort the current flow.\n\
Limits: free tier 1 pack (40 emojis / 30 stickers), paid up to 120 items and long names.";

pub struct FlowController {
    store: Arc<PackStore>,
    sessions: Arc<SessionManager>,
    render: Arc<RenderService>,
    payments: PaymentsService,
    backup: Arc<BackupService>,
    broadcast: Arc<BroadcastService>,
    transport: Arc<dyn ChatTransport>,
    platform: Arc<dyn PackPlatform>,
    bot_username: String,
}

impl FlowController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<PackStore>,
        sessions: Arc<SessionManager>,
        render: Arc<RenderService>,
        payments: PaymentsService,
        backup: Arc<BackupService>,
        broadcast: Arc<BroadcastService>,
        transport: Arc<dyn ChatTransport>,
        platform: Arc<dyn PackPlatform>,
        bot_username: String,
    ) -> Self {
        Self {
            store,
            sessions,
            render,
            payments,
            backup,
            broadcast,
            transport,
            platform,
            bot_username,
        }
    }

    /// Entry point for one inbound event. Errors become chat replies; only
    /// authorization denials and consistency violations also hit the
    /// operational log.
    pub async fn handle(&self, event: InboundEvent) -> AppResult<()> {
        let user_id = event.user_id;
        let chat_id = event.chat_id;

        match self.dispatch(event).await {
            Ok(()) => Ok(()),
            Err(e) => {
                match &e {
                    AppError::NotAuthorized | AppError::OwnerOnly => {
                        tracing::warn!(user_id, error = %e, "authorization denied");
                    }
                    AppError::InconsistentState(detail) => {
                        tracing::error!(user_id, detail = %detail, "manual reconciliation required");
                    }
                    _ => {
                        tracing::debug!(user_id, error = %e, "flow error");
                    }
                }
                let _ = self
                    .transport
                    .send_message(chat_id, &e.user_message())
                    .await;
                Ok(())
            }
        }
    }

    async fn dispatch(&self, event: InboundEvent) -> AppResult<()> {
        let InboundEvent {
            user_id,
            chat_id,
            payload,
        } = event;

        match payload {
            EventPayload::Command { name, args } => {
                self.handle_command(user_id, chat_id, &name, &args).await
            }
            EventPayload::Callback { id, data } => {
                let _ = self.transport.answer_callback(&id).await;
                self.handle_callback(user_id, chat_id, &data).await
            }
            EventPayload::PreCheckout { id, payload } => {
                let ok = PaymentsService::approve_pre_checkout(&payload);
                self.transport
                    .answer_pre_checkout(&id, ok, (!ok).then_some("Invalid invoice."))
                    .await
            }
            EventPayload::PaymentSucceeded { payload } => {
                self.handle_payment(user_id, chat_id, &payload).await
            }
            EventPayload::Text(text) => self.handle_text(user_id, chat_id, text).await,
            EventPayload::Sticker(sticker) => {
                self.handle_sticker(user_id, chat_id, sticker).await
            }
            EventPayload::Photo { file_id } => {
                self.handle_photo(user_id, chat_id, file_id).await
            }
            EventPayload::Document { file_id } => {
                self.handle_document(user_id, chat_id, file_id).await
            }
        }
    }

    // ---- Commands ----

    async fn handle_command(
        &self,
        user_id: i64,
        chat_id: i64,
        name: &str,
        args: &[String],
    ) -> AppResult<()> {
        match name {
            "start" => {
                self.store.get_or_create_user(user_id).await?;
                self.transport
                    .send_message(
                        chat_id,
                        "Welcome! Build emoji and sticker packs right here in chat. \
                         Type /help to see everything I can do.",
                    )
                    .await
            }
            "help" => self.transport.send_message(chat_id, HELP_TEXT).await,
            "cancel" => {
                let had_one = self.sessions.cancel(user_id).await;
                let reply = if had_one { "Canceled." } else { "Nothing to cancel." };
                self.transport.send_message(chat_id, reply).await
            }
            "create" => self.start_create(user_id, chat_id, args).await,
            "acr" => self.start_adaptive(user_id, chat_id).await,
            "apack" => self.command_apack(user_id, chat_id).await,
            "rem" => self.start_remove(user_id, chat_id).await,
            "delete" => self.start_delete(user_id, chat_id, args).await,
            "duplicate" => self.start_duplicate(user_id, chat_id, args).await,
            "bpack" => self.command_bpack(user_id, chat_id, args).await,
            "admin" => self.command_admin(user_id, chat_id, args).await,
            "broadcast" => self.command_broadcast(user_id, chat_id, args).await,
            "set" => self.command_set(user_id, chat_id, args).await,
            "export" => self.command_export(user_id, chat_id).await,
            "import" => {
                self.transport
                    .send_message(chat_id, "Send your JSON backup file as a document.")
                    .await
            }
            "mypack" => self.command_mypack(user_id, chat_id).await,
            _ => {
                self.transport
                    .send_message(chat_id, "Unknown command. See /help.")
                    .await
            }
        }
    }

    async fn start_create(&self, user_id: i64, chat_id: i64, args: &[String]) -> AppResult<()> {
        let user = self.store.get_or_create_user(user_id).await?;
        let paid = user.tier.is_paid();
        self.store.policy().check_create(&user, paid)?;

        let kind = args.first().and_then(|a| match a.to_lowercase().as_str() {
            "emoji" => Some(PackKind::Emoji),
            "sticker" => Some(PackKind::Sticker),
            _ => None,
        });

        match kind {
            Some(kind) => {
                self.sessions
                    .begin(
                        user_id,
                        chat_id,
                        FlowCategory::Create,
                        FlowState::AwaitingName { kind, paid },
                    )
                    .await?;
                self.prompt_name(chat_id, paid).await
            }
            None => {
                self.sessions
                    .begin(
                        user_id,
                        chat_id,
                        FlowCategory::Create,
                        FlowState::AwaitingPackKind,
                    )
                    .await?;
                let keyboard = InlineKeyboardMarkup::rows(vec![vec![
                    InlineKeyboardButton::callback("Emoji pack", "kind|emoji"),
                    InlineKeyboardButton::callback("Sticker pack", "kind|sticker"),
                ]]);
                self.transport
                    .send_inline_keyboard(chat_id, "What kind of pack?", keyboard)
                    .await
            }
        }
    }

    async fn prompt_name(&self, chat_id: i64, paid: bool) -> AppResult<()> {
        let bounds = if paid { "1-32" } else { "4-12" };
        self.transport
            .send_message(
                chat_id,
                &format!("Send a name for your pack ({} characters).", bounds),
            )
            .await
    }

    async fn start_adaptive(&self, user_id: i64, chat_id: i64) -> AppResult<()> {
        let user = self.store.get_or_create_user(user_id).await?;
        self.store.policy().check_adaptive(&user)?;

        self.sessions
            .begin(
                user_id,
                chat_id,
                FlowCategory::Adaptive,
                FlowState::AwaitingRenderInput,
            )
            .await?;
        self.transport
            .send_message(
                chat_id,
                "Send text for the emoji (you can add more lines), or send a photo or a custom emoji.",
            )
            .await
    }

    /// Operator kill switch for purchases, flipped with /set.
    async fn purchases_enabled(&self) -> AppResult<bool> {
        let setting = self.store.get_setting("owner_items_for_sale").await?;
        Ok(setting.and_then(|v| v.as_bool()).unwrap_or(true))
    }

    async fn command_apack(&self, user_id: i64, chat_id: i64) -> AppResult<()> {
        let user = self.store.get_or_create_user(user_id).await?;
        self.store.policy().check_adaptive(&user)?;
        if !self.purchases_enabled().await? {
            return self
                .transport
                .send_message(chat_id, "Purchases are currently disabled.")
                .await;
        }

        if user.adaptive_pack_id.is_some() {
            return self
                .transport
                .send_message(chat_id, "You already have an adaptive pack.")
                .await;
        }

        let invoice = self.payments.invoice(user_id, &PaymentPurpose::Apack);
        self.transport
            .send_invoice(
                chat_id,
                &invoice.title,
                &invoice.description,
                &invoice.payload,
                invoice.amount,
            )
            .await
    }

    async fn start_remove(&self, user_id: i64, chat_id: i64) -> AppResult<()> {
        let packs = self.store.list_packs(user_id, None).await?;
        if packs.is_empty() {
            return self
                .transport
                .send_message(chat_id, "You have no packs.")
                .await;
        }

        self.sessions
            .begin(
                user_id,
                chat_id,
                FlowCategory::RemoveItem,
                FlowState::AwaitingTargetItem,
            )
            .await?;
        self.transport
            .send_message(chat_id, "Send the emoji or sticker you want removed.")
            .await
    }

    async fn start_delete(&self, user_id: i64, chat_id: i64, args: &[String]) -> AppResult<()> {
        let kind = match args.first().map(|a| a.to_lowercase()) {
            Some(a) if a == "emoji" => PackKind::Emoji,
            Some(a) if a == "sticker" => PackKind::Sticker,
            _ => {
                return self
                    .transport
                    .send_message(chat_id, "Usage: /delete <emoji|sticker>")
                    .await;
            }
        };

        let packs = self.store.list_packs(user_id, Some(kind)).await?;
        if packs.is_empty() {
            return self
                .transport
                .send_message(chat_id, "No packs of that kind.")
                .await;
        }

        self.sessions
            .begin(
                user_id,
                chat_id,
                FlowCategory::DeletePack,
                FlowState::AwaitingPackSelection {
                    intent: SelectionIntent::DeletePack { kind },
                },
            )
            .await?;

        let keyboard = Self::packs_keyboard(&packs);
        self.transport
            .send_inline_keyboard(chat_id, "Pick the pack to delete:", keyboard)
            .await
    }

    async fn start_duplicate(&self, user_id: i64, chat_id: i64, args: &[String]) -> AppResult<()> {
        let link = match args.first() {
            Some(l) => l,
            None => {
                return self
                    .transport
                    .send_message(chat_id, "Usage: /duplicate <pack_link>")
                    .await;
            }
        };
        let slug = parse_pack_link(link)
            .ok_or_else(|| AppError::Validation("That does not look like a pack link.".into()))?;

        // Pre-check against the live source size before charging anything.
        let user = self.store.get_or_create_user(user_id).await?;
        let source = self.platform.get_pack(&slug).await?;
        let kind = if source.sticker_type == "custom_emoji" {
            PackKind::Emoji
        } else {
            PackKind::Sticker
        };
        self.store
            .policy()
            .check_duplicate(&user, kind, source.stickers.len() as i64)?;

        self.sessions
            .begin(
                user_id,
                chat_id,
                FlowCategory::Duplicate,
                FlowState::AwaitingPayment {
                    source_name: slug.clone(),
                },
            )
            .await?;

        let invoice = self
            .payments
            .invoice(user_id, &PaymentPurpose::Duplicate { source: slug });
        self.transport
            .send_invoice(
                chat_id,
                &invoice.title,
                &invoice.description,
                &invoice.payload,
                invoice.amount,
            )
            .await
    }

    async fn command_bpack(&self, user_id: i64, chat_id: i64, args: &[String]) -> AppResult<()> {
        let kind = match args.first().map(|a| a.to_lowercase()) {
            Some(a) if a == "emoji" => PackKind::Emoji,
            Some(a) if a == "sticker" => PackKind::Sticker,
            _ => {
                return self
                    .transport
                    .send_message(chat_id, "Usage: /bpack <emoji|sticker>")
                    .await;
            }
        };

        self.store.get_or_create_user(user_id).await?;
        if !self.purchases_enabled().await? {
            return self
                .transport
                .send_message(chat_id, "Purchases are currently disabled.")
                .await;
        }
        let invoice = self.payments.invoice(user_id, &PaymentPurpose::Bpack { kind });
        self.transport
            .send_invoice(
                chat_id,
                &invoice.title,
                &invoice.description,
                &invoice.payload,
                invoice.amount,
            )
            .await
    }

    async fn command_admin(&self, user_id: i64, chat_id: i64, args: &[String]) -> AppResult<()> {
        if !self
            .store
            .policy()
            .authorizer()
            .is_authorized(user_id, Capability::AdminGrant)
        {
            return Err(AppError::NotAuthorized);
        }

        let target: i64 = args
            .first()
            .and_then(|a| a.parse().ok())
            .ok_or_else(|| AppError::Validation("Usage: /admin <user_id>".into()))?;

        self.store.grant_admin_exempt(target, 20).await?;
        self.transport
            .send_message(
                chat_id,
                &format!("User {} is now exempt, with 20 free creates.", target),
            )
            .await
    }

    async fn command_broadcast(
        &self,
        user_id: i64,
        chat_id: i64,
        args: &[String],
    ) -> AppResult<()> {
        if !self
            .store
            .policy()
            .authorizer()
            .is_authorized(user_id, Capability::Broadcast)
        {
            return Err(AppError::NotAuthorized);
        }

        let text = args.join(" ");
        if text.is_empty() {
            return self
                .transport
                .send_message(chat_id, "Usage: /broadcast <message>")
                .await;
        }

        let sent = self.broadcast.broadcast_text(&text).await?;
        self.transport
            .send_message(chat_id, &format!("Broadcast sent to {} users.", sent))
            .await
    }

    async fn command_set(&self, user_id: i64, chat_id: i64, args: &[String]) -> AppResult<()> {
        if !self
            .store
            .policy()
            .authorizer()
            .is_authorized(user_id, Capability::OperatorSettings)
        {
            return Err(AppError::NotAuthorized);
        }

        let value = match args.first().map(String::as_str) {
            Some("on") => true,
            Some("off") => false,
            _ => {
                return self
                    .transport
                    .send_message(chat_id, "Usage: /set <on|off>")
                    .await;
            }
        };

        self.store
            .set_setting("owner_items_for_sale", &serde_json::json!(value))
            .await?;
        self.transport
            .send_message(chat_id, &format!("Owner items for sale: {}.", value))
            .await
    }

    async fn command_export(&self, user_id: i64, chat_id: i64) -> AppResult<()> {
        self.store.get_or_create_user(user_id).await?;
        let path = self.backup.export_to_dir(Some(user_id)).await?;
        tracing::info!(user_id, path = %path.display(), "export written");
        self.transport
            .send_message(chat_id, "Export complete.")
            .await
    }

    async fn command_mypack(&self, user_id: i64, chat_id: i64) -> AppResult<()> {
        let packs = self.store.list_packs(user_id, None).await?;
        if packs.is_empty() {
            return self
                .transport
                .send_message(chat_id, "You have no packs yet. Use /create to get started.")
                .await;
        }

        let rows = packs
            .iter()
            .take(20)
            .map(|p| {
                vec![InlineKeyboardButton::callback(
                    format!("{} ({})", p.title, p.kind.as_str()),
                    format!("view|{}", p.pack_id),
                )]
            })
            .collect();
        self.transport
            .send_inline_keyboard(chat_id, "Your packs:", InlineKeyboardMarkup::rows(rows))
            .await
    }

    // ---- Content events ----

    async fn handle_text(&self, user_id: i64, chat_id: i64, text: String) -> AppResult<()> {
        if let Some(session) = self.sessions.current(user_id).await {
            return match session.state {
                FlowState::AwaitingName { kind, paid } => {
                    self.create_receive_name(user_id, chat_id, kind, paid, &text)
                        .await
                }
                FlowState::AwaitingFirstItem {
                    kind, paid, name, title,
                } => {
                    // Text is only valid pack content for emoji packs.
                    if kind != PackKind::Emoji {
                        return self
                            .transport
                            .send_message(chat_id, "Send a sticker or photo for this pack.")
                            .await;
                    }
                    let asset = self
                        .render
                        .produce(user_id, Self::default_text_input(&text), kind)
                        .await?;
                    self.commit_create(
                        user_id,
                        chat_id,
                        kind,
                        paid,
                        name,
                        title,
                        NewItem {
                            content_ref: asset.content_ref,
                            emoji: None,
                            format: asset.format,
                        },
                    )
                    .await
                }
                FlowState::AwaitingRenderInput => {
                    self.sessions
                        .transition(
                            user_id,
                            FlowState::CollectingText {
                                lines: vec![text],
                            },
                        )
                        .await?;
                    self.prompt_text_lines(chat_id).await
                }
                FlowState::CollectingText { mut lines } => {
                    lines.push(text);
                    self.sessions
                        .transition(user_id, FlowState::CollectingText { lines })
                        .await?;
                    self.prompt_text_lines(chat_id).await
                }
                _ => {
                    self.sessions.touch(user_id).await;
                    self.transport
                        .send_message(chat_id, "I was expecting something else here; see the last prompt, or /cancel.")
                        .await
                }
            };
        }

        // No open flow: text starts an item-first add into an emoji pack.
        // Check for a destination before spending a render.
        let packs = self.store.list_packs(user_id, Some(PackKind::Emoji)).await?;
        if packs.is_empty() {
            return self
                .transport
                .send_message(chat_id, "You have no emoji packs. Use /create emoji first.")
                .await;
        }
        let asset = self
            .render
            .produce(user_id, Self::default_text_input(&text), PackKind::Emoji)
            .await?;
        self.start_add_item(
            user_id,
            chat_id,
            PendingItem {
                content_ref: asset.content_ref,
                emoji: None,
                kind: PackKind::Emoji,
                animated: false,
            },
        )
        .await
    }

    fn default_text_input(text: &str) -> RenderInput {
        RenderInput::Text {
            lines: text.lines().map(str::to_string).collect(),
            font: FontStyle::Classic,
            background: BackgroundMode::None,
        }
    }

    async fn prompt_text_lines(&self, chat_id: i64) -> AppResult<()> {
        let keyboard = InlineKeyboardMarkup::rows(vec![vec![
            InlineKeyboardButton::callback("Add another line", "line|more"),
            InlineKeyboardButton::callback("Done", "line|done"),
        ]]);
        self.transport
            .send_inline_keyboard(chat_id, "Line added. More lines, or done?", keyboard)
            .await
    }

    async fn handle_sticker(&self, user_id: i64, chat_id: i64, sticker: TgSticker) -> AppResult<()> {
        let item = PendingItem {
            content_ref: sticker.file_id.clone(),
            emoji: sticker.emoji.clone(),
            kind: if sticker.is_custom_emoji() {
                PackKind::Emoji
            } else {
                PackKind::Sticker
            },
            animated: sticker.animated(),
        };

        if let Some(session) = self.sessions.current(user_id).await {
            return match session.state {
                FlowState::AwaitingFirstItem {
                    kind, paid, name, title,
                } => {
                    if item.kind != kind {
                        let wanted = match kind {
                            PackKind::Emoji => "a custom emoji (not a sticker)",
                            _ => "a sticker (not a custom emoji)",
                        };
                        return self
                            .transport
                            .send_message(chat_id, &format!("Please send {} for this pack.", wanted))
                            .await;
                    }
                    let new_item = self.finished_item(user_id, &item, kind).await?;
                    self.commit_create(user_id, chat_id, kind, paid, name, title, new_item)
                        .await
                }
                FlowState::AwaitingRenderInput => {
                    if !sticker.is_custom_emoji() {
                        self.sessions.touch(user_id).await;
                        return self
                            .transport
                            .send_message(chat_id, "Send text, a photo, or a custom emoji.")
                            .await;
                    }
                    self.sessions
                        .transition(
                            user_id,
                            FlowState::AwaitingBackground {
                                source: RenderSource::Emoji {
                                    animated: sticker.animated(),
                                    file_id: sticker.file_id,
                                },
                            },
                        )
                        .await?;
                    self.prompt_background(chat_id).await
                }
                FlowState::AwaitingTargetItem => {
                    self.remove_receive_item(user_id, chat_id, item).await
                }
                _ => {
                    self.sessions.touch(user_id).await;
                    self.transport
                        .send_message(chat_id, "I was expecting something else here; see the last prompt, or /cancel.")
                        .await
                }
            };
        }

        self.start_add_item(user_id, chat_id, item).await
    }

    async fn handle_photo(&self, user_id: i64, chat_id: i64, file_id: String) -> AppResult<()> {
        if let Some(session) = self.sessions.current(user_id).await {
            return match session.state {
                FlowState::AwaitingFirstItem {
                    kind, paid, name, title,
                } => {
                    if kind != PackKind::Sticker {
                        return self
                            .transport
                            .send_message(chat_id, "Photos only work for sticker packs; send a custom emoji.")
                            .await;
                    }
                    let new_item = NewItem {
                        content_ref: file_id,
                        emoji: None,
                        format: crate::models::AssetFormat::Static,
                    };
                    self.commit_create(user_id, chat_id, kind, paid, name, title, new_item)
                        .await
                }
                FlowState::AwaitingRenderInput => {
                    self.sessions
                        .transition(
                            user_id,
                            FlowState::AwaitingBackground {
                                source: RenderSource::Photo { file_id },
                            },
                        )
                        .await?;
                    self.prompt_background(chat_id).await
                }
                FlowState::AwaitingTargetItem => {
                    self.remove_receive_item(
                        user_id,
                        chat_id,
                        PendingItem {
                            content_ref: file_id,
                            emoji: None,
                            kind: PackKind::Sticker,
                            animated: false,
                        },
                    )
                    .await
                }
                _ => {
                    self.sessions.touch(user_id).await;
                    self.transport
                        .send_message(chat_id, "I was expecting something else here; see the last prompt, or /cancel.")
                        .await
                }
            };
        }

        self.start_add_item(
            user_id,
            chat_id,
            PendingItem {
                content_ref: file_id,
                emoji: None,
                kind: PackKind::Sticker,
                animated: false,
            },
        )
        .await
    }

    async fn handle_document(&self, user_id: i64, chat_id: i64, file_id: String) -> AppResult<()> {
        let content = self.transport.download_file(&file_id).await?;
        let snapshot = BackupService::parse(&content)?;

        // Non-owners may only restore their own slice.
        let owner = self
            .store
            .policy()
            .authorizer()
            .is_authorized(user_id, Capability::OperatorSettings);
        if !owner {
            let foreign = snapshot
                .packs
                .iter()
                .any(|p| p.owner_user_id != user_id)
                || snapshot.users.iter().any(|u| u.user_id != user_id);
            if foreign {
                return Err(AppError::InvalidSnapshot(
                    "snapshot contains data belonging to other users".into(),
                ));
            }
        }

        self.backup.import(&snapshot).await?;
        self.transport
            .send_message(chat_id, "Import complete.")
            .await
    }

    // ---- Create flow steps ----

    async fn create_receive_name(
        &self,
        user_id: i64,
        chat_id: i64,
        kind: PackKind,
        paid: bool,
        name: &str,
    ) -> AppResult<()> {
        let name = name.trim();
        if self.store.policy().validate_name(name, paid).is_err() {
            // Invalid input reprompts; the flow stays where it is.
            self.sessions.touch(user_id).await;
            return Err(AppError::NameLengthInvalid);
        }

        // Free packs carry the bot suffix, which keeps the free and paid
        // naming scopes disjoint.
        let slug = if paid {
            normalize_pack_name(name)
        } else {
            normalize_pack_name(&format!("{}_by_{}", name, self.bot_username))
        };

        self.sessions
            .transition(
                user_id,
                FlowState::AwaitingFirstItem {
                    kind,
                    paid,
                    name: slug,
                    title: name.to_string(),
                },
            )
            .await?;
        self.transport
            .send_message(chat_id, "Now send the first item: a single emoji or sticker.")
            .await
    }

    async fn finished_item(
        &self,
        user_id: i64,
        item: &PendingItem,
        target_kind: PackKind,
    ) -> AppResult<NewItem> {
        let input = match item.kind {
            PackKind::Emoji | PackKind::AdaptiveEmoji => RenderInput::EmojiRef {
                file_id: item.content_ref.clone(),
                animated: item.animated,
            },
            PackKind::Sticker => RenderInput::StickerRef {
                file_id: item.content_ref.clone(),
                animated: item.animated,
            },
        };
        let asset = self.render.produce(user_id, input, target_kind).await?;
        Ok(NewItem {
            content_ref: asset.content_ref,
            emoji: item.emoji.clone(),
            format: asset.format,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_create(
        &self,
        user_id: i64,
        chat_id: i64,
        kind: PackKind,
        paid: bool,
        slug: String,
        title: String,
        first: NewItem,
    ) -> AppResult<()> {
        let store = self.store.clone();
        self.run_commit(user_id, chat_id, async move {
            let pack = store
                .create_pack(user_id, kind, &slug, &title, paid, first)
                .await?;
            Ok(format!("Pack created! {}", pack.external_link))
        })
        .await
    }

    // ---- Add / remove flow steps ----

    async fn start_add_item(
        &self,
        user_id: i64,
        chat_id: i64,
        item: PendingItem,
    ) -> AppResult<()> {
        let packs = self.store.list_packs(user_id, Some(item.kind)).await?;
        if packs.is_empty() {
            return self
                .transport
                .send_message(
                    chat_id,
                    &format!(
                        "You have no {} packs. Use /create {} first.",
                        item.kind.as_str(),
                        item.kind.as_str()
                    ),
                )
                .await;
        }

        self.sessions
            .begin(
                user_id,
                chat_id,
                FlowCategory::AddItem,
                FlowState::AwaitingPackSelection {
                    intent: SelectionIntent::AddItem(item),
                },
            )
            .await?;

        let keyboard = Self::packs_keyboard(&packs);
        self.transport
            .send_inline_keyboard(chat_id, "Choose a pack to add this to:", keyboard)
            .await
    }

    async fn remove_receive_item(
        &self,
        user_id: i64,
        chat_id: i64,
        item: PendingItem,
    ) -> AppResult<()> {
        let packs = self.store.list_packs(user_id, Some(item.kind)).await?;
        if packs.is_empty() {
            self.sessions.cancel(user_id).await;
            return self
                .transport
                .send_message(chat_id, "You have no packs that could hold this item.")
                .await;
        }

        self.sessions
            .transition(
                user_id,
                FlowState::AwaitingPackSelection {
                    intent: SelectionIntent::RemoveItem {
                        content_ref: item.content_ref,
                    },
                },
            )
            .await?;

        let keyboard = Self::packs_keyboard(&packs);
        self.transport
            .send_inline_keyboard(chat_id, "Which pack is it in?", keyboard)
            .await
    }

    // ---- Callbacks ----

    async fn handle_callback(&self, user_id: i64, chat_id: i64, data: &str) -> AppResult<()> {
        let (verb, arg) = data.split_once('|').unwrap_or((data, ""));

        match verb {
            "kind" => self.callback_kind(user_id, chat_id, arg).await,
            "pick" => self.callback_pick(user_id, chat_id, arg).await,
            "confirm" => self.callback_confirm(user_id, chat_id, arg).await,
            "line" => self.callback_line(user_id, chat_id, arg).await,
            "font" => self.callback_font(user_id, chat_id, arg).await,
            "bg" => self.callback_background(user_id, chat_id, arg).await,
            "view" => self.callback_view(user_id, chat_id, arg).await,
            "flow" if arg == "cancel" => {
                self.sessions.cancel(user_id).await;
                self.transport.send_message(chat_id, "Canceled.").await
            }
            _ => Ok(()),
        }
    }

    async fn callback_kind(&self, user_id: i64, chat_id: i64, arg: &str) -> AppResult<()> {
        let session = self
            .sessions
            .current(user_id)
            .await
            .ok_or(AppError::NoActiveFlow)?;
        if !matches!(session.state, FlowState::AwaitingPackKind) {
            return Ok(());
        }

        let kind = match arg {
            "emoji" => PackKind::Emoji,
            "sticker" => PackKind::Sticker,
            _ => return Ok(()),
        };
        let user = self.store.get_user(user_id).await?;
        let paid = user.tier.is_paid();

        self.sessions
            .transition(user_id, FlowState::AwaitingName { kind, paid })
            .await?;
        self.prompt_name(chat_id, paid).await
    }

    async fn callback_pick(&self, user_id: i64, chat_id: i64, arg: &str) -> AppResult<()> {
        let session = self
            .sessions
            .current(user_id)
            .await
            .ok_or(AppError::NoActiveFlow)?;
        let intent = match session.state {
            FlowState::AwaitingPackSelection { intent } => intent,
            _ => return Ok(()),
        };

        let pack_id: i64 = arg
            .parse()
            .map_err(|_| AppError::Validation("Invalid selection.".into()))?;
        let pack = self.store.get_pack(pack_id).await?;
        if pack.owner_user_id != user_id {
            return Err(AppError::PackNotFound);
        }

        let (action, prompt) = match intent {
            SelectionIntent::AddItem(item) => {
                // Early capacity feedback; re-checked again at commit.
                self.store.policy().check_add(&pack)?;
                (
                    ConfirmAction::AddItem { pack_id, item },
                    format!("Add this to \"{}\"?", pack.title),
                )
            }
            SelectionIntent::RemoveItem { content_ref } => (
                ConfirmAction::RemoveItem {
                    pack_id,
                    content_ref,
                },
                format!("Remove that item from \"{}\"?", pack.title),
            ),
            SelectionIntent::DeletePack { .. } => (
                ConfirmAction::DeletePack { pack_id },
                format!(
                    "Delete \"{}\" and its {} items from Telegram? This cannot be undone.",
                    pack.title, pack.item_count
                ),
            ),
        };

        self.sessions
            .transition(user_id, FlowState::AwaitingConfirmation { action })
            .await?;

        let keyboard = InlineKeyboardMarkup::rows(vec![vec![
            InlineKeyboardButton::callback("Confirm", "confirm|yes"),
            InlineKeyboardButton::callback("Cancel", "confirm|no"),
        ]]);
        self.transport
            .send_inline_keyboard(chat_id, &prompt, keyboard)
            .await
    }

    async fn callback_confirm(&self, user_id: i64, chat_id: i64, arg: &str) -> AppResult<()> {
        let session = self
            .sessions
            .current(user_id)
            .await
            .ok_or(AppError::NoActiveFlow)?;
        let action = match session.state {
            FlowState::AwaitingConfirmation { action } => action,
            _ => return Ok(()),
        };

        match arg {
            "yes" => {}
            "no" => {
                self.sessions.cancel(user_id).await;
                return self.transport.send_message(chat_id, "Canceled.").await;
            }
            _ => {
                // Anything but an explicit affirmative reprompts; deletion
                // never proceeds by default.
                self.sessions.touch(user_id).await;
                return self
                    .transport
                    .send_message(chat_id, "Please confirm or cancel.")
                    .await;
            }
        }

        let store = self.store.clone();
        match action {
            ConfirmAction::AddItem { pack_id, item } => {
                let pack = self.store.get_pack(pack_id).await?;
                let render_item = self.finished_item(user_id, &item, pack.kind).await?;
                self.run_commit(user_id, chat_id, async move {
                    store.add_item(pack_id, render_item).await?;
                    Ok("Added!".to_string())
                })
                .await
            }
            ConfirmAction::RemoveItem {
                pack_id,
                content_ref,
            } => {
                self.run_commit(user_id, chat_id, async move {
                    store.remove_item(pack_id, &content_ref).await?;
                    Ok("Removed.".to_string())
                })
                .await
            }
            ConfirmAction::DeletePack { pack_id } => {
                self.run_commit(user_id, chat_id, async move {
                    store.delete_pack(pack_id).await?;
                    Ok("Pack deleted.".to_string())
                })
                .await
            }
        }
    }

    async fn callback_line(&self, user_id: i64, chat_id: i64, arg: &str) -> AppResult<()> {
        let session = self
            .sessions
            .current(user_id)
            .await
            .ok_or(AppError::NoActiveFlow)?;
        let lines = match session.state {
            FlowState::CollectingText { lines } => lines,
            _ => return Ok(()),
        };

        match arg {
            "more" => {
                self.sessions.touch(user_id).await;
                self.transport
                    .send_message(chat_id, "Send the next line.")
                    .await
            }
            "done" => {
                self.sessions
                    .transition(user_id, FlowState::AwaitingFont { lines })
                    .await?;
                self.prompt_font(chat_id).await
            }
            _ => Ok(()),
        }
    }

    async fn prompt_font(&self, chat_id: i64) -> AppResult<()> {
        let buttons: Vec<InlineKeyboardButton> = FontStyle::ALL
            .iter()
            .enumerate()
            .map(|(idx, f)| InlineKeyboardButton::callback(f.as_str(), format!("font|{}", idx)))
            .collect();
        let rows = buttons.chunks(3).map(|c| c.to_vec()).collect();
        self.transport
            .send_inline_keyboard(chat_id, "Choose a font:", InlineKeyboardMarkup::rows(rows))
            .await
    }

    async fn callback_font(&self, user_id: i64, chat_id: i64, arg: &str) -> AppResult<()> {
        let session = self
            .sessions
            .current(user_id)
            .await
            .ok_or(AppError::NoActiveFlow)?;
        let lines = match session.state {
            FlowState::AwaitingFont { lines } => lines,
            _ => return Ok(()),
        };

        let font = arg
            .parse::<usize>()
            .ok()
            .and_then(FontStyle::from_index)
            .ok_or_else(|| AppError::Validation("Invalid font selection.".into()))?;

        self.sessions
            .transition(
                user_id,
                FlowState::AwaitingBackground {
                    source: RenderSource::Text { lines, font },
                },
            )
            .await?;
        self.prompt_background(chat_id).await
    }

    async fn prompt_background(&self, chat_id: i64) -> AppResult<()> {
        let keyboard = InlineKeyboardMarkup::rows(vec![
            vec![InlineKeyboardButton::callback("No background", "bg|none")],
            vec![InlineKeyboardButton::callback(
                "50% transparent",
                "bg|half_transparent",
            )],
            vec![InlineKeyboardButton::callback("Background only", "bg|fill_only")],
        ]);
        self.transport
            .send_inline_keyboard(chat_id, "Choose a background:", keyboard)
            .await
    }

    async fn callback_background(&self, user_id: i64, chat_id: i64, arg: &str) -> AppResult<()> {
        let session = self
            .sessions
            .current(user_id)
            .await
            .ok_or(AppError::NoActiveFlow)?;
        let source = match session.state {
            FlowState::AwaitingBackground { source } => source,
            _ => return Ok(()),
        };

        let mode = BackgroundMode::parse(arg)
            .ok_or_else(|| AppError::Validation("Invalid background selection.".into()))?;

        // Feasibility gate: an infeasible mode sends the user back to
        // background selection, never out of the flow.
        if self.render.validate_background(mode).is_err() {
            self.sessions.touch(user_id).await;
            self.transport
                .send_message(chat_id, &AppError::UnsupportedBackground.user_message())
                .await?;
            return self.prompt_background(chat_id).await;
        }

        let input = match source {
            RenderSource::Text { lines, font } => RenderInput::Text {
                lines,
                font,
                background: mode,
            },
            RenderSource::Photo { file_id } => RenderInput::Photo { file_id },
            RenderSource::Emoji { file_id, animated } => RenderInput::EmojiRef { file_id, animated },
        };

        self.commit_adaptive(user_id, chat_id, input).await
    }

    async fn commit_adaptive(
        &self,
        user_id: i64,
        chat_id: i64,
        input: RenderInput,
    ) -> AppResult<()> {
        let store = self.store.clone();
        let render = self.render.clone();
        let bot_username = self.bot_username.clone();

        self.run_commit(user_id, chat_id, async move {
            let asset = render
                .produce(user_id, input, PackKind::AdaptiveEmoji)
                .await?;
            let item = NewItem {
                content_ref: asset.content_ref,
                emoji: None,
                format: asset.format,
            };

            let user = store.get_user(user_id).await?;
            match user.adaptive_pack_id {
                Some(pack_id) => {
                    store.add_item(pack_id, item).await?;
                    Ok("Added to your adaptive emoji pack.".to_string())
                }
                None => {
                    let slug = normalize_pack_name(&format!(
                        "adaptive_{}_by_{}",
                        user_id, bot_username
                    ));
                    let pack = store
                        .create_pack(
                            user_id,
                            PackKind::AdaptiveEmoji,
                            &slug,
                            &format!("Adaptive {}", user_id),
                            true,
                            item,
                        )
                        .await?;
                    store.set_adaptive_pack(user_id, pack.pack_id).await?;
                    Ok(format!("Adaptive pack created: {}", pack.external_link))
                }
            }
        })
        .await
    }

    async fn callback_view(&self, user_id: i64, chat_id: i64, arg: &str) -> AppResult<()> {
        let pack_id: i64 = arg
            .parse()
            .map_err(|_| AppError::Validation("Invalid selection.".into()))?;
        let pack = self.store.get_pack(pack_id).await?;
        if pack.owner_user_id != user_id {
            return Err(AppError::PackNotFound);
        }

        let info = format!(
            "Title: {}\nKind: {}\nPaid pack: {}\nItems: {}\nLink: {}",
            pack.title,
            pack.kind.as_str(),
            if pack.is_paid_pack { "yes" } else { "no" },
            pack.item_count,
            pack.external_link
        );
        let keyboard = InlineKeyboardMarkup::rows(vec![vec![InlineKeyboardButton::link(
            "Open",
            pack.external_link.clone(),
        )]]);
        self.transport
            .send_inline_keyboard(chat_id, &info, keyboard)
            .await
    }

    // ---- Payments ----

    async fn handle_payment(&self, user_id: i64, chat_id: i64, payload: &str) -> AppResult<()> {
        let (paying_user, purpose) = match PaymentsService::parse(payload) {
            Some(parsed) => parsed,
            None => {
                tracing::warn!(user_id, payload, "unparseable payment payload");
                return Ok(());
            }
        };

        match purpose {
            PaymentPurpose::Bpack { .. } => {
                self.store.upgrade_to_paid(paying_user).await?;

                if self.payments.upgrades_open_flow() {
                    let upgraded = self
                        .sessions
                        .mutate_state(paying_user, |state| match state {
                            FlowState::AwaitingName { paid, .. }
                            | FlowState::AwaitingFirstItem { paid, .. } => *paid = true,
                            _ => {}
                        })
                        .await;
                    if upgraded {
                        tracing::info!(user_id = paying_user, "open create flow upgraded to paid");
                    }
                }

                self.transport
                    .send_message(chat_id, "Paid tier unlocked. Use /create to make a paid pack.")
                    .await
            }
            PaymentPurpose::Apack => {
                self.transport
                    .send_message(chat_id, "Payment received. Use /acr to add adaptive emoji.")
                    .await
            }
            PaymentPurpose::Duplicate { source } => {
                self.commit_duplicate(paying_user, chat_id, source).await
            }
        }
    }

    async fn commit_duplicate(
        &self,
        user_id: i64,
        chat_id: i64,
        source_name: String,
    ) -> AppResult<()> {
        let store = self.store.clone();
        let platform = self.platform.clone();
        let bot_username = self.bot_username.clone();

        // The session may have expired between invoice and payment; the
        // purchase still completes, just without flow bookkeeping.
        let has_session = self.sessions.current(user_id).await.is_some();

        let op = async move {
            let source = platform.get_pack(&source_name).await?;
            let nonce: u32 = rand::thread_rng().gen();
            let slug = normalize_pack_name(&format!(
                "dup_{}_{}_by_{}",
                user_id, nonce, bot_username
            ));
            let pack = store
                .duplicate_pack(user_id, &source, &slug, &format!("Duplicate of {}", source_name))
                .await?;
            Ok(format!("Duplicated: {}", pack.external_link))
        };

        if has_session {
            self.run_commit(user_id, chat_id, op).await
        } else {
            let msg = op.await?;
            self.transport.send_message(chat_id, &msg).await
        }
    }

    // ---- Shared plumbing ----

    /// Drive a flow through committing: success reaches `done` and replies;
    /// failure reaches `failed` and the error is reported to the user by
    /// the caller's error path.
    async fn run_commit<F>(&self, user_id: i64, chat_id: i64, op: F) -> AppResult<()>
    where
        F: Future<Output = AppResult<String>>,
    {
        self.sessions
            .transition(user_id, FlowState::Committing)
            .await?;

        match op.await {
            Ok(message) => {
                self.sessions.transition(user_id, FlowState::Done).await?;
                self.transport.send_message(chat_id, &message).await
            }
            Err(e) => {
                let _ = self.sessions.transition(user_id, FlowState::Failed).await;
                Err(e)
            }
        }
    }

    fn packs_keyboard(packs: &[crate::models::Pack]) -> InlineKeyboardMarkup {
        let mut rows: Vec<Vec<InlineKeyboardButton>> = packs
            .iter()
            .take(10)
            .map(|p| {
                vec![InlineKeyboardButton::callback(
                    p.title.clone(),
                    format!("pick|{}", p.pack_id),
                )]
            })
            .collect();
        rows.push(vec![InlineKeyboardButton::callback("Cancel", "flow|cancel")]);
        InlineKeyboardMarkup::rows(rows)
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}
