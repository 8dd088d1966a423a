//! Shared doubles and builders for the integration suites: an in-memory
//! SQLite pool, a scripted platform pack API, a recording chat transport and
//! a fixed-output renderer.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use packsmith::config::{LimitsConfig, PricingConfig};
use packsmith::error::{AppError, AppResult};
use packsmith::models::{AssetFormat, RenderInput, RenderOptions};
use packsmith::platform::renderer::{RenderedBlob, Renderer};
use packsmith::platform::types::{
    InlineKeyboardMarkup, InputSticker, PlatformPack, TgSticker,
};
use packsmith::platform::{ChatTransport, PackPlatform};
use packsmith::services::backup::BackupService;
use packsmith::services::broadcast::BroadcastService;
use packsmith::services::flows::FlowController;
use packsmith::services::limits::{Authorizer, LimitPolicy};
use packsmith::services::packs::PackStore;
use packsmith::services::payments::PaymentsService;
use packsmith::services::render::RenderService;
use packsmith::services::sessions::SessionManager;

pub const OWNER_ID: i64 = 1000;
pub const BOT_USERNAME: &str = "packsmith_bot";

pub async fn test_pool() -> SqlitePool {
    // A single connection: every pooled connection to :memory: would
    // otherwise see its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

pub fn test_limits() -> LimitsConfig {
    LimitsConfig {
        free_max_stickers: 30,
        free_max_emojis: 40,
        paid_max_items: 120,
        free_name_min_len: 4,
        free_name_max_len: 12,
        paid_name_min_len: 1,
        paid_name_max_len: 32,
        free_pack_allowance: 1,
        session_ttl: std::time::Duration::from_secs(3600),
    }
}

pub fn test_pricing(upgrades_open_flow: bool) -> PricingConfig {
    PricingConfig {
        bpack_emoji: 35,
        bpack_sticker: 25,
        apack: 100,
        duplicate: 30,
        payment_upgrades_open_flow: upgrades_open_flow,
    }
}

// ---- Platform double ----

#[derive(Default)]
pub struct MockPlatform {
    pub packs: Mutex<HashMap<String, PlatformPack>>,
    failures: Mutex<HashSet<&'static str>>,
    calls: Mutex<Vec<&'static str>>,
    uploads: AtomicU64,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, method: &'static str) {
        self.failures.lock().unwrap().insert(method);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls_of(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| **m == method).count()
    }

    pub fn seed_pack(&self, name: &str, sticker_type: &str, item_count: usize) {
        let stickers = (0..item_count)
            .map(|i| TgSticker {
                file_id: format!("{}-s{}", name, i),
                sticker_type: sticker_type.to_string(),
                emoji: Some("\u{1F600}".into()),
                is_animated: false,
                is_video: false,
            })
            .collect();
        self.packs.lock().unwrap().insert(
            name.to_string(),
            PlatformPack {
                name: name.to_string(),
                title: name.to_string(),
                sticker_type: sticker_type.to_string(),
                stickers,
            },
        );
    }

    fn guard(&self, method: &'static str) -> AppResult<()> {
        self.calls.lock().unwrap().push(method);
        if self.failures.lock().unwrap().contains(method) {
            return Err(AppError::PlatformFailure(format!("{}: scripted failure", method)));
        }
        Ok(())
    }
}

#[async_trait]
impl PackPlatform for MockPlatform {
    async fn create_pack(
        &self,
        _owner_user_id: i64,
        name: &str,
        title: &str,
        pack_type: &str,
        first: &InputSticker,
    ) -> AppResult<()> {
        self.guard("create_pack")?;
        let sticker = TgSticker {
            file_id: first.sticker.clone(),
            sticker_type: pack_type.to_string(),
            emoji: first.emoji_list.first().cloned(),
            is_animated: first.format == "animated",
            is_video: first.format == "video",
        };
        self.packs.lock().unwrap().insert(
            name.to_string(),
            PlatformPack {
                name: name.to_string(),
                title: title.to_string(),
                sticker_type: pack_type.to_string(),
                stickers: vec![sticker],
            },
        );
        Ok(())
    }

    async fn add_item(&self, name: &str, sticker: &InputSticker) -> AppResult<()> {
        self.guard("add_item")?;
        let mut packs = self.packs.lock().unwrap();
        let pack = packs
            .get_mut(name)
            .ok_or_else(|| AppError::PlatformFailure(format!("no platform set '{}'", name)))?;
        pack.stickers.push(TgSticker {
            file_id: sticker.sticker.clone(),
            sticker_type: pack.sticker_type.clone(),
            emoji: sticker.emoji_list.first().cloned(),
            is_animated: sticker.format == "animated",
            is_video: sticker.format == "video",
        });
        Ok(())
    }

    async fn remove_item(&self, content_ref: &str) -> AppResult<()> {
        self.guard("remove_item")?;
        let mut packs = self.packs.lock().unwrap();
        for pack in packs.values_mut() {
            if let Some(pos) = pack.stickers.iter().position(|s| s.file_id == content_ref) {
                pack.stickers.remove(pos);
                return Ok(());
            }
        }
        Ok(())
    }

    async fn delete_pack(&self, name: &str) -> AppResult<()> {
        self.guard("delete_pack")?;
        self.packs.lock().unwrap().remove(name);
        Ok(())
    }

    async fn get_pack(&self, name: &str) -> AppResult<PlatformPack> {
        self.guard("get_pack")?;
        self.packs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::PlatformFailure(format!("no platform set '{}'", name)))
    }

    async fn upload_asset(
        &self,
        _owner_user_id: i64,
        _data: Bytes,
        _format: AssetFormat,
    ) -> AppResult<String> {
        self.guard("upload_asset")?;
        let n = self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(format!("upload-{}", n))
    }
}

// ---- Transport double ----

#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub invoices: Mutex<Vec<(i64, String)>>,
    pub files: Mutex<HashMap<String, Bytes>>,
    pub failing_user_ids: Mutex<HashSet<i64>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_file(&self, file_id: &str, content: impl Into<Bytes>) {
        self.files.lock().unwrap().insert(file_id.to_string(), content.into());
    }

    pub fn fail_sends_to(&self, user_id: i64) {
        self.failing_user_ids.lock().unwrap().insert(user_id);
    }

    pub fn last_message(&self) -> Option<String> {
        self.sent.lock().unwrap().last().map(|(_, m)| m.clone())
    }

    pub fn messages_for(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn last_invoice_payload(&self) -> Option<String> {
        self.invoices.lock().unwrap().last().map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<()> {
        if self.failing_user_ids.lock().unwrap().contains(&chat_id) {
            return Err(AppError::PlatformFailure("blocked".into()));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        _keyboard: InlineKeyboardMarkup,
    ) -> AppResult<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }

    async fn answer_callback(&self, _callback_id: &str) -> AppResult<()> {
        Ok(())
    }

    async fn send_invoice(
        &self,
        chat_id: i64,
        _title: &str,
        _description: &str,
        payload: &str,
        _amount: i64,
    ) -> AppResult<()> {
        self.invoices.lock().unwrap().push((chat_id, payload.to_string()));
        Ok(())
    }

    async fn answer_pre_checkout(
        &self,
        _query_id: &str,
        _ok: bool,
        _error_message: Option<&str>,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> AppResult<Bytes> {
        self.files
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .ok_or_else(|| AppError::PlatformFailure(format!("no file '{}'", file_id)))
    }
}

// ---- Renderer double ----

pub struct MockRenderer {
    pub transparency: bool,
}

#[async_trait]
impl Renderer for MockRenderer {
    fn supports_transparency(&self) -> bool {
        self.transparency
    }

    async fn render(&self, _input: &RenderInput, _options: RenderOptions) -> AppResult<RenderedBlob> {
        Ok(RenderedBlob {
            bytes: Bytes::from_static(b"rendered"),
            format: AssetFormat::Static,
        })
    }
}

// ---- Builders ----

pub fn test_policy() -> LimitPolicy {
    LimitPolicy::new(test_limits(), Authorizer::new(OWNER_ID))
}

pub async fn test_store(platform: Arc<MockPlatform>) -> (Arc<PackStore>, SqlitePool) {
    let pool = test_pool().await;
    let store = Arc::new(PackStore::new(pool.clone(), platform, test_policy(), 1));
    (store, pool)
}

/// Fully wired flow controller over the doubles.
pub struct TestBot {
    pub controller: FlowController,
    pub transport: Arc<MockTransport>,
    pub platform: Arc<MockPlatform>,
    pub store: Arc<PackStore>,
    pub pool: SqlitePool,
    _backup_dir: tempfile::TempDir,
}

pub async fn test_bot(transparency: bool, upgrades_open_flow: bool) -> TestBot {
    let platform = MockPlatform::new();
    let transport = MockTransport::new();
    let (store, pool) = test_store(platform.clone()).await;

    let sessions = Arc::new(SessionManager::new(std::time::Duration::from_secs(3600)));
    let render = Arc::new(RenderService::new(
        Arc::new(MockRenderer { transparency }),
        platform.clone(),
        512,
    ));
    let payments = PaymentsService::new(test_pricing(upgrades_open_flow));
    let backup_dir = tempfile::tempdir().expect("tempdir");
    let backup = Arc::new(BackupService::new(pool.clone(), backup_dir.path()));
    let broadcast = Arc::new(BroadcastService::new(store.clone(), transport.clone()));

    let controller = FlowController::new(
        store.clone(),
        sessions,
        render,
        payments,
        backup,
        broadcast,
        transport.clone(),
        platform.clone(),
        BOT_USERNAME.to_string(),
    );

    TestBot {
        controller,
        transport,
        platform,
        store,
        pool,
        _backup_dir: backup_dir,
    }
}

// ---- Event builders ----

use packsmith::platform::types::{EventPayload, InboundEvent};

pub fn cmd(user_id: i64, name: &str, args: &[&str]) -> InboundEvent {
    InboundEvent {
        user_id,
        chat_id: user_id,
        payload: EventPayload::Command {
            name: name.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        },
    }
}

pub fn text(user_id: i64, content: &str) -> InboundEvent {
    InboundEvent {
        user_id,
        chat_id: user_id,
        payload: EventPayload::Text(content.to_string()),
    }
}

pub fn custom_emoji(user_id: i64, file_id: &str) -> InboundEvent {
    InboundEvent {
        user_id,
        chat_id: user_id,
        payload: EventPayload::Sticker(TgSticker {
            file_id: file_id.to_string(),
            sticker_type: "custom_emoji".to_string(),
            emoji: Some("\u{1F600}".into()),
            is_animated: false,
            is_video: false,
        }),
    }
}

pub fn plain_sticker(user_id: i64, file_id: &str) -> InboundEvent {
    InboundEvent {
        user_id,
        chat_id: user_id,
        payload: EventPayload::Sticker(TgSticker {
            file_id: file_id.to_string(),
            sticker_type: "regular".to_string(),
            emoji: Some("\u{1F600}".into()),
            is_animated: false,
            is_video: false,
        }),
    }
}

pub fn callback(user_id: i64, data: &str) -> InboundEvent {
    InboundEvent {
        user_id,
        chat_id: user_id,
        payload: EventPayload::Callback {
            id: "cb-1".to_string(),
            data: data.to_string(),
        },
    }
}

pub fn payment(user_id: i64, payload: &str) -> InboundEvent {
    InboundEvent {
        user_id,
        chat_id: user_id,
        payload: EventPayload::PaymentSucceeded {
            payload: payload.to_string(),
        },
    }
}

pub fn document(user_id: i64, file_id: &str) -> InboundEvent {
    InboundEvent {
        user_id,
        chat_id: user_id,
        payload: EventPayload::Document {
            file_id: file_id.to_string(),
        },
    }
}
