use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub render: RenderConfig,
    pub limits: LimitsConfig,
    pub pricing: PricingConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub bot_username: String,
    pub owner_id: i64,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub service_url: String,
    pub supports_transparency: bool,
    pub canvas_size: u32,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub free_max_stickers: i64,
    pub free_max_emojis: i64,
    pub paid_max_items: i64,
    pub free_name_min_len: usize,
    pub free_name_max_len: usize,
    pub paid_name_min_len: usize,
    pub paid_name_max_len: usize,
    pub free_pack_allowance: i64,
    pub session_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PricingConfig {
    /// Prices in Telegram Stars (XTR).
    pub bpack_emoji: i64,
    pub bpack_sticker: i64,
    pub apack: i64,
    pub duplicate: i64,
    pub payment_upgrades_open_flow: bool,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub dir: String,
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(8080),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            },
            database: DatabaseConfig {
                path: env::var("DB_PATH").unwrap_or_else(|_| "packsmith.db".to_string()),
                max_connections: env::var("DB_MAX_CONNS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5),
            },
            telegram: TelegramConfig {
                bot_token: env::var("BOT_TOKEN").unwrap_or_default(),
                bot_username: env::var("BOT_USERNAME")
                    .unwrap_or_else(|_| "packsmith_bot".to_string()),
                owner_id: env::var("OWNER_ID")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0),
                webhook_secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
                api_base: env::var("TELEGRAM_API_BASE")
                    .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            },
            render: RenderConfig {
                service_url: env::var("RENDER_SERVICE_URL")
                    .unwrap_or_else(|_| "http://localhost:9100".to_string()),
                supports_transparency: env::var("RENDER_SUPPORTS_TRANSPARENCY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(true),
                canvas_size: env::var("RENDER_CANVAS_SIZE")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(512),
            },
            limits: LimitsConfig {
                free_max_stickers: env::var("FREE_MAX_STICKERS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(30),
                free_max_emojis: env::var("FREE_MAX_EMOJIS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(40),
                paid_max_items: env::var("PAID_MAX_ITEMS")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(120),
                free_name_min_len: 4,
                free_name_max_len: 12,
                paid_name_min_len: 1,
                paid_name_max_len: 32,
                free_pack_allowance: env::var("FREE_PACK_ALLOWANCE")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(1),
                session_ttl: Duration::from_secs(
                    env::var("SESSION_TTL_SECS")
                        .ok()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(6 * 60 * 60), // 6 hours
                ),
            },
            pricing: PricingConfig {
                bpack_emoji: env::var("PRICE_BPACK_EMOJI_XTR")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(35),
                bpack_sticker: env::var("PRICE_BPACK_STICKER_XTR")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(25),
                apack: env::var("PRICE_APACK_XTR")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(100),
                duplicate: env::var("PRICE_DUPLICATE_XTR")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(30),
                payment_upgrades_open_flow: env::var("PAYMENT_UPGRADES_OPEN_FLOW")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(false),
            },
            backup: BackupConfig {
                dir: env::var("BACKUP_DIR").unwrap_or_else(|_| "backups".to_string()),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.database.path)
    }
}
