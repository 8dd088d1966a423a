//! Stars invoice payloads and purchase routing.
//!
//! The invoice payload carries everything the payment callback needs:
//! `purpose:user_id:nonce[:arg]`. Pre-checkout approves only payloads this
//! module can parse back.

use rand::Rng;

use crate::config::PricingConfig;
use crate::models::PackKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentPurpose {
    /// Unlock the paid tier for pack creation of the given kind.
    Bpack { kind: PackKind },
    /// Adaptive pack entitlement.
    Apack,
    /// Duplicate the named source pack after payment.
    Duplicate { source: String },
}

#[derive(Debug, Clone)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    pub payload: String,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct PaymentsService {
    pricing: PricingConfig,
}

impl PaymentsService {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    pub fn upgrades_open_flow(&self) -> bool {
        self.pricing.payment_upgrades_open_flow
    }

    pub fn invoice(&self, user_id: i64, purpose: &PaymentPurpose) -> Invoice {
        let nonce: u32 = rand::thread_rng().gen();
        match purpose {
            PaymentPurpose::Bpack { kind } => {
                let amount = match kind {
                    PackKind::Sticker => self.pricing.bpack_sticker,
                    _ => self.pricing.bpack_emoji,
                };
                Invoice {
                    title: format!("Buy {} pack tier", kind.as_str()),
                    description: format!("Unlock paid {} packs", kind.as_str()),
                    payload: format!("bpack:{}:{}:{}", user_id, nonce, kind.as_str()),
                    amount,
                }
            }
            PaymentPurpose::Apack => Invoice {
                title: "Adaptive Pack".into(),
                description: "Create an adaptive emoji pack".into(),
                payload: format!("apack:{}:{}", user_id, nonce),
                amount: self.pricing.apack,
            },
            PaymentPurpose::Duplicate { source } => Invoice {
                title: "Duplicate Pack".into(),
                description: "Duplicate the target pack into your account".into(),
                payload: format!("duplicate:{}:{}:{}", user_id, nonce, source),
                amount: self.pricing.duplicate,
            },
        }
    }

    /// Decode a payload back into `(paying_user, purpose)`.
    pub fn parse(payload: &str) -> Option<(i64, PaymentPurpose)> {
        let mut parts = payload.splitn(4, ':');
        let purpose = parts.next()?;
        let user_id: i64 = parts.next()?.parse().ok()?;
        let _nonce = parts.next()?;
        let arg = parts.next();

        match purpose {
            "bpack" => {
                let kind = PackKind::parse(arg?)?;
                Some((user_id, PaymentPurpose::Bpack { kind }))
            }
            "apack" => Some((user_id, PaymentPurpose::Apack)),
            "duplicate" => {
                let source = arg?.to_string();
                if source.is_empty() {
                    return None;
                }
                Some((user_id, PaymentPurpose::Duplicate { source }))
            }
            _ => None,
        }
    }

    /// Pre-checkout gate: only payloads we issued are payable.
    pub fn approve_pre_checkout(payload: &str) -> bool {
        Self::parse(payload).is_some()
    }
}
