//! Per-user conversation flow state.
//!
//! Every multi-step flow lives in an explicit [`Session`] keyed by
//! `(user_id, FlowCategory)`; sessions are created on flow-start and removed
//! on a terminal state. Transition legality is checked in one place so a
//! broken handler cannot silently jump a flow somewhere illegal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FontStyle, PackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCategory {
    Create,
    Adaptive,
    AddItem,
    RemoveItem,
    DeletePack,
    Duplicate,
}

impl fmt::Display for FlowCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Adaptive => "adaptive",
            Self::AddItem => "add_item",
            Self::RemoveItem => "remove_item",
            Self::DeletePack => "delete_pack",
            Self::Duplicate => "duplicate",
        };
        f.write_str(s)
    }
}

/// An inbound emoji/sticker/photo captured as a prospective pack item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    pub content_ref: String,
    pub emoji: Option<String>,
    pub kind: PackKind,
    pub animated: bool,
}

/// What a pack-selection keyboard was shown for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionIntent {
    AddItem(PendingItem),
    RemoveItem { content_ref: String },
    DeletePack { kind: PackKind },
}

/// A mutation the user still has to explicitly confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    AddItem { pack_id: i64, item: PendingItem },
    RemoveItem { pack_id: i64, content_ref: String },
    DeletePack { pack_id: i64 },
}

/// Source material sitting in the adaptive flow when the background mode is
/// being chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderSource {
    Text { lines: Vec<String>, font: FontStyle },
    Photo { file_id: String },
    Emoji { file_id: String, animated: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowState {
    // Create flow
    AwaitingPackKind,
    AwaitingName {
        kind: PackKind,
        paid: bool,
    },
    AwaitingFirstItem {
        kind: PackKind,
        paid: bool,
        name: String,
        title: String,
    },

    // Adaptive render subflow
    AwaitingRenderInput,
    CollectingText {
        lines: Vec<String>,
    },
    AwaitingFont {
        lines: Vec<String>,
    },
    AwaitingBackground {
        source: RenderSource,
    },

    // Add / remove / delete flows
    AwaitingTargetItem,
    AwaitingPackSelection {
        intent: SelectionIntent,
    },
    AwaitingConfirmation {
        action: ConfirmAction,
    },

    // Duplicate flow
    AwaitingPayment {
        source_name: String,
    },

    Committing,
    Done,
    Cancelled,
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AwaitingPackKind => "awaiting_pack_kind",
            Self::AwaitingName { .. } => "awaiting_name",
            Self::AwaitingFirstItem { .. } => "awaiting_first_item",
            Self::AwaitingRenderInput => "awaiting_render_input",
            Self::CollectingText { .. } => "collecting_text",
            Self::AwaitingFont { .. } => "awaiting_font",
            Self::AwaitingBackground { .. } => "awaiting_background",
            Self::AwaitingTargetItem => "awaiting_target_item",
            Self::AwaitingPackSelection { .. } => "awaiting_pack_selection",
            Self::AwaitingConfirmation { .. } => "awaiting_confirmation",
            Self::AwaitingPayment { .. } => "awaiting_payment",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Legal edges of the flow state graph. Reprompts keep the current state and
/// never go through here; a cancel signal is legal from any suspended state.
pub fn is_legal_transition(from: &FlowState, to: &FlowState) -> bool {
    use FlowState::*;

    if matches!(to, Cancelled) && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (AwaitingPackKind, AwaitingName { .. })
            | (AwaitingName { .. }, AwaitingFirstItem { .. })
            | (AwaitingFirstItem { .. }, Committing)
            | (AwaitingRenderInput, CollectingText { .. })
            | (AwaitingRenderInput, AwaitingBackground { .. })
            | (CollectingText { .. }, CollectingText { .. })
            | (CollectingText { .. }, AwaitingFont { .. })
            | (AwaitingFont { .. }, AwaitingBackground { .. })
            // Infeasible background reprompts by re-entering the same station
            | (AwaitingBackground { .. }, AwaitingBackground { .. })
            | (AwaitingBackground { .. }, Committing)
            | (AwaitingTargetItem, AwaitingPackSelection { .. })
            | (AwaitingPackSelection { .. }, AwaitingConfirmation { .. })
            | (AwaitingConfirmation { .. }, Committing)
            | (AwaitingPayment { .. }, Committing)
            | (Committing, Done)
            | (Committing, Failed)
    )
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub chat_id: i64,
    pub category: FlowCategory,
    pub state: FlowState,
    pub started_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: i64, chat_id: i64, category: FlowCategory, state: FlowState) -> Self {
        let now = Utc::now();
        Session {
            user_id,
            chat_id,
            category,
            state,
            started_at: now,
            touched_at: now,
        }
    }
}
