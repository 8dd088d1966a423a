//! End-to-end flow scenarios driven through the controller: multi-step
//! conversations, concurrency guarantees, payments and authorization.

mod common;

use packsmith::models::{AssetFormat, PackKind, UserTier};
use packsmith::services::packs::NewItem;

use common::{
    callback, cmd, custom_emoji, document, payment, test_bot, text, BOT_USERNAME, OWNER_ID,
};

fn item(content_ref: &str) -> NewItem {
    NewItem {
        content_ref: content_ref.to_string(),
        emoji: Some("\u{1F600}".into()),
        format: AssetFormat::Static,
    }
}

#[tokio::test]
async fn free_user_create_scenario() {
    let bot = test_bot(true, false).await;
    let user = 5;

    bot.controller.handle(cmd(user, "create", &["emoji"])).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("name"));

    // Too short: reprompt in place, the flow survives.
    bot.controller.handle(text(user, "abc")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("length"));
    assert_eq!(bot.controller.sessions().open_count().await, 1);

    bot.controller.handle(text(user, "abcd")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("first item"));

    bot.controller.handle(custom_emoji(user, "em1")).await.unwrap();
    let reply = bot.transport.last_message().unwrap();
    assert!(
        reply.contains(&format!("https://t.me/addemoji/abcd_by_{}", BOT_USERNAME)),
        "unexpected reply: {}",
        reply
    );

    let packs = bot.store.list_packs(user, Some(PackKind::Emoji)).await.unwrap();
    assert_eq!(packs.len(), 1);
    assert_eq!(packs[0].item_count, 1);
    assert_eq!(bot.store.get_user(user).await.unwrap().free_pack_uses, 0);
    assert_eq!(bot.controller.sessions().open_count().await, 0);

    // Quota spent: the next create is refused at entry.
    bot.controller.handle(cmd(user, "create", &["emoji"])).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("quota"));
    assert_eq!(bot.controller.sessions().open_count().await, 0);
}

#[tokio::test]
async fn simultaneous_create_starts_leave_one_session() {
    let bot = test_bot(true, false).await;
    let user = 7;

    let (a, b) = tokio::join!(
        bot.controller.handle(cmd(user, "create", &["emoji"])),
        bot.controller.handle(cmd(user, "create", &["emoji"])),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(bot.controller.sessions().open_count().await, 1);
    let rejections = bot
        .transport
        .messages_for(user)
        .iter()
        .filter(|m| m.contains("flow in progress"))
        .count();
    assert_eq!(rejections, 1);
}

#[tokio::test]
async fn unsupported_background_reprompts_without_committing() {
    // Renderer without transparency support.
    let bot = test_bot(false, false).await;

    bot.controller.handle(cmd(OWNER_ID, "acr", &[])).await.unwrap();
    bot.controller.handle(text(OWNER_ID, "hi")).await.unwrap();
    bot.controller.handle(callback(OWNER_ID, "line|done")).await.unwrap();
    bot.controller.handle(callback(OWNER_ID, "font|0")).await.unwrap();

    bot.controller
        .handle(callback(OWNER_ID, "bg|half_transparent"))
        .await
        .unwrap();

    // Back at background selection; nothing rendered, nothing committed.
    let messages = bot.transport.messages_for(OWNER_ID);
    assert!(messages.iter().any(|m| m.contains("not supported")));
    assert!(messages.last().unwrap().contains("background"));
    assert_eq!(bot.controller.sessions().open_count().await, 1);
    assert_eq!(bot.platform.calls_of("upload_asset"), 0);
    assert_eq!(bot.platform.calls_of("create_pack"), 0);

    // A feasible pick completes the flow.
    bot.controller.handle(callback(OWNER_ID, "bg|none")).await.unwrap();
    assert!(bot
        .transport
        .last_message()
        .unwrap()
        .contains("Adaptive pack created"));
    assert_eq!(bot.controller.sessions().open_count().await, 0);
    assert!(bot
        .store
        .get_user(OWNER_ID)
        .await
        .unwrap()
        .adaptive_pack_id
        .is_some());
}

#[tokio::test]
async fn duplicate_rejects_oversized_source_before_charging() {
    let bot = test_bot(true, false).await;
    bot.platform.seed_pack("big_source", "custom_emoji", 50);

    bot.controller
        .handle(cmd(OWNER_ID, "duplicate", &["https://t.me/addemoji/big_source"]))
        .await
        .unwrap();

    assert!(bot.transport.last_message().unwrap().contains("item limit"));
    assert!(bot.transport.last_invoice_payload().is_none());
    assert_eq!(bot.controller.sessions().open_count().await, 0);
    assert_eq!(bot.platform.calls_of("create_pack"), 0);
}

#[tokio::test]
async fn duplicate_completes_after_payment() {
    let bot = test_bot(true, false).await;
    bot.platform.seed_pack("small_source", "custom_emoji", 5);
    bot.store.upgrade_to_paid(OWNER_ID).await.unwrap();

    bot.controller
        .handle(cmd(OWNER_ID, "duplicate", &["small_source"]))
        .await
        .unwrap();
    let payload = bot.transport.last_invoice_payload().expect("invoice sent");

    bot.controller.handle(payment(OWNER_ID, &payload)).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Duplicated:"));

    let packs = bot.store.list_packs(OWNER_ID, None).await.unwrap();
    assert_eq!(packs.len(), 1);
    assert_eq!(packs[0].item_count, 5);
    assert_eq!(bot.controller.sessions().open_count().await, 0);
}

#[tokio::test]
async fn bpack_payment_upgrades_tier_but_not_open_flow_by_default() {
    let bot = test_bot(true, false).await;
    let user = 8;

    bot.controller.handle(cmd(user, "create", &["emoji"])).await.unwrap();
    bot.controller.handle(cmd(user, "bpack", &["emoji"])).await.unwrap();
    let payload = bot.transport.last_invoice_payload().unwrap();
    bot.controller.handle(payment(user, &payload)).await.unwrap();

    assert_eq!(bot.store.get_user(user).await.unwrap().tier, UserTier::Paid);

    // The open create flow keeps its entry-time (free) naming rules.
    bot.controller.handle(text(user, "x")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("length"));
}

#[tokio::test]
async fn bpack_payment_upgrades_open_flow_when_configured() {
    let bot = test_bot(true, true).await;
    let user = 8;

    bot.controller.handle(cmd(user, "create", &["emoji"])).await.unwrap();
    bot.controller.handle(cmd(user, "bpack", &["emoji"])).await.unwrap();
    let payload = bot.transport.last_invoice_payload().unwrap();
    bot.controller.handle(payment(user, &payload)).await.unwrap();

    // Paid naming rules now apply to the open flow.
    bot.controller.handle(text(user, "x")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("first item"));
}

#[tokio::test]
async fn remove_flow_is_idempotent_at_the_user_level() {
    let bot = test_bot(true, false).await;
    let user = 9;
    let pack = bot
        .store
        .create_pack(user, PackKind::Emoji, "emoji_nine", "Nine", false, item("s1"))
        .await
        .unwrap();
    bot.store.add_item(pack.pack_id, item("s2")).await.unwrap();

    bot.controller.handle(cmd(user, "rem", &[])).await.unwrap();
    bot.controller.handle(custom_emoji(user, "s2")).await.unwrap();
    bot.controller
        .handle(callback(user, &format!("pick|{}", pack.pack_id)))
        .await
        .unwrap();
    bot.controller.handle(callback(user, "confirm|yes")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Removed"));
    assert_eq!(bot.store.get_pack(pack.pack_id).await.unwrap().item_count, 1);

    // Same removal again: reported as missing, never a double decrement.
    bot.controller.handle(cmd(user, "rem", &[])).await.unwrap();
    bot.controller.handle(custom_emoji(user, "s2")).await.unwrap();
    bot.controller
        .handle(callback(user, &format!("pick|{}", pack.pack_id)))
        .await
        .unwrap();
    bot.controller.handle(callback(user, "confirm|yes")).await.unwrap();
    assert!(bot
        .transport
        .last_message()
        .unwrap()
        .contains("not in the pack"));
    assert_eq!(bot.store.get_pack(pack.pack_id).await.unwrap().item_count, 1);
    assert_eq!(bot.controller.sessions().open_count().await, 0);
}

#[tokio::test]
async fn delete_flow_requires_an_explicit_affirmative() {
    let bot = test_bot(true, false).await;
    let user = 10;
    let pack = bot
        .store
        .create_pack(user, PackKind::Emoji, "emoji_ten", "Ten", false, item("s1"))
        .await
        .unwrap();

    bot.controller.handle(cmd(user, "delete", &["emoji"])).await.unwrap();
    bot.controller
        .handle(callback(user, &format!("pick|{}", pack.pack_id)))
        .await
        .unwrap();

    // Anything but the affirmative reprompts; the pack survives.
    bot.controller.handle(callback(user, "confirm|maybe")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("confirm or cancel"));
    assert!(bot.store.get_pack(pack.pack_id).await.is_ok());
    assert_eq!(bot.controller.sessions().open_count().await, 1);

    // Declining cancels cleanly.
    bot.controller.handle(callback(user, "confirm|no")).await.unwrap();
    assert!(bot.store.get_pack(pack.pack_id).await.is_ok());
    assert_eq!(bot.controller.sessions().open_count().await, 0);

    // Confirming deletes pack and items everywhere.
    bot.controller.handle(cmd(user, "delete", &["emoji"])).await.unwrap();
    bot.controller
        .handle(callback(user, &format!("pick|{}", pack.pack_id)))
        .await
        .unwrap();
    bot.controller.handle(callback(user, "confirm|yes")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("deleted"));
    assert!(bot.store.get_pack(pack.pack_id).await.is_err());
    assert_eq!(bot.store.item_rows(pack.pack_id).await.unwrap(), 0);
}

#[tokio::test]
async fn bare_item_starts_the_add_flow() {
    let bot = test_bot(true, false).await;
    let user = 11;
    let pack = bot
        .store
        .create_pack(user, PackKind::Emoji, "emoji_eleven", "Eleven", false, item("s1"))
        .await
        .unwrap();

    bot.controller.handle(custom_emoji(user, "new1")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Choose a pack"));

    bot.controller
        .handle(callback(user, &format!("pick|{}", pack.pack_id)))
        .await
        .unwrap();
    bot.controller.handle(callback(user, "confirm|yes")).await.unwrap();

    assert!(bot.transport.last_message().unwrap().contains("Added"));
    assert_eq!(bot.store.get_pack(pack.pack_id).await.unwrap().item_count, 2);
    assert!(bot
        .store
        .find_item(pack.pack_id, "new1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn admin_grant_is_owner_gated() {
    let bot = test_bot(true, false).await;

    bot.controller.handle(cmd(12, "admin", &["13"])).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Unauthorized"));
    assert!(bot.store.get_user(13).await.is_err());

    bot.controller.handle(cmd(OWNER_ID, "admin", &["13"])).await.unwrap();
    let granted = bot.store.get_user(13).await.unwrap();
    assert_eq!(granted.tier, UserTier::AdminExempt);
    assert_eq!(granted.free_pack_uses, 20);
}

#[tokio::test]
async fn broadcast_counts_only_successful_sends() {
    let bot = test_bot(true, false).await;
    for uid in [OWNER_ID, 21, 22, 23] {
        bot.store.get_or_create_user(uid).await.unwrap();
    }
    bot.transport.fail_sends_to(22);

    bot.controller
        .handle(cmd(OWNER_ID, "broadcast", &["hello", "there"]))
        .await
        .unwrap();

    assert!(bot.transport.last_message().unwrap().contains("3 users"));

    // Non-owners cannot broadcast.
    bot.controller.handle(cmd(21, "broadcast", &["spam"])).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Unauthorized"));
}

#[tokio::test]
async fn set_toggle_disables_purchases() {
    let bot = test_bot(true, false).await;

    bot.controller.handle(cmd(OWNER_ID, "set", &["off"])).await.unwrap();
    bot.controller.handle(cmd(30, "bpack", &["emoji"])).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("disabled"));
    assert!(bot.transport.last_invoice_payload().is_none());

    bot.controller.handle(cmd(OWNER_ID, "set", &["on"])).await.unwrap();
    bot.controller.handle(cmd(30, "bpack", &["emoji"])).await.unwrap();
    assert!(bot.transport.last_invoice_payload().is_some());
}

#[tokio::test]
async fn import_rejects_foreign_snapshots() {
    let bot = test_bot(true, false).await;
    let user = 13;
    bot.store
        .create_pack(user, PackKind::Emoji, "export_me", "Export", false, item("s1"))
        .await
        .unwrap();

    bot.controller.handle(cmd(user, "export", &[])).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Export complete"));

    let snapshot = packsmith::services::backup::BackupService::new(bot.pool.clone(), ".")
        .snapshot(Some(user))
        .await
        .unwrap();
    let json = serde_json::to_vec(&snapshot).unwrap();
    bot.transport.put_file("backup1", json);

    // The owner of the data may restore it.
    bot.controller.handle(document(user, "backup1")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Import complete"));

    // Someone else may not.
    bot.controller.handle(document(14, "backup1")).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Import rejected"));
}

#[tokio::test]
async fn cancel_aborts_any_flow_without_side_effects() {
    let bot = test_bot(true, false).await;
    let user = 15;

    bot.controller.handle(cmd(user, "create", &["sticker"])).await.unwrap();
    bot.controller.handle(text(user, "mypack")).await.unwrap();
    assert_eq!(bot.controller.sessions().open_count().await, 1);

    bot.controller.handle(cmd(user, "cancel", &[])).await.unwrap();
    assert!(bot.transport.last_message().unwrap().contains("Canceled"));
    assert_eq!(bot.controller.sessions().open_count().await, 0);
    assert_eq!(bot.platform.calls_of("create_pack"), 0);
    assert!(bot.store.list_packs(user, None).await.unwrap().is_empty());
}
