use std::sync::atomic::Ordering;

use shared::domain::ChatId;
use storage::MemoryStorage;

use super::*;
use crate::fake_api::{chat, message, FakeApi};

const BOT: BotId = BotId(1);

async fn view_for(api: Arc<FakeApi>) -> (Arc<ConversationView>, Arc<Mutex<DraftCache>>) {
    let drafts = Arc::new(Mutex::new(DraftCache::new()));
    let view = ConversationView::new(
        api,
        Arc::new(MemoryStorage::with_token("token-1")),
        Arc::clone(&drafts),
    );
    view.switch_bot(BOT).await.expect("switch bot");
    (view, drafts)
}

fn history(ids: std::ops::RangeInclusive<i64>) -> Vec<Message> {
    ids.map(|id| message(id, id * 10, false)).collect()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn ids(snapshot: &ViewSnapshot) -> Vec<i64> {
    snapshot.messages.iter().map(|m| m.id.0).collect()
}

#[tokio::test]
async fn pages_backwards_until_history_runs_out() {
    let api = Arc::new(FakeApi::new().with_history(ChatId(1), history(1..=15)));
    let (view, _) = view_for(Arc::clone(&api)).await;

    view.open_chat(ChatId(1)).await.expect("open");
    let snapshot = view.snapshot().await;
    assert_eq!(ids(&snapshot), (6..=15).collect::<Vec<_>>());
    assert!(!snapshot.no_more_history);

    assert!(view.load_older().await.expect("older"));
    let snapshot = view.snapshot().await;
    assert_eq!(ids(&snapshot), (1..=15).collect::<Vec<_>>());
    assert!(!snapshot.no_more_history);

    assert!(!view.load_older().await.expect("older"));
    assert!(view.snapshot().await.no_more_history);

    assert!(!view.load_older().await.expect("older"));
    assert_eq!(
        api.message_calls(),
        vec![
            (ChatId(1), 0, 10),
            (ChatId(1), 10, 10),
            (ChatId(1), 15, 10)
        ]
    );
}

#[tokio::test]
async fn empty_chat_is_terminal_after_first_page() {
    let api = Arc::new(FakeApi::new());
    let (view, _) = view_for(Arc::clone(&api)).await;

    view.open_chat(ChatId(4)).await.expect("open");
    let snapshot = view.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.no_more_history);
    assert!(!view.load_older().await.expect("older"));
    assert_eq!(api.message_calls().len(), 1);
}

#[tokio::test]
async fn reopening_a_chat_resets_pagination() {
    let api = Arc::new(
        FakeApi::new()
            .with_history(ChatId(1), history(1..=3))
            .with_history(ChatId(2), history(20..=22)),
    );
    let (view, _) = view_for(Arc::clone(&api)).await;

    view.open_chat(ChatId(1)).await.expect("open");
    view.load_older().await.expect("older");
    assert!(view.snapshot().await.no_more_history);

    view.open_chat(ChatId(2)).await.expect("open");
    view.open_chat(ChatId(1)).await.expect("reopen");
    let snapshot = view.snapshot().await;
    assert!(!snapshot.no_more_history);
    assert_eq!(ids(&snapshot), vec![1, 2, 3]);
}

#[tokio::test]
async fn slow_page_for_a_chat_left_behind_is_discarded() {
    let api = Arc::new(
        FakeApi::new()
            .with_history(ChatId(1), history(1..=3))
            .with_history(ChatId(2), history(20..=22)),
    );
    let (view, _) = view_for(Arc::clone(&api)).await;
    let release_a = api.gate(ChatId(1), 0);

    let slow_open = {
        let view = Arc::clone(&view);
        tokio::spawn(async move { view.open_chat(ChatId(1)).await })
    };
    while api.message_calls().is_empty() {
        tokio::task::yield_now().await;
    }

    view.open_chat(ChatId(2)).await.expect("open b");
    release_a.send(()).expect("release");
    slow_open.await.expect("join").expect("open a");

    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.open_chat, Some(ChatId(2)));
    assert_eq!(ids(&snapshot), vec![20, 21, 22]);
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn returning_to_a_chat_shows_only_its_own_history() {
    let api = Arc::new(
        FakeApi::new()
            .with_history(ChatId(1), history(1..=3))
            .with_history(ChatId(2), history(20..=22)),
    );
    let (view, _) = view_for(Arc::clone(&api)).await;
    let release_first = api.gate(ChatId(1), 0);

    let first_open = {
        let view = Arc::clone(&view);
        tokio::spawn(async move { view.open_chat(ChatId(1)).await })
    };
    while api.message_calls().is_empty() {
        tokio::task::yield_now().await;
    }
    view.open_chat(ChatId(2)).await.expect("open b");
    view.open_chat(ChatId(1)).await.expect("reopen a");

    release_first.send(()).expect("release");
    first_open.await.expect("join").expect("open a");

    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.open_chat, Some(ChatId(1)));
    assert_eq!(ids(&snapshot), vec![1, 2, 3]);
}

#[tokio::test]
async fn drafts_follow_their_chat() {
    let api = Arc::new(FakeApi::new());
    let (view, drafts) = view_for(api).await;

    view.open_chat(ChatId(1)).await.expect("open a");
    view.set_compose_text("hello").await;
    view.open_chat(ChatId(2)).await.expect("open b");
    assert_eq!(view.compose().await.text, "");
    view.set_compose_text("world").await;

    view.open_chat(ChatId(1)).await.expect("back to a");
    assert_eq!(view.compose().await.text, "hello");
    view.open_chat(ChatId(2)).await.expect("back to b");
    assert_eq!(view.compose().await.text, "world");

    assert_eq!(drafts.lock().await.len(), 2);
}

#[tokio::test]
async fn opening_unread_chat_marks_it_read() {
    let api = Arc::new(
        FakeApi::new()
            .with_chats(vec![chat(1, 0)])
            .with_history(ChatId(1), vec![message(1, 10, false), message(2, 20, true)]),
    );
    let (view, _) = view_for(Arc::clone(&api)).await;

    view.open_chat(ChatId(1)).await.expect("open");
    settle().await;

    let snapshot = view.snapshot().await;
    assert!(snapshot.messages.iter().all(|m| !m.unread));
    assert!(!snapshot.chats[0].last_message_unread);
    assert_eq!(api.set_read_calls(), vec![ChatId(1)]);
}

#[tokio::test]
async fn pushes_reorder_chats_and_extend_open_window() {
    let api = Arc::new(
        FakeApi::new()
            .with_chats(vec![chat(1, 100), chat(2, 50)])
            .with_history(ChatId(1), history(1..=2)),
    );
    let (view, _) = view_for(Arc::clone(&api)).await;
    view.open_chat(ChatId(1)).await.expect("open");

    view.handle_push(PushedMessage {
        chat_id: ChatId(2),
        bot_id: BOT,
        message: message(30, 500, true),
        chat: chat(2, 50),
    })
    .await;
    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.chats[0].id, ChatId(2));
    assert_eq!(snapshot.chats[0].last_message_text, "message 30");
    assert!(snapshot.chats[0].last_message_unread);
    assert_eq!(ids(&snapshot), vec![1, 2]);

    view.handle_push(PushedMessage {
        chat_id: ChatId(1),
        bot_id: BOT,
        message: message(31, 600, true),
        chat: chat(1, 100),
    })
    .await;
    settle().await;
    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.chats[0].id, ChatId(1));
    assert_eq!(ids(&snapshot), vec![1, 2, 31]);
    assert!(!snapshot.messages[2].unread);
    assert_eq!(api.set_read_calls(), vec![ChatId(1)]);

    view.handle_push(PushedMessage {
        chat_id: ChatId(3),
        bot_id: BOT,
        message: message(32, 700, true),
        chat: chat(3, 700),
    })
    .await;
    let snapshot = view.snapshot().await;
    assert_eq!(
        snapshot.chats.iter().map(|c| c.id.0).collect::<Vec<_>>(),
        vec![3, 1, 2]
    );
}

#[tokio::test]
async fn pushes_for_other_bots_are_ignored() {
    let api = Arc::new(FakeApi::new().with_chats(vec![chat(1, 0)]));
    let (view, _) = view_for(api).await;
    let before = view.snapshot().await;

    view.handle_push(PushedMessage {
        chat_id: ChatId(9),
        bot_id: BotId(2),
        message: message(1, 10, true),
        chat: chat(9, 10),
    })
    .await;

    assert_eq!(view.snapshot().await, before);
}

#[tokio::test]
async fn duplicate_push_of_loaded_message_is_kept_once() {
    let api = Arc::new(FakeApi::new().with_history(ChatId(1), history(1..=3)));
    let (view, _) = view_for(api).await;
    view.open_chat(ChatId(1)).await.expect("open");

    view.handle_push(PushedMessage {
        chat_id: ChatId(1),
        bot_id: BOT,
        message: message(3, 30, false),
        chat: chat(1, 30),
    })
    .await;

    assert_eq!(ids(&view.snapshot().await), vec![1, 2, 3]);
}

#[tokio::test]
async fn successful_send_appends_and_clears_draft() {
    let api = Arc::new(FakeApi::new().with_history(ChatId(1), history(1..=2)));
    let (view, drafts) = view_for(Arc::clone(&api)).await;
    view.open_chat(ChatId(1)).await.expect("open");
    view.set_compose_text("on our way").await;

    let sent = view.send().await.expect("send");

    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.messages.last(), Some(&sent));
    assert_eq!(sent.text, "on our way");
    assert_eq!(snapshot.compose, Draft::default());
    assert!(drafts.lock().await.get(ChatId(1)).is_none());
    assert_eq!(api.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn typing_during_send_survives_confirmation() {
    let api = Arc::new(FakeApi::new().with_history(ChatId(1), history(1..=2)));
    let (view, drafts) = view_for(Arc::clone(&api)).await;
    view.open_chat(ChatId(1)).await.expect("open");
    view.set_compose_text("first").await;
    let release = api.gate_send();

    let pending = {
        let view = Arc::clone(&view);
        tokio::spawn(async move { view.send().await })
    };
    while api.send_attempts.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }

    view.set_compose_text("second").await;
    release.send(()).expect("release");
    let sent = pending.await.expect("join").expect("send");

    assert_eq!(sent.text, "first");
    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.messages.last(), Some(&sent));
    assert_eq!(snapshot.compose.text, "second");
    assert_eq!(
        drafts.lock().await.get(ChatId(1)).map(|d| d.text.clone()),
        Some("second".to_string())
    );
}

#[tokio::test]
async fn failed_send_keeps_draft_and_window() {
    let api = Arc::new(FakeApi::new().with_history(ChatId(1), history(1..=2)));
    api.fail_sends.store(true, Ordering::SeqCst);
    let (view, drafts) = view_for(Arc::clone(&api)).await;
    view.open_chat(ChatId(1)).await.expect("open");
    view.set_compose_text("retry me").await;

    let err = view.send().await.expect_err("send must fail");
    assert!(matches!(err, ClientError::SendFailed(_)), "unexpected error: {err}");

    let snapshot = view.snapshot().await;
    assert_eq!(ids(&snapshot), vec![1, 2]);
    assert_eq!(snapshot.compose.text, "retry me");
    assert_eq!(
        drafts.lock().await.get(ChatId(1)).map(|d| d.text.clone()),
        Some("retry me".to_string())
    );
}

#[tokio::test]
async fn empty_draft_is_not_sent() {
    let api = Arc::new(FakeApi::new());
    let (view, _) = view_for(Arc::clone(&api)).await;

    let err = view.send().await.expect_err("no chat open");
    assert!(matches!(err, ClientError::InvalidInput(_)));

    view.open_chat(ChatId(1)).await.expect("open");
    view.set_compose_text("   ").await;
    let err = view.send().await.expect_err("blank draft");
    assert!(matches!(err, ClientError::InvalidInput(_)));
    assert!(api.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn switching_bot_persists_selection_and_reloads_chats() {
    let api = Arc::new(
        FakeApi::new()
            .with_chats(vec![chat(1, 10), chat(2, 20)])
            .with_chat_count(42),
    );
    let store = Arc::new(MemoryStorage::default());
    let view = ConversationView::new(
        api,
        store.clone(),
        Arc::new(Mutex::new(DraftCache::new())),
    );

    view.switch_bot(BotId(7)).await.expect("switch");

    assert_eq!(store.load().await.expect("load").current_bot, Some(BotId(7)));
    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.bot, Some(BotId(7)));
    assert_eq!(snapshot.total_chats, 42);
    assert_eq!(
        snapshot.chats.iter().map(|c| c.id.0).collect::<Vec<_>>(),
        vec![2, 1]
    );

    let restored = ConversationView::new(
        Arc::new(FakeApi::new()),
        store,
        Arc::new(Mutex::new(DraftCache::new())),
    );
    assert_eq!(restored.restore_bot().await.expect("restore"), Some(BotId(7)));
}
