use super::*;
use crate::fake_api::{chat, message};

fn ids(window: &MessageWindow) -> Vec<i64> {
    window.messages().iter().map(|m| m.id.0).collect()
}

fn assert_invariants(window: &MessageWindow) {
    let mut seen = HashSet::new();
    for pair in window.messages().windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp, "window out of order");
    }
    for m in window.messages() {
        assert!(seen.insert(m.id), "duplicate id {}", m.id);
    }
}

#[test]
fn merge_orders_by_timestamp_and_drops_duplicates() {
    let mut window = MessageWindow::from_messages(vec![message(5, 50, false), message(6, 60, false)]);

    window.prepend_page(vec![message(3, 30, false), message(4, 40, false), message(5, 50, false)]);
    window.append(message(7, 70, false));
    window.append(message(6, 60, false));
    window.merge(vec![message(1, 10, false), message(8, 80, false), message(2, 20, false)]);

    assert_eq!(ids(&window), (1..=8).collect::<Vec<_>>());
    assert_invariants(&window);
}

#[test]
fn already_loaded_copy_wins() {
    let mut window = MessageWindow::from_messages(vec![message(1, 10, true)]);
    let mut edited = message(1, 10, false);
    edited.text = "edited".into();

    window.append(edited);

    assert_eq!(window.len(), 1);
    assert_eq!(window.messages()[0].text, "message 1");
    assert!(window.has_unread());
}

#[test]
fn equal_timestamps_keep_arrival_order() {
    let mut window = MessageWindow::new();
    window.append(message(9, 10, false));
    window.append(message(2, 10, false));
    window.append(message(5, 10, false));
    assert_eq!(ids(&window), vec![9, 2, 5]);
}

#[test]
fn interleaved_sources_keep_invariants() {
    let mut window = MessageWindow::new();
    let pages: Vec<Vec<Message>> = vec![
        (11..=20).map(|i| message(i, i * 3, false)).collect(),
        (1..=10).map(|i| message(i, i * 3, false)).collect(),
        (8..=14).map(|i| message(i, i * 3, false)).collect(),
    ];
    for (round, page) in pages.into_iter().enumerate() {
        window.prepend_page(page);
        window.append(message(100 + round as i64, 1_000 + round as i64, false));
        window.append(message(15, 45, false));
        assert_invariants(&window);
    }
    assert_eq!(window.len(), 23);
}

#[test]
fn mark_all_read_clears_unread_flags() {
    let mut window = MessageWindow::from_messages(vec![message(1, 10, true), message(2, 20, true)]);
    assert!(window.has_unread());
    window.mark_all_read();
    assert!(!window.has_unread());
}

#[test]
fn pagination_stops_on_empty_page() {
    let window = MessageWindow::from_messages((1..=10).map(|i| message(i, i, false)));
    let mut pagination = Pagination::default();

    assert_eq!(pagination.next_offset(&window), Some(10));
    pagination.record_page(3);
    assert!(!pagination.is_exhausted());
    pagination.record_page(0);
    assert!(pagination.is_exhausted());
    assert_eq!(pagination.next_offset(&window), None);

    pagination.reset();
    assert_eq!(pagination.next_offset(&window), Some(10));
}

#[test]
fn chat_list_sorts_by_latest_activity() {
    let list = ChatList::new(vec![chat(1, 10), chat(2, 30), chat(3, 20)]);
    assert_eq!(
        list.chats().iter().map(|c| c.id.0).collect::<Vec<_>>(),
        vec![2, 3, 1]
    );
}

#[test]
fn touch_moves_chat_to_front_and_updates_summary() {
    let mut list = ChatList::new(vec![chat(1, 40), chat(2, 30), chat(3, 20), chat(4, 10)]);

    let mut latest = message(77, 100, true);
    latest.text = "any news?".into();
    assert!(list.touch(ChatId(4), &latest));

    let order: Vec<i64> = list.chats().iter().map(|c| c.id.0).collect();
    assert_eq!(order, vec![4, 1, 2, 3]);
    let touched = list.get(ChatId(4)).expect("chat 4");
    assert_eq!(touched.last_message_text, "any news?");
    assert_eq!(touched.last_message_at, latest.timestamp);
    assert!(touched.last_message_unread);

    list.mark_read(ChatId(4));
    assert!(!list.get(ChatId(4)).expect("chat 4").last_message_unread);
    assert!(!list.touch(ChatId(99), &latest));
}

#[test]
fn insert_if_missing_keeps_existing_entry() {
    let mut list = ChatList::new(vec![chat(1, 10)]);
    let mut renamed = chat(1, 10);
    renamed.display_name = "Renamed".into();

    assert!(!list.insert_if_missing(renamed));
    assert_eq!(list.get(ChatId(1)).expect("chat").display_name, "User 1");

    assert!(list.insert_if_missing(chat(2, 5)));
    assert_eq!(list.len(), 2);
    assert_eq!(list.chats()[1].id, ChatId(2));
}
