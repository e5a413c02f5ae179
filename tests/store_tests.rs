//! Local store tests.
//!
//! Covers admission, replay suppression, last-write-wins per logical key,
//! and warm restarts from the persisted tables.

mod common;

use common::{author, init_tracing, sign, sign_as_delegator, StoreFixture, T0};
use opchan::clock::ManualClock;
use opchan::message::{
    CellPayload, CommentPayload, DisplayPreference, MessagePayload, ModeratePayload,
    ModerationTarget, OpchanMessage, PostPayload, UnsignedMessage, UserProfilePayload,
    VotePayload, VoteValue,
};
use opchan::store::{Bookmark, BookmarkType, PendingChange};
use rand::seq::SliceRandom;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Helper to build an unsigned post.
fn post(id: &str, by: &str, cell_id: &str, timestamp: u64) -> UnsignedMessage {
    UnsignedMessage::new(
        id,
        by,
        timestamp,
        MessagePayload::Post(PostPayload {
            cell_id: cell_id.to_string(),
            title: format!("Title of {}", id),
            content: format!("Body of {}", id),
        }),
    )
}

/// Helper to build an unsigned vote.
fn vote(id: &str, by: &str, target_id: &str, value: VoteValue, timestamp: u64) -> UnsignedMessage {
    UnsignedMessage::new(
        id,
        by,
        timestamp,
        MessagePayload::Vote(VotePayload {
            target_id: target_id.to_string(),
            value,
        }),
    )
}

// ============================================================================
// Admission
// ============================================================================

/// A valid message is accepted once; identical redelivery is a no-op.
#[tokio::test]
async fn test_redelivery_is_idempotent() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;

    let message = sign(&alice, post("p1", "0xA", "c1", T0 + 1));
    let raw = message.to_value().unwrap();

    assert!(fixture.store.apply_raw(&raw));
    assert!(!fixture.store.apply_raw(&raw));
    assert!(!fixture.store.apply_message(&message));

    assert_eq!(fixture.store.post("p1"), Some(message));
    assert_eq!(fixture.store.stats().posts, 1);
}

/// Structurally broken input is rejected before any signature work.
#[tokio::test]
async fn test_malformed_input_skips_crypto() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;
    let before = fixture.delegations.verifications_performed();

    let mut missing_signature = sign(&alice, post("p1", "0xA", "c1", T0)).to_value().unwrap();
    missing_signature
        .as_object_mut()
        .unwrap()
        .remove("signature");
    let mut string_timestamp = sign(&alice, post("p2", "0xA", "c1", T0)).to_value().unwrap();
    string_timestamp["timestamp"] = json!("yesterday");

    for raw in [
        json!(null),
        json!("POST"),
        json!({ "id": "p3", "type": "POST" }),
        missing_signature,
        string_timestamp,
    ] {
        assert!(!fixture.store.apply_raw(&raw), "accepted {}", raw);
    }

    assert_eq!(fixture.delegations.verifications_performed(), before);
    assert_eq!(fixture.store.stats().posts, 0);
}

/// A message whose content was altered after signing never enters the store.
#[tokio::test]
async fn test_forged_content_rejected() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;

    let mut raw = sign(&alice, post("p1", "0xA", "c1", T0)).to_value().unwrap();
    raw["content"] = json!("something Alice never wrote");

    assert!(!fixture.store.apply_raw(&raw));
    assert!(fixture.store.post("p1").is_none());
    // A rejected message must not poison the replay set.
    let genuine = sign(&alice, post("p1", "0xA", "c1", T0));
    assert!(fixture.store.apply_message(&genuine));
}

/// Messages signed under an expired delegation are refused.
#[tokio::test]
async fn test_expired_delegation_rejected() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;
    let message = sign(&alice, post("p1", "0xA", "c1", T0));

    clock.advance(8 * opchan::constants::DAY_MS);
    assert!(!fixture.store.apply_message(&message));
}

/// A delegation cannot write votes or profiles under someone else's address.
#[tokio::test]
async fn test_impersonated_author_rejected() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());

    // Sanity: the same construction is accepted for the delegator itself.
    let own = sign_as_delegator("0xM", vote("v0", "0xM", "p1", VoteValue::Up, T0 + 1));
    assert!(fixture.store.apply_message(&own));

    let forged_vote = sign_as_delegator(
        "0xM",
        vote("v1", "0xVictim", "p1", VoteValue::Down, T0 + 2),
    );
    assert!(!fixture.store.apply_message(&forged_vote));
    assert!(fixture.store.vote("p1", "0xVictim").is_none());
    assert_eq!(fixture.store.votes_for("p1").len(), 1);

    let forged_profile = sign_as_delegator(
        "0xM",
        UnsignedMessage::new(
            "u1",
            "0xVictim",
            T0 + 3,
            MessagePayload::UserProfileUpdate(UserProfilePayload {
                call_sign: Some("hijacked".to_string()),
                display_preference: DisplayPreference::CallSign,
            }),
        ),
    );
    assert!(!fixture.store.apply_message(&forged_profile));
    assert!(fixture
        .store
        .identity("0xVictim")
        .and_then(|identity| identity.call_sign)
        .is_none());
}

// ============================================================================
// Last Write Wins
// ============================================================================

/// A user's newer vote replaces the older one regardless of arrival order.
#[tokio::test]
async fn test_vote_last_write_wins_out_of_order() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (bob, _bob_dir) = author("0xB", clock.clone()).await;

    let upvote = sign(&bob, vote("v1", "0xB", "p1", VoteValue::Up, T0 + 100));
    let downvote = sign(&bob, vote("v2", "0xB", "p1", VoteValue::Down, T0 + 200));

    assert!(fixture.store.apply_message(&downvote));
    // Accepted as new, but older than the stored vote.
    assert!(fixture.store.apply_message(&upvote));

    let stored = fixture.store.vote("p1", "0xB").unwrap();
    assert_eq!(stored.id(), "v2");
    assert_eq!(fixture.store.votes_for("p1").len(), 1);
}

/// Any delivery order converges on the newest message per key.
#[tokio::test]
async fn test_last_write_wins_is_order_independent() {
    let clock = Arc::new(ManualClock::new(T0));
    let (carol, _carol_dir) = author("0xC", clock.clone()).await;
    let (dave, _dave_dir) = author("0xD", clock.clone()).await;

    let mut messages: Vec<OpchanMessage> = Vec::new();
    for i in 0..6u64 {
        let value = if i % 2 == 0 { VoteValue::Up } else { VoteValue::Down };
        messages.push(sign(&carol, vote(&format!("c-v{}", i), "0xC", "p1", value, T0 + i)));
        messages.push(sign(&dave, vote(&format!("d-v{}", i), "0xD", "p1", value, T0 + 10 * i)));
    }
    for i in 0..4u64 {
        messages.push(sign(
            &dave,
            UnsignedMessage::new(
                format!("m{}", i),
                "0xD",
                T0 + i,
                MessagePayload::Moderate(ModeratePayload {
                    cell_id: "c1".to_string(),
                    target_type: ModerationTarget::Post,
                    target_id: "p1".to_string(),
                    reason: Some(format!("reason {}", i)),
                }),
            ),
        ));
    }

    let mut rng = rand::thread_rng();
    for _ in 0..5 {
        messages.shuffle(&mut rng);
        let temp = TempDir::new().unwrap();
        let fixture = StoreFixture::open(&temp, clock.clone());
        for message in &messages {
            assert!(fixture.store.apply_message(message));
        }

        assert_eq!(fixture.store.vote("p1", "0xC").unwrap().id(), "c-v5");
        assert_eq!(fixture.store.vote("p1", "0xD").unwrap().id(), "d-v5");
        assert_eq!(fixture.store.moderation("p1").unwrap().id(), "m3");
        assert_eq!(fixture.store.stats().moderations, 1);
    }
}

/// On a timestamp tie the entry stored first is kept.
#[tokio::test]
async fn test_equal_timestamps_keep_incumbent() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (bob, _bob_dir) = author("0xB", clock.clone()).await;

    let first = sign(&bob, vote("v1", "0xB", "p1", VoteValue::Up, T0));
    let second = sign(&bob, vote("v2", "0xB", "p1", VoteValue::Down, T0));
    assert!(fixture.store.apply_message(&first));
    assert!(fixture.store.apply_message(&second));

    assert_eq!(fixture.store.vote("p1", "0xB").unwrap().id(), "v1");
}

/// Profile updates are last-write-wins and keep resolved names.
#[tokio::test]
async fn test_profile_updates_merge_into_identity() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;

    let profile = |id: &str, call_sign: &str, timestamp: u64| {
        sign(
            &alice,
            UnsignedMessage::new(
                id,
                "0xA",
                timestamp,
                MessagePayload::UserProfileUpdate(UserProfilePayload {
                    call_sign: Some(call_sign.to_string()),
                    display_preference: DisplayPreference::CallSign,
                }),
            ),
        )
    };

    assert!(fixture.store.apply_message(&profile("u1", "alice", T0 + 10)));
    fixture
        .store
        .update_identity_resolution("0xA", Some("alice.eth".to_string()), None);
    assert!(fixture.store.apply_message(&profile("u0", "stale", T0 + 5)));
    assert!(fixture.store.apply_message(&profile("u2", "alice2", T0 + 20)));

    let identity = fixture.store.identity("0xA").unwrap();
    assert_eq!(identity.call_sign.as_deref(), Some("alice2"));
    assert_eq!(identity.ens_name.as_deref(), Some("alice.eth"));
    assert_eq!(identity.last_updated, T0 + 20);
    assert_eq!(identity.display_name(), "alice2");
}

// ============================================================================
// Queries
// ============================================================================

/// Forum structure queries return what was applied.
#[tokio::test]
async fn test_structure_queries() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let fixture = StoreFixture::open(&temp, clock.clone());
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;

    let cell = sign(
        &alice,
        UnsignedMessage::new(
            "c1",
            "0xA",
            T0,
            MessagePayload::Cell(CellPayload {
                name: "General".to_string(),
                description: "Anything goes".to_string(),
                icon: None,
            }),
        ),
    );
    let comment = sign(
        &alice,
        UnsignedMessage::new(
            "k1",
            "0xA",
            T0 + 3,
            MessagePayload::Comment(CommentPayload {
                post_id: "p1".to_string(),
                content: "Nice".to_string(),
            }),
        ),
    );

    assert!(fixture.store.apply_message(&cell));
    assert!(fixture.store.apply_message(&sign(&alice, post("p1", "0xA", "c1", T0 + 1))));
    assert!(fixture.store.apply_message(&sign(&alice, post("p2", "0xA", "c1", T0 + 2))));
    assert!(fixture.store.apply_message(&sign(&alice, post("p3", "0xA", "c2", T0 + 2))));
    assert!(fixture.store.apply_message(&comment));

    assert_eq!(fixture.store.cells().len(), 1);
    assert_eq!(fixture.store.cell("c1"), Some(cell));
    assert_eq!(fixture.store.posts_in_cell("c1").len(), 2);
    assert_eq!(fixture.store.comments_on_post("p1"), vec![comment]);
    assert_eq!(fixture.store.last_sync(), Some(T0));
}

// ============================================================================
// Pending and Restart
// ============================================================================

/// Pending listeners fire once per actual change.
#[tokio::test]
async fn test_pending_listeners_fire_on_change() {
    let temp = TempDir::new().unwrap();
    let fixture = StoreFixture::open(&temp, Arc::new(ManualClock::new(T0)));
    let changes = Arc::new(Mutex::new(Vec::<PendingChange>::new()));
    let sink = changes.clone();
    let listener = fixture
        .store
        .on_pending_change(move |change| sink.lock().unwrap().push(change.clone()));

    fixture.store.mark_pending("p1");
    fixture.store.mark_pending("p1");
    fixture.store.clear_pending("p1");
    fixture.store.clear_pending("p1");
    assert!(fixture.store.remove_listener(listener));
    fixture.store.mark_pending("p2");

    let changes = changes.lock().unwrap();
    assert_eq!(
        *changes,
        vec![
            PendingChange {
                id: "p1".to_string(),
                pending: true
            },
            PendingChange {
                id: "p1".to_string(),
                pending: false
            },
        ]
    );
}

/// A reopened store holds the same messages, pending set, and replay set.
#[tokio::test]
async fn test_hydration_after_reopen() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;
    let (bob, _bob_dir) = author("0xB", clock.clone()).await;

    let p1 = sign(&alice, post("p1", "0xA", "c1", T0 + 1));
    let v1 = sign(&bob, vote("v1", "0xB", "p1", VoteValue::Up, T0 + 2));

    {
        let fixture = StoreFixture::open(&temp, clock.clone());
        clock.set(T0 + 50);
        assert!(fixture.store.apply_message(&p1));
        assert!(fixture.store.apply_message(&v1));
        fixture.store.mark_pending("p1");
        fixture.store.mark_pending("p9");
        fixture.store.clear_pending("p9");
        fixture
            .store
            .add_bookmark(Bookmark::new(BookmarkType::Post, "p1", "0xA", T0).with_title("Keep"))
            .unwrap();
    }

    let fixture = StoreFixture::open(&temp, clock.clone());
    assert_eq!(fixture.store.post("p1"), Some(p1.clone()));
    assert_eq!(fixture.store.vote("p1", "0xB"), Some(v1.clone()));
    assert_eq!(fixture.store.pending_ids(), vec!["p1".to_string()]);
    assert_eq!(fixture.store.last_sync(), Some(T0 + 50));
    assert!(fixture.store.is_bookmarked("0xA", BookmarkType::Post, "p1"));

    // Replays of hydrated messages are still duplicates.
    assert!(!fixture.store.apply_message(&p1));
    assert!(!fixture.store.apply_message(&v1));

    let stats = fixture.store.stats();
    assert_eq!((stats.posts, stats.votes, stats.pending), (1, 1, 1));
}

/// Clearing wipes memory and disk.
#[tokio::test]
async fn test_clear_then_reopen_is_empty() {
    let temp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(T0));
    let (alice, _alice_dir) = author("0xA", clock.clone()).await;
    let p1 = sign(&alice, post("p1", "0xA", "c1", T0 + 1));

    {
        let fixture = StoreFixture::open(&temp, clock.clone());
        assert!(fixture.store.apply_message(&p1));
        fixture.store.mark_pending("p1");
        fixture.store.clear().unwrap();
        assert!(fixture.store.post("p1").is_none());
    }

    let fixture = StoreFixture::open(&temp, clock.clone());
    assert_eq!(fixture.store.stats().posts, 0);
    assert!(fixture.store.pending_ids().is_empty());
    assert!(fixture.store.apply_message(&p1));
}
