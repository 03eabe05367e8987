//! Forum persistence round-trips: a topic persisted mid-discussion and then
//! reloaded from its blob carries the same posts, votes, timeline, and
//! status as the live forum it was saved from.

use std::sync::Arc;

use oasis::oasis::forum::{TimelineEventKind, TopicStatus, VotePolarity};
use oasis::oasis::ids::FixedClock;
use oasis::Forum;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(1_700_000_000))
}

#[tokio::test]
async fn reloaded_forum_matches_the_original_posts_and_votes() {
    let dir = tempfile::tempdir().unwrap();

    let original = Forum::new(
        "rtrip001".to_string(),
        "does persistence work?".to_string(),
        "alice".to_string(),
        3,
        true,
        dir.path().to_path_buf(),
        clock(),
    );

    original.start_discussing().await.unwrap();
    original.set_current_round(1).await.unwrap();
    let p1 = original.publish("agent-a", "first take", None).await.unwrap();
    let p2 = original
        .publish("agent-b", "counterpoint", Some(p1.id))
        .await
        .unwrap();
    original.vote(p1.id, VotePolarity::Up, "agent-b").await.unwrap();
    original.vote(p2.id, VotePolarity::Down, "agent-a").await.unwrap();
    original
        .append_timeline(TimelineEventKind::Round, None, "round 1 complete")
        .await
        .unwrap();

    let blob_path = dir.path().join("rtrip001.json");
    assert!(blob_path.exists(), "persist() should have written a blob on every mutation");

    let reloaded = Forum::load(&blob_path, dir.path().to_path_buf(), clock())
        .await
        .unwrap();

    let original_snapshot = original.snapshot().await;
    let reloaded_snapshot = reloaded.snapshot().await;

    assert_eq!(reloaded_snapshot.topic.topic_id, original_snapshot.topic.topic_id);
    assert_eq!(reloaded_snapshot.topic.status, TopicStatus::Discussing);
    assert_eq!(reloaded_snapshot.posts.len(), original_snapshot.posts.len());
    assert_eq!(reloaded_snapshot.posts[0].upvotes, 1);
    assert_eq!(reloaded_snapshot.posts[1].downvotes, 1);
    assert_eq!(reloaded_snapshot.posts[1].reply_to, Some(p1.id));
    assert_eq!(reloaded_snapshot.timeline.len(), original_snapshot.timeline.len());
}

#[tokio::test]
async fn reloaded_forum_preserves_terminal_status_and_conclusion() {
    let dir = tempfile::tempdir().unwrap();

    let original = Forum::new(
        "rtrip002".to_string(),
        "will it conclude cleanly?".to_string(),
        "bob".to_string(),
        1,
        false,
        dir.path().to_path_buf(),
        clock(),
    );
    original.start_discussing().await.unwrap();
    original.conclude("the group agreed on plan B").await.unwrap();

    let blob_path = dir.path().join("rtrip002.json");
    let reloaded = Forum::load(&blob_path, dir.path().to_path_buf(), clock())
        .await
        .unwrap();

    assert_eq!(reloaded.status().await, TopicStatus::Concluded);
    assert_eq!(reloaded.topic().await.conclusion, "the group agreed on plan B");
}

/// A blob carrying a field this crate's `Topic`/`TopicBlob` doesn't know
/// about survives a load-then-persist round trip unchanged, per the
/// forward-compatibility contract `#[serde(flatten)] extra` provides.
#[tokio::test]
async fn unknown_fields_survive_a_load_then_persist_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rtrip003.json");

    let forum = Forum::new(
        "rtrip003".to_string(),
        "q".to_string(),
        "carol".to_string(),
        1,
        true,
        dir.path().to_path_buf(),
        clock(),
    );
    forum.start_discussing().await.unwrap();

    let mut on_disk: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    on_disk["future_field_from_a_later_version"] = serde_json::json!("please keep me");
    tokio::fs::write(&path, serde_json::to_vec_pretty(&on_disk).unwrap())
        .await
        .unwrap();

    let reloaded = Forum::load(&path, dir.path().to_path_buf(), clock())
        .await
        .unwrap();
    reloaded.set_current_round(1).await.unwrap();

    let rewritten: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    assert_eq!(
        rewritten["future_field_from_a_later_version"],
        serde_json::json!("please keep me")
    );
}
