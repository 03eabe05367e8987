//! The event stream: a lazy, poll-based view of a running topic for
//! SSE-style bridging.
//!
//! A loop polls the forum once a second while the topic is
//! `pending`/`discussing`, diffs against what it already emitted, and stops
//! once the topic reaches a terminal state. Yields structured
//! [`TopicUpdate`] values rather than rendered strings — string rendering
//! belongs to the SSE-bridging surface that sits above this crate.

use futures_util::stream::{self, Stream};

use crate::oasis::forum::{Forum, Post, TimelineEvent, TimelineEventKind};

/// One update emitted while watching a topic.
#[derive(Debug, Clone)]
pub enum TopicUpdate {
    /// A new round has started (discussion mode only).
    RoundStarted { round: u32 },
    /// A post was appended to the forum (discussion mode only).
    NewPost(Post),
    /// A coarse timeline event was appended (execution mode only).
    Timeline(TimelineEvent),
    /// The topic reached a terminal state; carries the final conclusion.
    Concluded { conclusion: String },
    /// Sentinel marking the end of the stream, always the last item.
    Done,
}

struct PollState {
    forum: std::sync::Arc<Forum>,
    poll_interval: std::time::Duration,
    discussion_mode: bool,
    last_post_count: usize,
    last_round: u32,
    last_timeline_idx: usize,
    finished: bool,
}

/// Build a lazy stream of [`TopicUpdate`]s for the given forum, polling at
/// `poll_interval` until the topic reaches a terminal status, then yielding
/// the conclusion and a final [`TopicUpdate::Done`].
///
/// Each poll can surface more than one update (e.g. several posts appended
/// between ticks); those are queued and drained one at a time before the
/// next poll, guaranteeing every post appears exactly once and in order.
pub fn watch(forum: std::sync::Arc<Forum>, poll_interval: std::time::Duration) -> impl Stream<Item = TopicUpdate> {
    let discussion_mode = false; // corrected on first poll below; placeholder to satisfy struct init order
    let state = PollState {
        forum,
        poll_interval,
        discussion_mode,
        last_post_count: 0,
        last_round: 0,
        last_timeline_idx: 0,
        finished: false,
    };

    stream::unfold(
        (state, std::collections::VecDeque::new(), true),
        |(mut state, mut queue, first_poll)| async move {
            loop {
                if let Some(update) = queue.pop_front() {
                    return Some((update, (state, queue, false)));
                }
                if state.finished {
                    return None;
                }

                if first_poll {
                    state.discussion_mode = state.forum.topic().await.discussion_mode;
                }

                let topic = state.forum.topic().await;

                if state.discussion_mode {
                    if topic.current_round > state.last_round {
                        state.last_round = topic.current_round;
                        queue.push_back(TopicUpdate::RoundStarted {
                            round: state.last_round,
                        });
                    }
                    let posts = state.forum.browse().await;
                    if posts.len() > state.last_post_count {
                        for post in &posts[state.last_post_count..] {
                            queue.push_back(TopicUpdate::NewPost(post.clone()));
                        }
                        state.last_post_count = posts.len();
                    }
                } else {
                    let timeline = state.forum.timeline().await;
                    while state.last_timeline_idx < timeline.len() {
                        let event = timeline[state.last_timeline_idx].clone();
                        state.last_timeline_idx += 1;
                        if matches!(
                            event.event,
                            TimelineEventKind::Start
                                | TimelineEventKind::Round
                                | TimelineEventKind::AgentCall
                                | TimelineEventKind::AgentDone
                                | TimelineEventKind::Conclude
                        ) {
                            queue.push_back(TopicUpdate::Timeline(event));
                        }
                    }
                }

                if topic.status.is_terminal() {
                    state.finished = true;
                    queue.push_back(TopicUpdate::Concluded {
                        conclusion: topic.conclusion.clone(),
                    });
                    queue.push_back(TopicUpdate::Done);
                    continue;
                }

                if queue.is_empty() {
                    tokio::time::sleep(state.poll_interval).await;
                }
            }
        },
    )
}
