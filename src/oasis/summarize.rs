//! Building the final conclusion from the top-voted posts.

use tokio::time::timeout;

use crate::oasis::collaborators::{ChatMessage, ChatRole, LlmClient};
use crate::oasis::config::OasisConfig;
use crate::oasis::forum::Post;

const SUMMARY_FAILED_PREFIX: &str = "summary failed";

/// Build the summarization prompt from the top 5 posts and the full post
/// list, call the LLM with a low temperature and bounded token budget, and
/// return the conclusion text. On any failure the conclusion is the failure
/// message prefixed with `"summary failed"` — summarization never aborts a
/// topic's completion.
pub async fn summarize(
    question: &str,
    all_posts: &[Post],
    top_posts: &[Post],
    rounds_consumed: u32,
    llm: &dyn LlmClient,
    config: &OasisConfig,
) -> String {
    let prompt = build_summary_prompt(question, all_posts, top_posts, rounds_consumed);
    let messages = vec![ChatMessage {
        role: ChatRole::User,
        content: prompt,
    }];

    let result = timeout(
        config.summarize_timeout,
        llm.complete(
            &messages,
            config.summarize_temperature,
            config.summarize_max_tokens,
        ),
    )
    .await;

    match result {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => format!("{}: {}", SUMMARY_FAILED_PREFIX, e),
        Err(_) => format!("{}: timed out", SUMMARY_FAILED_PREFIX),
    }
}

fn build_summary_prompt(
    question: &str,
    all_posts: &[Post],
    top_posts: &[Post],
    rounds_consumed: u32,
) -> String {
    let mut out = String::new();
    out.push_str("Summarize this discussion into a single conclusion.\n\n");
    out.push_str(&format!("Question: {}\n", question));
    out.push_str(&format!("Total posts: {}\n", all_posts.len()));
    out.push_str(&format!("Rounds consumed: {}\n\n", rounds_consumed));
    out.push_str("Top posts:\n");
    for post in top_posts.iter().take(5) {
        out.push_str(&format!(
            "#{} {}: {} (+{}/-{})\n",
            post.id, post.author, post.content, post.upvotes, post.downvotes
        ));
    }
    out
}
