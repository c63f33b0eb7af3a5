//! Shared fixtures for the unit tests.

use crate::config::{ModerationSettings, ProviderConfig};
use crate::forum::{MemoryForum, Post, Topic};
use crate::pipeline::Moderator;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn settings() -> ModerationSettings {
    ModerationSettings {
        enabled: true,
        flag_post_min_toxicity_enable: true,
        flag_post_min_toxicity: 0.5,
        notify_posting_min_toxicity_enable: true,
        notify_posting_min_toxicity: 0.5,
        backfill_posts: true,
        ..ModerationSettings::default()
    }
}

pub fn provider_config(endpoint: &str) -> ProviderConfig {
    ProviderConfig {
        api_key: "test-key".to_string(),
        endpoint: endpoint.to_string(),
        session_base: "https://forum.example.com".to_string(),
        connect_timeout_ms: 200,
        read_timeout_ms: 150,
        write_timeout_ms: 150,
        ..ProviderConfig::default()
    }
}

pub fn score_body(score: f64) -> String {
    format!(
        r#"{{"attributeScores": {{"TOXICITY": {{"spanScores": [{{"begin": 0,"end": 11,"score": {{"value": {score},"type": "PROBABILITY"}}}}],"summaryScore": {{"value": {score},"type": "PROBABILITY"}}}}}},"languages": ["en"]}}"#
    )
}

/// Every analyze call answers with `score`.
pub async fn mount_score(server: &MockServer, score: f64) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(score_body(score)))
        .mount(server)
        .await;
}

/// Requests whose body contains `marker` stall past the client timeout.
/// Mount before the catch-all answer.
pub async fn mount_stall(server: &MockServer, marker: &str) {
    Mock::given(method("POST"))
        .and(body_string_contains(marker))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(server)
        .await;
}

pub fn user_post(id: i64, raw: &str) -> Post {
    Post {
        id,
        user_id: Some(100 + id),
        raw: raw.to_string(),
        topic: Some(Topic {
            id: 1,
            ..Topic::default()
        }),
        ..Post::default()
    }
}

pub fn forum_with(posts: Vec<Post>) -> Arc<MemoryForum> {
    Arc::new(MemoryForum::new(posts))
}

pub fn moderator(
    settings: ModerationSettings,
    provider: ProviderConfig,
    forum: Arc<MemoryForum>,
) -> Arc<Moderator> {
    Arc::new(Moderator::new(settings, provider, forum.clone(), forum))
}
