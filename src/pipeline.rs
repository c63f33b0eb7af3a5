use crate::client::ScoreClient;
use crate::config::{ModerationSettings, ProviderConfig};
use crate::eligibility::should_check_post;
use crate::error::{JobError, ScoreError};
use crate::forum::{ModeratorActions, Post, PostRepository};
use crate::policy::{flag_on_scores, warn_on_scores};
use crate::response::ScoreResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Arguments of the flag job enqueued by the post hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagToxicPostArgs {
    pub post_id: Option<i64>,
}

/// Ties the score client, settings and host collaborators together for the
/// live post path. The backfill scanner reuses it for scoring.
///
/// The client is built here from `settings.toxicity_model`, so the model
/// requested and the field a score is stored under always agree.
pub struct Moderator {
    settings: ModerationSettings,
    client: Arc<ScoreClient>,
    posts: Arc<dyn PostRepository>,
    actions: Arc<dyn ModeratorActions>,
}

impl Moderator {
    pub fn new(
        settings: ModerationSettings,
        provider: ProviderConfig,
        posts: Arc<dyn PostRepository>,
        actions: Arc<dyn ModeratorActions>,
    ) -> Self {
        let client = Arc::new(ScoreClient::new(provider, settings.toxicity_model));
        Self {
            settings,
            client,
            posts,
            actions,
        }
    }

    pub fn client(&self) -> &ScoreClient {
        &self.client
    }

    pub fn settings(&self) -> &ModerationSettings {
        &self.settings
    }

    pub fn posts(&self) -> &dyn PostRepository {
        self.posts.as_ref()
    }

    pub fn should_check_post(&self, post: &Post) -> bool {
        should_check_post(&self.settings, &post.eligibility())
    }

    /// Hook gate for created and edited posts.
    pub fn wants_flag_check(&self, post: &Post) -> bool {
        self.settings.flag_post_min_toxicity_enable && self.should_check_post(post)
    }

    pub async fn score_post(&self, post: &Post) -> Result<ScoreResult, ScoreError> {
        self.client.score(&post.raw, post.user_id).await
    }

    /// Score a post and flag it for moderators when it crosses the threshold.
    pub async fn check_post_toxicity(&self, post: &Post) -> Result<ScoreResult, JobError> {
        let score = self.score_post(post).await?;
        if flag_on_scores(&self.settings, score, post, self.actions.as_ref())? {
            log::info!("Flagged post {} with score {:.3}", post.id, score.score);
        }
        Ok(score)
    }

    /// Score a post and record the result on it without flagging.
    pub async fn backfill_post_check(&self, post: &Post) -> Result<ScoreResult, JobError> {
        let score = self.score_post(post).await?;
        self.posts
            .save_custom_field(post.id, self.client.model().score_field_name(), score.score)?;
        Ok(score)
    }

    /// Draft check for the submit-time warning. `Some` only when the score is
    /// above the warn threshold.
    pub async fn check_content_toxicity(
        &self,
        content: &str,
        user_id: Option<i64>,
    ) -> Result<Option<ScoreResult>, ScoreError> {
        let score = self.client.score(content, user_id).await?;
        Ok(warn_on_scores(&self.settings, score))
    }

    /// Body of the flag job.
    pub async fn flag_toxic_post(
        &self,
        args: FlagToxicPostArgs,
    ) -> Result<Option<ScoreResult>, JobError> {
        let post_id = args.post_id.ok_or(JobError::InvalidParameters("post_id"))?;

        if !(self.settings.enabled && self.settings.flag_post_min_toxicity_enable) {
            return Ok(None);
        }

        let Some(post) = self.posts.find_post(post_id)? else {
            log::debug!("Post {post_id} is gone, nothing to flag");
            return Ok(None);
        };
        if post.deleted {
            return Ok(None);
        }

        self.check_post_toxicity(&post).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AttributeModel;
    use crate::forum::{MemoryForum, SYSTEM_USER_ID};
    use crate::test_support::{
        forum_with, moderator, mount_score, provider_config, settings, user_post,
    };
    use wiremock::MockServer;

    #[tokio::test]
    async fn test_low_score_does_not_flag() {
        let server = MockServer::start().await;
        mount_score(&server, 0.015122943).await;
        let forum = forum_with(vec![user_post(1, "everyone is a doo-doo head!")]);
        let moderator = moderator(settings(), provider_config(&server.uri()), forum.clone());

        let post = forum.find_post(1).unwrap().unwrap();
        let score = moderator.check_post_toxicity(&post).await.unwrap();
        assert_eq!(score.score, 0.015122943);
        assert!(forum.flags().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_high_score_flags_exactly_once() {
        let server = MockServer::start().await;
        mount_score(&server, 0.915122943).await;
        let forum = forum_with(vec![user_post(1, "everyone is a doo-doo head!")]);
        let moderator = moderator(settings(), provider_config(&server.uri()), forum.clone());

        let post = forum.find_post(1).unwrap().unwrap();
        moderator.check_post_toxicity(&post).await.unwrap();

        let flags = forum.flags().unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].post_id, 1);
        assert_eq!(flags[0].actor_id, SYSTEM_USER_ID);
    }

    #[tokio::test]
    async fn test_backfill_check_stores_field_without_flagging() {
        let server = MockServer::start().await;
        mount_score(&server, 0.915122943).await;
        let forum = forum_with(vec![user_post(1, "you absolute walnut")]);
        let moderator = moderator(settings(), provider_config(&server.uri()), forum.clone());

        let post = forum.find_post(1).unwrap().unwrap();
        moderator.backfill_post_check(&post).await.unwrap();

        let post = forum.find_post(1).unwrap().unwrap();
        assert_eq!(post.custom_fields["post_perspective_toxicity"], 0.915122943);
        assert!(forum.flags().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_severe_model_uses_its_own_field() {
        let server = MockServer::start().await;
        mount_score(&server, 0.0053346273).await;
        let forum = forum_with(vec![user_post(1, "you absolute walnut")]);
        let mut settings = settings();
        settings.toxicity_model = AttributeModel::SevereToxicity;
        let moderator = moderator(settings, provider_config(&server.uri()), forum.clone());

        let post = forum.find_post(1).unwrap().unwrap();
        moderator.backfill_post_check(&post).await.unwrap();

        let post = forum.find_post(1).unwrap().unwrap();
        assert_eq!(post.custom_fields["post_perspective_severe_toxicity"], 0.0053346273);
        assert!(!post.custom_fields.contains_key("post_perspective_toxicity"));
        assert_eq!(moderator.client().model(), AttributeModel::SevereToxicity);
    }

    #[tokio::test]
    async fn test_content_check_only_reports_over_threshold() {
        let server = MockServer::start().await;
        mount_score(&server, 0.915122943).await;
        let moderator = moderator(
            settings(),
            provider_config(&server.uri()),
            Arc::new(MemoryForum::default()),
        );
        let result = moderator.check_content_toxicity("Hello world", Some(5)).await.unwrap();
        assert_eq!(result, Some(ScoreResult { score: 0.915122943 }));

        let server = MockServer::start().await;
        mount_score(&server, 0.015122943).await;
        let moderator = crate::test_support::moderator(
            settings(),
            provider_config(&server.uri()),
            Arc::new(MemoryForum::default()),
        );
        let result = moderator.check_content_toxicity("Hello world", Some(5)).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_flag_job_requires_post_id() {
        let moderator = moderator(
            settings(),
            provider_config("http://127.0.0.1:1"),
            Arc::new(MemoryForum::default()),
        );
        let result = moderator.flag_toxic_post(FlagToxicPostArgs::default()).await;
        assert!(matches!(result, Err(JobError::InvalidParameters("post_id"))));
    }

    #[tokio::test]
    async fn test_flag_job_returns_quietly() {
        let forum = forum_with(vec![user_post(1, "hello")]);
        let args = FlagToxicPostArgs { post_id: Some(1) };

        // unknown post
        let moderator_ = moderator(settings(), provider_config("http://127.0.0.1:1"), forum.clone());
        let missing = moderator_
            .flag_toxic_post(FlagToxicPostArgs { post_id: Some(0) })
            .await
            .unwrap();
        assert!(missing.is_none());

        let mut disabled = settings();
        disabled.enabled = false;
        let moderator_ = moderator(disabled, provider_config("http://127.0.0.1:1"), forum.clone());
        assert!(moderator_.flag_toxic_post(args.clone()).await.unwrap().is_none());

        let mut no_flags = settings();
        no_flags.flag_post_min_toxicity_enable = false;
        let moderator_ = moderator(no_flags, provider_config("http://127.0.0.1:1"), forum.clone());
        assert!(moderator_.flag_toxic_post(args).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flag_job_surfaces_transport_failure() {
        let forum = forum_with(vec![user_post(1, "hello")]);
        let moderator = moderator(settings(), provider_config("http://127.0.0.1:1"), forum.clone());
        let result = moderator
            .flag_toxic_post(FlagToxicPostArgs { post_id: Some(1) })
            .await;
        assert!(matches!(result, Err(JobError::Score(ScoreError::Network(_)))));
        assert!(forum.flags().unwrap().is_empty());
    }
}
