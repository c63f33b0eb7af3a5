use crate::error::JobError;
use crate::forum::Post;
use crate::pipeline::{FlagToxicPostArgs, Moderator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostEvent {
    Created,
    Edited,
}

/// Hands flag jobs from the hooks to a background worker so the host's
/// submission response never waits on the provider.
#[derive(Clone)]
pub struct JobQueue {
    moderator: Arc<Moderator>,
    sender: mpsc::UnboundedSender<FlagToxicPostArgs>,
}

impl JobQueue {
    pub fn spawn(moderator: Arc<Moderator>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::worker(moderator.clone(), receiver));
        (Self { moderator, sender }, handle)
    }

    async fn worker(
        moderator: Arc<Moderator>,
        mut receiver: mpsc::UnboundedReceiver<FlagToxicPostArgs>,
    ) {
        while let Some(args) = receiver.recv().await {
            match moderator.flag_toxic_post(args.clone()).await {
                Ok(Some(score)) => {
                    log::debug!("Flag job for {:?} scored {:.3}", args.post_id, score.score);
                }
                Ok(None) => {}
                Err(JobError::InvalidParameters(name)) => {
                    log::error!("Flag job enqueued without {name}");
                }
                Err(e) => {
                    log::warn!("Flag job for {:?} failed: {e}", args.post_id);
                }
            }
        }
        log::debug!("Flag job queue closed");
    }

    pub fn enqueue(&self, args: FlagToxicPostArgs) -> bool {
        if let Err(e) = self.sender.send(args) {
            log::warn!("Failed to enqueue flag job: {e}");
            return false;
        }
        true
    }

    /// Post created/edited hook. Returns whether a flag job was enqueued.
    pub fn on_post_event(&self, event: PostEvent, post: &Post) -> bool {
        if !self.moderator.wants_flag_check(post) {
            log::debug!("Post {} skipped on {event:?}", post.id);
            return false;
        }
        self.enqueue(FlagToxicPostArgs {
            post_id: Some(post.id),
        })
    }
}
