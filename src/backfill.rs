use crate::forum::Post;
use crate::pipeline::Moderator;
use crate::store::PluginStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub const LAST_CHECKED_POST_ID_KEY: &str = "last_checked_post_id";
pub const LAST_CHECKED_TIME_KEY: &str = "last_checked_iteration_timestamp";
pub const FAILED_POST_ID_KEY: &str = "failed_post_ids";

/// How a scanner run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Moderation or backfill mode is off.
    Idle,
    /// Retries used the whole batch budget.
    BudgetSpent,
    CheckpointAdvanced,
    /// The full pass was complete and a new one starts from 0.
    IterationReset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub retried: usize,
    pub scanned: usize,
    pub failed: Vec<i64>,
    pub checkpoint: i64,
}

/// Persisted cursor of the historical sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub last_checked_id: i64,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn load(store: &PluginStore) -> Result<Self> {
        Ok(Self {
            last_checked_id: store.get(LAST_CHECKED_POST_ID_KEY)?.unwrap_or(0),
            last_checked_at: store.get(LAST_CHECKED_TIME_KEY)?,
        })
    }
}

/// Ordered, duplicate-free list of post ids waiting for another attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryQueue {
    ids: Vec<i64>,
}

impl RetryQueue {
    pub fn load(store: &PluginStore) -> Result<Self> {
        let ids: Vec<i64> = store.get(FAILED_POST_ID_KEY)?.unwrap_or_default();
        let mut queue = Self::default();
        queue.extend(ids);
        Ok(queue)
    }

    pub fn save(&self, store: &PluginStore) -> Result<()> {
        store.set(FAILED_POST_ID_KEY, &self.ids)
    }

    /// Append ids not already queued, keeping first-seen order.
    pub fn extend(&mut self, ids: impl IntoIterator<Item = i64>) {
        let mut seen: HashSet<i64> = self.ids.iter().copied().collect();
        for id in ids {
            if seen.insert(id) {
                self.ids.push(id);
            }
        }
    }

    /// Remove and return up to `n` ids from the head.
    pub fn split_head(&mut self, n: usize) -> Vec<i64> {
        let n = n.min(self.ids.len());
        self.ids.drain(..n).collect()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Periodic sweep over historical posts.
///
/// Each run first spends its batch budget on the retry queue, then scans
/// forward from the checkpoint with what is left. The checkpoint advances
/// past failed posts; they are picked up again through the retry queue.
pub struct InspectToxicPosts {
    moderator: Arc<Moderator>,
    store: Arc<PluginStore>,
    batch_size: usize,
}

impl InspectToxicPosts {
    pub fn new(moderator: Arc<Moderator>, store: Arc<PluginStore>, batch_size: usize) -> Self {
        Self {
            moderator,
            store,
            batch_size,
        }
    }

    pub async fn execute(&self) -> Result<ScanReport> {
        self.execute_at(Utc::now()).await
    }

    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let settings = self.moderator.settings();
        if !(settings.enabled && settings.backfill_posts) {
            return Ok(ScanReport {
                outcome: ScanOutcome::Idle,
                retried: 0,
                scanned: 0,
                failed: Vec::new(),
                checkpoint: Checkpoint::load(&self.store)?.last_checked_id,
            });
        }

        let (retried, remaining) = self.retry_failed_checks(self.batch_size).await?;
        if remaining == 0 {
            log::debug!("Retry queue used the whole batch of {}", self.batch_size);
            return Ok(ScanReport {
                outcome: ScanOutcome::BudgetSpent,
                retried,
                scanned: 0,
                failed: Vec::new(),
                checkpoint: Checkpoint::load(&self.store)?.last_checked_id,
            });
        }

        let mut report = self.check_posts(remaining, now).await?;
        report.retried = retried;
        Ok(report)
    }

    /// Retry up to `batch_size` queued posts. Returns how many were consumed
    /// and the budget left for scanning.
    pub async fn retry_failed_checks(&self, batch_size: usize) -> Result<(usize, usize)> {
        if batch_size == 0 {
            return Ok((0, 0));
        }
        let mut queue = RetryQueue::load(&self.store)?;
        let consumed = queue.split_head(batch_size);
        let mut still_failing = Vec::new();

        for &post_id in &consumed {
            let post = match self.moderator.posts().find_post_with_deleted(post_id) {
                Ok(Some(post)) => post,
                Ok(None) => {
                    log::debug!("Queued post {post_id} no longer exists, dropping it");
                    continue;
                }
                Err(e) => {
                    log::warn!("Could not load queued post {post_id}: {e}");
                    still_failing.push(post_id);
                    continue;
                }
            };
            if !self.moderator.should_check_post(&post) {
                log::debug!("Queued post {post_id} is no longer eligible, dropping it");
                continue;
            }
            if let Err(e) = self.moderator.backfill_post_check(&post).await {
                log::warn!("Retry of post {post_id} failed: {e}");
                still_failing.push(post_id);
            }
        }

        queue.extend(still_failing);
        queue.save(&self.store)?;
        Ok((consumed.len(), batch_size - consumed.len()))
    }

    /// Scan up to `batch_size` posts past the checkpoint.
    pub async fn check_posts(&self, batch_size: usize, now: DateTime<Utc>) -> Result<ScanReport> {
        let checkpoint = Checkpoint::load(&self.store)?;
        let posts = self
            .moderator
            .posts()
            .posts_after(checkpoint.last_checked_id, batch_size)?;

        let mut queued = BTreeSet::new();
        let mut checked = HashSet::new();
        let mut last_id = checkpoint.last_checked_id;

        for post in &posts {
            queued.insert(post.id);
            last_id = last_id.max(post.id);
            if self.check_one(post).await {
                checked.insert(post.id);
            }
        }

        self.set_last_checked_post_id(last_id)?;

        let failed: Vec<i64> = queued
            .into_iter()
            .filter(|id| !checked.contains(id))
            .collect();
        if !failed.is_empty() {
            let mut queue = RetryQueue::load(&self.store)?;
            queue.extend(failed.iter().copied());
            queue.save(&self.store)?;
            log::info!(
                "{} posts failed scoring, {} queued for retry",
                failed.len(),
                queue.len()
            );
        }

        let outcome = if self.can_start_next_iteration(last_id, now)? {
            self.start_new_iteration(now)?;
            ScanOutcome::IterationReset
        } else {
            ScanOutcome::CheckpointAdvanced
        };

        Ok(ScanReport {
            outcome,
            retried: 0,
            scanned: posts.len(),
            failed,
            checkpoint: Checkpoint::load(&self.store)?.last_checked_id,
        })
    }

    /// Whether `post` is settled for this pass. Ineligible posts count as
    /// settled; they have nothing to retry.
    async fn check_one(&self, post: &Post) -> bool {
        if !self.moderator.should_check_post(post) {
            return true;
        }
        match self.moderator.backfill_post_check(post).await {
            Ok(score) => {
                log::debug!("Post {} scored {:.3}", post.id, score.score);
                true
            }
            Err(e) => {
                log::warn!("Backfill check of post {} failed: {e}", post.id);
                false
            }
        }
    }

    pub fn set_last_checked_post_id(&self, id: i64) -> Result<()> {
        self.store.set(LAST_CHECKED_POST_ID_KEY, &id)
    }

    /// A pass is complete once the cursor reached the newest post and the
    /// cooldown since the previous completed pass has elapsed.
    pub fn can_start_next_iteration(&self, last_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let Some(max_id) = self.moderator.posts().max_post_id()? else {
            return Ok(false);
        };
        if last_id < max_id {
            return Ok(false);
        }
        let Some(last_completed) = Checkpoint::load(&self.store)?.last_checked_at else {
            return Ok(true);
        };
        let days = self.moderator.settings().historical_inspection_period_days;
        let cooldown = Duration::try_days(days)
            .ok_or_else(|| anyhow::anyhow!("Inspection period of {days} days is out of range"))?;
        Ok(now.signed_duration_since(last_completed) >= cooldown)
    }

    pub fn start_new_iteration(&self, now: DateTime<Utc>) -> Result<()> {
        log::info!("Historical inspection pass complete, starting over");
        self.store.set(LAST_CHECKED_TIME_KEY, &now)?;
        self.set_last_checked_post_id(0)
    }
}
