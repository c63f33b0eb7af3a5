use crate::eligibility::EligibilityContext;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

/// Identity used for actions the sidecar takes on its own behalf.
pub const SYSTEM_USER_ID: i64 = -1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    #[serde(default)]
    pub private_message: bool,
    #[serde(default)]
    pub read_restricted: bool,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: Option<i64>,
    pub raw: String,
    pub topic: Option<Topic>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub custom_fields: BTreeMap<String, f64>,
}

impl Post {
    pub fn eligibility(&self) -> EligibilityContext<'_> {
        let topic = self.topic.as_ref();
        EligibilityContext {
            user_id: self.user_id,
            raw: &self.raw,
            private_message: topic.is_some_and(|t| t.private_message),
            read_restricted: topic.is_some_and(|t| t.read_restricted),
            topic_trashed: topic.is_some_and(|t| t.deleted),
        }
    }
}

/// Moderator-visible notification raised against a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub post_id: i64,
    pub actor_id: i64,
    pub message: String,
}

/// Read/write access to the host's post records.
pub trait PostRepository: Send + Sync {
    /// Live post by id.
    fn find_post(&self, id: i64) -> anyhow::Result<Option<Post>>;

    /// Post by id, including deleted ones.
    fn find_post_with_deleted(&self, id: i64) -> anyhow::Result<Option<Post>>;

    /// Live posts with `id > after_id`, ascending, at most `limit`.
    fn posts_after(&self, after_id: i64, limit: usize) -> anyhow::Result<Vec<Post>>;

    /// Largest id among the posts `posts_after` can return. Both methods
    /// must see the same live set or a sweep never reaches the end.
    fn max_post_id(&self) -> anyhow::Result<Option<i64>>;

    fn save_custom_field(&self, post_id: i64, name: &str, value: f64) -> anyhow::Result<()>;
}

pub trait ModeratorActions: Send + Sync {
    fn notify_moderators(&self, post: &Post, actor_id: i64, message: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    posts: Vec<Post>,
    #[serde(default)]
    flags: Vec<FlagRecord>,
}

/// Host store backed by a JSON snapshot of posts, kept in memory.
#[derive(Debug, Default)]
pub struct MemoryForum {
    posts: RwLock<BTreeMap<i64, Post>>,
    flags: Mutex<Vec<FlagRecord>>,
}

impl MemoryForum {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts: RwLock::new(posts.into_iter().map(|p| (p.id, p)).collect()),
            flags: Mutex::new(Vec::new()),
        }
    }

    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read post snapshot: {path}"))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse post snapshot: {path}"))?;
        let forum = Self::new(snapshot.posts);
        *forum.lock_flags()? = snapshot.flags;
        Ok(forum)
    }

    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let snapshot = Snapshot {
            posts: self.read_posts()?.values().cloned().collect(),
            flags: self.flags()?,
        };
        std::fs::write(path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("Failed to write post snapshot: {path}"))?;
        Ok(())
    }

    pub fn insert(&self, post: Post) -> anyhow::Result<()> {
        self.write_posts()?.insert(post.id, post);
        Ok(())
    }

    pub fn flags(&self) -> anyhow::Result<Vec<FlagRecord>> {
        Ok(self.lock_flags()?.clone())
    }

    fn read_posts(&self) -> anyhow::Result<std::sync::RwLockReadGuard<'_, BTreeMap<i64, Post>>> {
        self.posts
            .read()
            .map_err(|_| anyhow::anyhow!("post table lock poisoned"))
    }

    fn write_posts(&self) -> anyhow::Result<std::sync::RwLockWriteGuard<'_, BTreeMap<i64, Post>>> {
        self.posts
            .write()
            .map_err(|_| anyhow::anyhow!("post table lock poisoned"))
    }

    fn lock_flags(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Vec<FlagRecord>>> {
        self.flags
            .lock()
            .map_err(|_| anyhow::anyhow!("flag list lock poisoned"))
    }
}

impl PostRepository for MemoryForum {
    fn find_post(&self, id: i64) -> anyhow::Result<Option<Post>> {
        Ok(self.read_posts()?.get(&id).filter(|p| !p.deleted).cloned())
    }

    fn find_post_with_deleted(&self, id: i64) -> anyhow::Result<Option<Post>> {
        Ok(self.read_posts()?.get(&id).cloned())
    }

    fn posts_after(&self, after_id: i64, limit: usize) -> anyhow::Result<Vec<Post>> {
        Ok(self
            .read_posts()?
            .range(after_id.saturating_add(1)..)
            .map(|(_, p)| p)
            .filter(|p| !p.deleted)
            .take(limit)
            .cloned()
            .collect())
    }

    fn max_post_id(&self) -> anyhow::Result<Option<i64>> {
        Ok(self
            .read_posts()?
            .values()
            .filter(|p| !p.deleted)
            .map(|p| p.id)
            .next_back())
    }

    fn save_custom_field(&self, post_id: i64, name: &str, value: f64) -> anyhow::Result<()> {
        let mut posts = self.write_posts()?;
        let post = posts
            .get_mut(&post_id)
            .ok_or_else(|| anyhow::anyhow!("post {post_id} not found"))?;
        post.custom_fields.insert(name.to_string(), value);
        Ok(())
    }
}

impl ModeratorActions for MemoryForum {
    fn notify_moderators(&self, post: &Post, actor_id: i64, message: &str) -> anyhow::Result<()> {
        log::info!("Post {} flagged for moderator review", post.id);
        self.lock_flags()?.push(FlagRecord {
            post_id: post.id,
            actor_id,
            message: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: i64) -> Post {
        Post {
            id,
            user_id: Some(3),
            raw: format!("post {id}"),
            ..Post::default()
        }
    }

    #[test]
    fn test_posts_after_is_keyset_ordered() {
        let forum = MemoryForum::new(vec![post(105), post(101), post(110), post(3)]);
        let ids: Vec<i64> = forum.posts_after(0, 2).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 101]);
        let ids: Vec<i64> = forum.posts_after(101, 10).unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![105, 110]);
        assert_eq!(forum.max_post_id().unwrap(), Some(110));
    }

    #[test]
    fn test_deleted_posts_only_visible_with_deleted() {
        let mut deleted = post(4);
        deleted.deleted = true;
        let forum = MemoryForum::new(vec![post(1), deleted]);

        assert!(forum.find_post(4).unwrap().is_none());
        assert!(forum.find_post_with_deleted(4).unwrap().is_some());
        assert_eq!(forum.posts_after(0, 10).unwrap().len(), 1);
        assert_eq!(forum.max_post_id().unwrap(), Some(1));
    }

    #[test]
    fn test_eligibility_view_reads_topic() {
        let mut post = post(9);
        post.topic = Some(Topic {
            id: 1,
            private_message: true,
            read_restricted: false,
            deleted: true,
        });
        let view = post.eligibility();
        assert!(view.private_message);
        assert!(!view.read_restricted);
        assert!(view.topic_trashed);
        assert_eq!(view.raw, "post 9");
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.json");
        let path = path.to_str().unwrap();

        let forum = MemoryForum::new(vec![post(1)]);
        forum.save_custom_field(1, "post_perspective_toxicity", 0.25).unwrap();
        forum
            .notify_moderators(&post(1), SYSTEM_USER_ID, "flagged")
            .unwrap();
        forum.save_to_file(path).unwrap();

        let loaded = MemoryForum::load_from_file(path).unwrap();
        let post = loaded.find_post(1).unwrap().unwrap();
        assert_eq!(post.custom_fields["post_perspective_toxicity"], 0.25);
        assert_eq!(loaded.flags().unwrap().len(), 1);
    }
}
