//! Feed assembly.
//!
//! Every flavor runs the same pipeline and differs only in its base query:
//! one page query with embedded authors, then the viewer's like/save lookups
//! and one batched load per post variant, all concurrently, stitched back in
//! base-query order. Probe and enricher failures degrade the affected fields;
//! only the base query, the count, and cancellation fail the page.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    enrich::EnricherRegistry,
    error::AppError,
    models::{
        feed::FeedPage,
        post::{Extension, Post, PostVariant},
    },
    repository::{HashtagRepository, PostRepository},
    store::{Filter, Order, Query, Store, StoreError, decode_rows, tables},
};

/// Most recent hashtag links considered for a hashtag feed.
pub const HASHTAG_SCAN_LIMIT: usize = 1000;
/// Most followed accounts considered for the following feed.
pub const FOLLOWING_SCAN_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedKind {
    Home,
    Following,
    Explore,
    Hashtag(String),
    Saved,
    /// One author's posts.
    User(Uuid),
}

impl FeedKind {
    pub fn name(&self) -> &'static str {
        match self {
            FeedKind::Home => "home",
            FeedKind::Following => "following",
            FeedKind::Explore => "explore",
            FeedKind::Hashtag(_) => "hashtag",
            FeedKind::Saved => "saved",
            FeedKind::User(_) => "user",
        }
    }
}

/// Published and not deleted.
pub fn live_filter() -> Filter {
    Filter::new()
        .is_bool("is_published", true)
        .is_null("deleted_at")
}

pub fn public_filter() -> Filter {
    live_filter().eq("visibility", "public")
}

/// How a flavor selects and counts its posts.
enum Base {
    /// Paged by the store; total from a `count` query.
    Counted { filter: Filter, order: Vec<Order> },
    /// Paged by the store; total is the page length.
    Uncounted { filter: Filter, order: Vec<Order> },
    /// Ids already paged, in display order.
    Ordered { filter: Filter },
    Empty,
}

#[derive(Debug, Deserialize)]
struct FollowRow {
    following_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SavedRow {
    post_id: Uuid,
}

#[derive(Clone)]
pub struct FeedAssembler {
    store: Arc<dyn Store>,
    posts: PostRepository,
    hashtags: HashtagRepository,
    enrichers: EnricherRegistry,
}

impl FeedAssembler {
    pub fn new(
        store: Arc<dyn Store>,
        posts: PostRepository,
        hashtags: HashtagRepository,
        enrichers: EnricherRegistry,
    ) -> Self {
        Self {
            store,
            posts,
            hashtags,
            enrichers,
        }
    }

    pub async fn page(
        &self,
        kind: &FeedKind,
        viewer: Option<Uuid>,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<FeedPage, AppError> {
        let (base, saved_order) = self.base(kind, viewer, limit, offset, cancel).await?;

        let (mut posts, total) = match base {
            Base::Empty => return Ok(FeedPage::empty(limit, offset)),
            Base::Counted { filter, .. } if limit == 0 => {
                let total = self.posts.count(&filter, cancel).await?;
                return Ok(FeedPage {
                    total,
                    ..FeedPage::empty(limit, offset)
                });
            }
            _ if limit == 0 => return Ok(FeedPage::empty(limit, offset)),
            Base::Counted { filter, order } => {
                let (posts, total) = tokio::join!(
                    self.posts.page(&filter, &order, limit, offset, cancel),
                    self.posts.count(&filter, cancel),
                );
                (posts?, Some(total?))
            }
            Base::Uncounted { filter, order } => {
                (self.posts.page(&filter, &order, limit, offset, cancel).await?, None)
            }
            Base::Ordered { filter } => {
                let posts = self.posts.page(&filter, &[], limit, 0, cancel).await?;
                (reorder(posts, &saved_order), None)
            }
        };

        self.decorate(&mut posts, viewer, cancel).await?;

        let total = total.unwrap_or(posts.len() as u64);
        tracing::debug!(feed = kind.name(), count = posts.len(), total, "Feed page assembled");
        Ok(FeedPage {
            posts,
            total,
            limit,
            offset,
        })
    }

    async fn base(
        &self,
        kind: &FeedKind,
        viewer: Option<Uuid>,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<(Base, Vec<Uuid>), AppError> {
        let newest = vec![Order::desc("published_at")];
        let base = match kind {
            FeedKind::Home => Base::Counted {
                filter: public_filter(),
                order: newest,
            },
            FeedKind::Explore => Base::Counted {
                filter: public_filter(),
                order: vec![Order::desc("likes_count"), Order::desc("published_at")],
            },
            FeedKind::Following => {
                let viewer = require_viewer(viewer)?;
                let authors = self.following(viewer, cancel).await?;
                if authors.is_empty() {
                    Base::Empty
                } else {
                    Base::Counted {
                        filter: public_filter().in_list("author_id", &authors),
                        order: newest,
                    }
                }
            }
            FeedKind::Hashtag(tag) => {
                let hashtag = self
                    .hashtags
                    .find_by_tag(tag, cancel)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Hashtag '{}' not found", tag)))?;
                let ids = self
                    .hashtags
                    .post_ids(hashtag.id, HASHTAG_SCAN_LIMIT, cancel)
                    .await?;
                if ids.is_empty() {
                    Base::Empty
                } else {
                    Base::Uncounted {
                        filter: public_filter().in_list("id", &ids),
                        order: newest,
                    }
                }
            }
            FeedKind::Saved => {
                let viewer = require_viewer(viewer)?;
                if limit == 0 {
                    return Ok((Base::Empty, Vec::new()));
                }
                let ids = self.saved(viewer, limit, offset, cancel).await?;
                if ids.is_empty() {
                    Base::Empty
                } else {
                    let filter = live_filter().in_list("id", &ids);
                    return Ok((Base::Ordered { filter }, ids));
                }
            }
            FeedKind::User(author_id) => {
                let mut filter = live_filter().eq("author_id", author_id);
                if viewer != Some(*author_id) {
                    filter = filter.eq("visibility", "public");
                }
                Base::Counted {
                    filter,
                    order: newest,
                }
            }
        };
        Ok((base, Vec::new()))
    }

    async fn following(&self, viewer: Uuid, cancel: &CancellationToken) -> Result<Vec<Uuid>, StoreError> {
        let query = Query::new(Filter::new().eq("follower_id", viewer))
            .select("following_id")
            .limit(FOLLOWING_SCAN_LIMIT);
        let rows = self.store.select(tables::FOLLOWS, &query, cancel).await?;
        Ok(decode_rows::<FollowRow>(rows)?
            .into_iter()
            .map(|f| f.following_id)
            .collect())
    }

    async fn saved(
        &self,
        viewer: Uuid,
        limit: usize,
        offset: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Uuid>, StoreError> {
        let query = Query::new(Filter::new().eq("user_id", viewer))
            .select("post_id")
            .order(Order::desc("created_at"))
            .page(limit, offset);
        let rows = self.store.select(tables::SAVED_POSTS, &query, cancel).await?;
        Ok(decode_rows::<SavedRow>(rows)?
            .into_iter()
            .map(|s| s.post_id)
            .collect())
    }

    /// Viewer flags and variant extensions for a page, in place.
    async fn decorate(
        &self,
        posts: &mut [Post],
        viewer: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        if posts.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = posts.iter().map(|p| p.id).collect();

        let mut partitions: BTreeMap<PostVariant, Vec<Uuid>> = BTreeMap::new();
        for post in posts.iter() {
            if self.enrichers.get(post.variant).is_some() {
                partitions.entry(post.variant).or_default().push(post.id);
            }
        }

        let engagement = async {
            match viewer {
                Some(viewer) => {
                    let (likes, saves) = tokio::join!(
                        self.posts.batch_check_likes(&ids, viewer, cancel),
                        self.posts.batch_check_saves(&ids, viewer, cancel),
                    );
                    Some((likes, saves))
                }
                None => None,
            }
        };
        let enrichment = join_all(partitions.into_iter().filter_map(|(variant, ids)| {
            let enricher = self.enrichers.get(variant)?;
            Some(async move { (variant, enricher.load_batch(&ids, viewer, cancel).await) })
        }));
        let (engagement, enrichment) = tokio::join!(engagement, enrichment);

        // A cancelled sibling means the caller is gone; no partial page.
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let (likes, saves) = match engagement {
            Some((likes, saves)) => (
                degrade_lookup(likes, "like")?,
                degrade_lookup(saves, "save")?,
            ),
            None => (HashMap::new(), HashMap::new()),
        };

        let mut extensions: HashMap<Uuid, Extension> = HashMap::new();
        let mut failed: Vec<PostVariant> = Vec::new();
        for (variant, result) in enrichment {
            match result {
                Ok(loaded) => extensions.extend(loaded),
                Err(StoreError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    tracing::warn!(variant = variant.as_str(), "Enricher failed, returning posts without extension: {}", e);
                    failed.push(variant);
                }
            }
        }

        for post in posts.iter_mut() {
            post.is_liked = likes.get(&post.id).copied().unwrap_or(false);
            post.is_saved = saves.get(&post.id).copied().unwrap_or(false);

            if post.author.is_none() {
                tracing::warn!(post_id = %post.id, author_id = %post.author_id, "Post author could not be joined");
            }

            match extensions.remove(&post.id) {
                Some(extension) => post.attach(extension),
                None if self.enrichers.get(post.variant).is_some() && !failed.contains(&post.variant) => {
                    tracing::error!(
                        post_id = %post.id,
                        variant = post.variant.as_str(),
                        "Post has no extension row"
                    );
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn require_viewer(viewer: Option<Uuid>) -> Result<Uuid, AppError> {
    viewer.ok_or_else(|| AppError::AuthError("This feed requires a signed-in viewer".to_string()))
}

fn degrade_lookup(
    result: Result<HashMap<Uuid, bool>, StoreError>,
    what: &str,
) -> Result<HashMap<Uuid, bool>, AppError> {
    match result {
        Ok(found) => Ok(found),
        Err(StoreError::Cancelled) => Err(AppError::Cancelled),
        Err(e) => {
            tracing::warn!("Batch {} lookup failed, flags default to false: {}", what, e);
            Ok(HashMap::new())
        }
    }
}

/// Puts `posts` in the order of `ids`, dropping ids that did not resolve.
fn reorder(posts: Vec<Post>, ids: &[Uuid]) -> Vec<Post> {
    let mut by_id: HashMap<Uuid, Post> = posts.into_iter().map(|p| (p.id, p)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}
