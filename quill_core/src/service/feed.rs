use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, QueryTrait, Select, SelectTwo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use zel_core::prelude::*;

use crate::{
    cache::{fragment_key, FragmentCache},
    entity::prelude::*,
    error::{Outcome, Redirect},
    ids::{GroupId, PostId, UserId},
    pagination::{self, Page},
    service::{follows::FollowsService, viewer::Viewer},
};

/// View name the global feed fragment is cached under.
pub const INDEX_FRAGMENT: &str = "index_page";

#[derive(Debug, Error)]
pub enum FeedServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("group not found")]
    GroupNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("unauthorized: staff only")]
    Unauthorized,

    #[error(transparent)]
    Follows(#[from] crate::service::follows::FollowsServiceError),
}

impl From<FeedServiceError> for ResourceError {
    fn from(error: FeedServiceError) -> Self {
        match error {
            FeedServiceError::DbError(error) => ResourceError::infra(error),
            FeedServiceError::GroupNotFound => ResourceError::app(error),
            FeedServiceError::UserNotFound => ResourceError::app(error),
            FeedServiceError::Unauthorized => ResourceError::app(error),
            FeedServiceError::Follows(error) => error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub slug: String,
    pub title: String,
}

/// A post as it appears in a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostView {
    pub id: PostId,
    pub text: String,
    pub author_id: UserId,
    pub author_username: String,
    pub group: Option<GroupSummary>,
    pub image: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFeed {
    pub group: GroupModel,
    pub page: Page<PostView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileView {
    pub author: UserModel,
    pub page: Page<PostView>,
    pub post_count: u64,
    pub follower_count: u64,
    pub following_count: u64,
    /// Whether the viewer follows this author. Always false for anonymous viewers.
    pub following: bool,
}

/// Which posts a feed shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedQuery {
    All,
    Group(GroupId),
    Author(UserId),
    /// Posts by every author the given user follows.
    FollowedBy(UserId),
}

impl FeedQuery {
    /// Fresh select for this feed, newest first.
    pub fn select(&self) -> SelectTwo<Post, User> {
        let select: Select<Post> = match self {
            FeedQuery::All => Post::find(),
            FeedQuery::Group(group_id) => Post::find().filter(PostColumn::GroupId.eq(*group_id)),
            FeedQuery::Author(author_id) => {
                Post::find().filter(PostColumn::AuthorId.eq(*author_id))
            }
            FeedQuery::FollowedBy(subscriber) => Post::find().filter(
                PostColumn::AuthorId.in_subquery(
                    Follow::find()
                        .select_only()
                        .column(FollowColumn::AuthorId)
                        .filter(FollowColumn::UserId.eq(*subscriber))
                        .into_query(),
                ),
            ),
        };

        select
            .order_by_desc(PostColumn::CreatedAt)
            .order_by_desc(PostColumn::Id)
            .find_also_related(User)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeedSettings {
    pub page_size: u64,
    pub fragment_ttl: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 10,
            fragment_ttl: Duration::from_secs(20),
        }
    }
}

#[derive(Clone)]
pub struct FeedService {
    db: DatabaseConnection,
    follows: FollowsService,
    cache: Arc<dyn FragmentCache>,
    settings: FeedSettings,
}

impl FeedService {
    pub fn new(
        db: DatabaseConnection,
        cache: Arc<dyn FragmentCache>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            follows: FollowsService::new(db.clone()),
            db,
            cache,
            settings,
        }
    }

    /// Run a feed query and cut out the requested page
    pub async fn _page(
        &self,
        query: &FeedQuery,
        page: Option<u64>,
    ) -> Result<Page<PostView>, FeedServiceError> {
        let per_page = self.settings.page_size.max(1);

        let paginator = query.select().paginate(&self.db, per_page);
        let total_items = paginator.num_items().await?;
        let number = pagination::resolve_page(page, total_items, per_page);
        let rows = paginator.fetch_page(number - 1).await?;

        Ok(Page {
            items: hydrate(&self.db, rows).await?,
            number,
            num_pages: pagination::num_pages(total_items, per_page),
            total_items,
            per_page,
        })
    }

    /// Global feed, served from the fragment cache while the fragment is fresh
    pub async fn _index(&self, page: Option<u64>) -> Result<Page<PostView>, FeedServiceError> {
        let requested = page.unwrap_or(1).to_string();
        let key = fragment_key(INDEX_FRAGMENT, &[&requested]);

        if let Some(fragment) = self.cache.get(&key).await {
            match serde_json::from_slice(&fragment) {
                Ok(page) => return Ok(page),
                Err(error) => warn!(key = %key, %error, "discarding unreadable fragment"),
            }
        }

        let rendered = self._page(&FeedQuery::All, page).await?;
        match serde_json::to_vec(&rendered) {
            Ok(fragment) => {
                self.cache
                    .set(key, Bytes::from(fragment), self.settings.fragment_ttl)
                    .await
            }
            Err(error) => warn!(%error, "could not render index fragment"),
        }

        Ok(rendered)
    }

    /// Posts of the group with the given slug
    pub async fn _group_feed(
        &self,
        slug: &str,
        page: Option<u64>,
    ) -> Result<GroupFeed, FeedServiceError> {
        let group = Group::find()
            .filter(GroupColumn::Slug.eq(slug))
            .one(&self.db)
            .await?
            .ok_or(FeedServiceError::GroupNotFound)?;

        let page = self._page(&FeedQuery::Group(group.id), page).await?;
        Ok(GroupFeed { group, page })
    }

    /// Posts by a user, plus their subscription counters
    pub async fn _profile(
        &self,
        viewer: &Viewer,
        username: &str,
        page: Option<u64>,
    ) -> Result<ProfileView, FeedServiceError> {
        let author = User::find()
            .filter(UserColumn::Username.eq(username))
            .one(&self.db)
            .await?
            .ok_or(FeedServiceError::UserNotFound)?;

        let page = self._page(&FeedQuery::Author(author.id), page).await?;

        let following = match viewer.user() {
            Some(user) => self.follows._is_following(user.id, author.id).await?,
            None => false,
        };

        Ok(ProfileView {
            post_count: page.total_items,
            follower_count: self.follows._follower_count(author.id).await?,
            following_count: self.follows._following_count(author.id).await?,
            following,
            author,
            page,
        })
    }

    /// Posts by every author the viewer follows
    pub async fn _follow_index(
        &self,
        viewer: &Viewer,
        page: Option<u64>,
    ) -> Result<Outcome<Page<PostView>>, FeedServiceError> {
        let user = match viewer.require("/follow/") {
            Ok(user) => user,
            Err(redirect) => return Ok(Outcome::Redirect(redirect)),
        };

        debug!(user_id = %user.id, "composing following feed");

        let page = self._page(&FeedQuery::FollowedBy(user.id), page).await?;
        Ok(Outcome::Done(page))
    }

    /// Drop every cached fragment (staff only)
    pub async fn _clear_cache(&self, viewer: &Viewer) -> Result<Outcome<()>, FeedServiceError> {
        if viewer.user().is_none() {
            return Ok(Outcome::Redirect(Redirect::login("/")));
        }
        if !viewer.is_staff() {
            return Err(FeedServiceError::Unauthorized);
        }

        self.cache.clear().await;
        Ok(Outcome::Done(()))
    }
}

/// Attach group summaries to posts already joined with their authors
pub(crate) async fn hydrate<C>(
    db: &C,
    rows: Vec<(PostModel, Option<UserModel>)>,
) -> Result<Vec<PostView>, DbErr>
where
    C: ConnectionTrait,
{
    let mut group_ids: Vec<GroupId> = rows.iter().filter_map(|(post, _)| post.group_id).collect();
    group_ids.sort_by_key(|id| *id.as_uuid());
    group_ids.dedup();

    let groups: HashMap<GroupId, GroupSummary> = if group_ids.is_empty() {
        HashMap::new()
    } else {
        Group::find()
            .filter(GroupColumn::Id.is_in(group_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|group| {
                (
                    group.id,
                    GroupSummary {
                        id: group.id,
                        slug: group.slug,
                        title: group.title,
                    },
                )
            })
            .collect()
    };

    Ok(rows
        .into_iter()
        .map(|(post, author)| PostView {
            group: post.group_id.and_then(|id| groups.get(&id).cloned()),
            author_username: author.map(|user| user.username).unwrap_or_default(),
            id: post.id,
            text: post.text,
            author_id: post.author_id,
            image: post.image,
            created_at: post.created_at,
        })
        .collect())
}

#[zel_service(name = "feed")]
trait Feed {
    #[doc = "All posts, newest first"]
    #[method(name = "index")]
    async fn index(&self, page: Option<u64>) -> Result<Page<PostView>, ResourceError>;

    #[doc = "Posts of a group"]
    #[method(name = "group_feed")]
    async fn group_feed(&self, slug: String, page: Option<u64>)
        -> Result<GroupFeed, ResourceError>;

    #[doc = "Posts by a user with follower counts"]
    #[method(name = "profile")]
    async fn profile(&self, username: String, page: Option<u64>)
        -> Result<ProfileView, ResourceError>;

    #[doc = "Posts by the authors the caller follows"]
    #[method(name = "follow_index")]
    async fn follow_index(&self, page: Option<u64>)
        -> Result<Outcome<Page<PostView>>, ResourceError>;

    #[doc = "Flush the fragment cache"]
    #[method(name = "clear_cache")]
    async fn clear_cache(&self) -> Result<Outcome<()>, ResourceError>;
}

#[async_trait]
impl FeedServer for FeedService {
    async fn index(
        &self,
        _ctx: RequestContext,
        page: Option<u64>,
    ) -> Result<Page<PostView>, ResourceError> {
        Ok(self._index(page).await?)
    }

    async fn group_feed(
        &self,
        _ctx: RequestContext,
        slug: String,
        page: Option<u64>,
    ) -> Result<GroupFeed, ResourceError> {
        Ok(self._group_feed(&slug, page).await?)
    }

    async fn profile(
        &self,
        ctx: RequestContext,
        username: String,
        page: Option<u64>,
    ) -> Result<ProfileView, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(FeedServiceError::from)?;
        Ok(self._profile(&viewer, &username, page).await?)
    }

    async fn follow_index(
        &self,
        ctx: RequestContext,
        page: Option<u64>,
    ) -> Result<Outcome<Page<PostView>>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(FeedServiceError::from)?;
        Ok(self._follow_index(&viewer, page).await?)
    }

    async fn clear_cache(&self, ctx: RequestContext) -> Result<Outcome<()>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(FeedServiceError::from)?;
        Ok(self._clear_cache(&viewer).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryFragmentCache;
    use crate::models::test_db;
    use crate::service::fixtures::{
        create_group, create_posts, create_staff, create_user, signed_in,
    };

    struct Harness {
        service: FeedService,
        cache: Arc<MemoryFragmentCache>,
    }

    async fn setup_test_service() -> Harness {
        let cache = Arc::new(MemoryFragmentCache::new());
        let service = FeedService::new(
            test_db().await,
            cache.clone(),
            FeedSettings {
                page_size: 10,
                fragment_ttl: Duration::from_secs(60),
            },
        );
        Harness { service, cache }
    }

    fn ids(page: &Page<PostView>) -> Vec<PostId> {
        page.items.iter().map(|p| p.id).collect()
    }

    #[tokio::test]
    async fn test_pagination_clamps_to_last_page() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let author = create_user(db, "prolific").await;
        let group = create_group(db, "cats").await;
        create_posts(db, &author, Some(&group), 26).await;

        let first = h.service._page(&FeedQuery::All, None).await.unwrap();
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.number, 1);
        assert_eq!(first.num_pages, 3);
        assert_eq!(first.total_items, 26);
        assert!(first.has_next());

        let third = h.service._page(&FeedQuery::All, Some(3)).await.unwrap();
        assert_eq!(third.items.len(), 6);

        let fourth = h.service._page(&FeedQuery::All, Some(4)).await.unwrap();
        assert_eq!(fourth.number, 3);
        assert_eq!(ids(&fourth), ids(&third));

        // Same clamping for the group and profile feeds
        let group_third = h.service._group_feed("cats", Some(3)).await.unwrap();
        assert_eq!(group_third.page.items.len(), 6);
        let profile_far = h
            .service
            ._profile(&Viewer::Anonymous, "prolific", Some(99))
            .await
            .unwrap();
        assert_eq!(profile_far.page.items.len(), 6);
        assert_eq!(profile_far.post_count, 26);
    }

    #[tokio::test]
    async fn test_feeds_are_newest_first() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let author = create_user(db, "writer").await;
        let posts = create_posts(db, &author, None, 3).await;

        let page = h.service._page(&FeedQuery::All, None).await.unwrap();
        let expected: Vec<PostId> = posts.iter().rev().map(|p| p.id).collect();
        assert_eq!(ids(&page), expected);
        assert_eq!(page.items[0].author_username, "writer");
    }

    #[tokio::test]
    async fn test_group_feed_only_shows_group_posts() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let author = create_user(db, "writer").await;
        let cats = create_group(db, "cats").await;
        let dogs = create_group(db, "dogs").await;
        create_posts(db, &author, Some(&cats), 2).await;
        create_posts(db, &author, Some(&dogs), 3).await;
        create_posts(db, &author, None, 1).await;

        let feed = h.service._group_feed("cats", None).await.unwrap();
        assert_eq!(feed.group.id, cats.id);
        assert_eq!(feed.page.total_items, 2);
        assert!(feed
            .page
            .items
            .iter()
            .all(|p| p.group.as_ref().map(|g| g.slug.as_str()) == Some("cats")));
    }

    #[tokio::test]
    async fn test_unknown_group_and_user() {
        let h = setup_test_service().await;

        let group = h.service._group_feed("nope", None).await;
        assert!(matches!(group, Err(FeedServiceError::GroupNotFound)));

        let profile = h.service._profile(&Viewer::Anonymous, "nobody", None).await;
        assert!(matches!(profile, Err(FeedServiceError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_profile_reports_follow_state() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let reader = create_user(db, "reader").await;
        let writer = create_user(db, "writer").await;
        create_posts(db, &writer, None, 2).await;
        h.service.follows._follow(reader.id, writer.id).await.unwrap();

        let as_reader = h
            .service
            ._profile(&signed_in(&reader), "writer", None)
            .await
            .unwrap();
        assert!(as_reader.following);
        assert_eq!(as_reader.follower_count, 1);
        assert_eq!(as_reader.following_count, 0);
        assert_eq!(as_reader.post_count, 2);

        let as_guest = h
            .service
            ._profile(&Viewer::Anonymous, "writer", None)
            .await
            .unwrap();
        assert!(!as_guest.following);
    }

    #[tokio::test]
    async fn test_following_feed_is_union_of_followed_authors() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let reader = create_user(db, "reader").await;
        let a = create_user(db, "a").await;
        let b = create_user(db, "b").await;
        let stranger = create_user(db, "stranger").await;
        let a_posts = create_posts(db, &a, None, 2).await;
        let b_posts = create_posts(db, &b, None, 3).await;
        create_posts(db, &stranger, None, 4).await;
        create_posts(db, &reader, None, 1).await;

        h.service.follows._follow(reader.id, a.id).await.unwrap();
        h.service.follows._follow(reader.id, b.id).await.unwrap();

        let page = h
            .service
            ._follow_index(&signed_in(&reader), None)
            .await
            .unwrap()
            .done()
            .unwrap();

        let mut got = ids(&page);
        let mut expected: Vec<PostId> = a_posts.iter().chain(&b_posts).map(|p| p.id).collect();
        got.sort_by_key(|id| *id.as_uuid());
        expected.sort_by_key(|id| *id.as_uuid());
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_following_feed_binds_only_the_subscriber() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let reader = create_user(db, "reader").await;
        for i in 0..30 {
            let author = create_user(db, &format!("author{i}")).await;
            create_posts(db, &author, None, 1).await;
            h.service.follows._follow(reader.id, author.id).await.unwrap();
        }

        let statement = FeedQuery::FollowedBy(reader.id)
            .select()
            .build(sea_orm::DbBackend::Sqlite);
        assert!(statement.sql.contains("IN (SELECT"));
        assert_eq!(statement.values.map(|v| v.0.len()), Some(1));

        let page = h
            .service
            ._follow_index(&signed_in(&reader), Some(3))
            .await
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(page.total_items, 30);
        assert_eq!(page.items.len(), 10);
    }

    #[tokio::test]
    async fn test_following_feed_empty_when_following_nobody() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let loner = create_user(db, "loner").await;
        let other = create_user(db, "other").await;
        create_posts(db, &other, None, 5).await;

        let page = h
            .service
            ._follow_index(&signed_in(&loner), Some(2))
            .await
            .unwrap()
            .done()
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_items, 0);
        assert_eq!(page.num_pages, 1);
    }

    #[tokio::test]
    async fn test_following_feed_requires_login() {
        let h = setup_test_service().await;

        let outcome = h
            .service
            ._follow_index(&Viewer::Anonymous, None)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Redirect(Redirect::login("/follow/")));
    }

    #[tokio::test]
    async fn test_index_serves_stale_fragment_until_cleared() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let author = create_user(db, "writer").await;
        create_posts(db, &author, None, 3).await;

        let before = h.service._index(None).await.unwrap();
        assert_eq!(before.items.len(), 3);

        Post::delete_many().exec(db).await.unwrap();

        let stale = h.service._index(None).await.unwrap();
        assert_eq!(stale, before);

        h.cache.clear().await;

        let fresh = h.service._index(None).await.unwrap();
        assert!(fresh.items.is_empty());
    }

    #[tokio::test]
    async fn test_index_fragment_expires() {
        let cache = Arc::new(MemoryFragmentCache::new());
        let service = FeedService::new(
            test_db().await,
            cache.clone(),
            FeedSettings {
                page_size: 10,
                fragment_ttl: Duration::from_millis(20),
            },
        );
        let author = create_user(&service.db, "writer").await;
        create_posts(&service.db, &author, None, 2).await;

        assert_eq!(service._index(None).await.unwrap().items.len(), 2);
        Post::delete_many().exec(&service.db).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(service._index(None).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_index_pages_do_not_pile_up() {
        let cache = Arc::new(MemoryFragmentCache::new());
        let service = FeedService::new(
            test_db().await,
            cache.clone(),
            FeedSettings {
                page_size: 10,
                fragment_ttl: Duration::from_millis(500),
            },
        );
        let author = create_user(&service.db, "writer").await;
        create_posts(&service.db, &author, None, 26).await;

        for requested in 100..140 {
            let page = service._index(Some(requested)).await.unwrap();
            assert_eq!(page.number, 3);
        }
        assert_eq!(cache.len(), 40);

        tokio::time::sleep(Duration::from_millis(600)).await;
        service._index(Some(1_000)).await.unwrap();

        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_index_pages_are_cached_separately() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let author = create_user(db, "writer").await;
        create_posts(db, &author, None, 12).await;

        let first = h.service._index(Some(1)).await.unwrap();
        let second = h.service._index(Some(2)).await.unwrap();
        assert_eq!(first.items.len(), 10);
        assert_eq!(second.items.len(), 2);
        assert_eq!(h.cache.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_cache_is_staff_only() {
        let h = setup_test_service().await;
        let db = &h.service.db;
        let user = create_user(db, "user").await;
        let staff = create_staff(db, "staff").await;
        h.service._index(None).await.unwrap();

        let anonymous = h.service._clear_cache(&Viewer::Anonymous).await.unwrap();
        assert!(matches!(anonymous, Outcome::Redirect(Redirect::Login { .. })));

        let denied = h.service._clear_cache(&signed_in(&user)).await;
        assert!(matches!(denied, Err(FeedServiceError::Unauthorized)));
        assert_eq!(h.cache.len(), 1);

        let cleared = h.service._clear_cache(&signed_in(&staff)).await.unwrap();
        assert!(cleared.is_done());
        assert!(h.cache.is_empty());
    }
}
