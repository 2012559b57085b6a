use chrono::Utc;
use sea_orm::DatabaseConnection;
use thiserror::Error;
use tracing::{debug, info};
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::{is_unique_violation, Outcome, Redirect},
    ids::{FollowId, UserId},
    service::viewer::Viewer,
};

#[derive(Debug, Error)]
pub enum FollowsServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("user not found")]
    UserNotFound,
}

impl From<FollowsServiceError> for ResourceError {
    fn from(error: FollowsServiceError) -> Self {
        match error {
            FollowsServiceError::DbError(error) => ResourceError::infra(error),
            FollowsServiceError::UserNotFound => ResourceError::app(error),
        }
    }
}

/// Subscriptions between users.
///
/// `follow` and `unfollow` are idempotent: self-follows, repeated follows and
/// unfollowing a relation that does not exist are all quiet no-ops.
#[derive(Clone)]
pub struct FollowsService {
    db: DatabaseConnection,
}

impl FollowsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Subscribe `subscriber` to `author`. Returns whether a row was created.
    pub async fn _follow(
        &self,
        subscriber: UserId,
        author: UserId,
    ) -> Result<bool, FollowsServiceError> {
        if subscriber == author {
            debug!(user_id = %subscriber, "ignoring self-follow");
            return Ok(false);
        }

        if self._is_following(subscriber, author).await? {
            return Ok(false);
        }

        let follow = FollowActiveModel {
            id: Set(FollowId::new()),
            user_id: Set(subscriber),
            author_id: Set(author),
            created_at: Set(Utc::now()),
        };

        match Follow::insert(follow).exec(&self.db).await {
            Ok(_) => {
                info!(user_id = %subscriber, author_id = %author, "followed");
                Ok(true)
            }
            // A concurrent follow for the same pair got there first
            Err(error) if is_unique_violation(&error) => {
                debug!(user_id = %subscriber, author_id = %author, "follow already exists");
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Drop the subscription. Returns whether a row was removed.
    pub async fn _unfollow(
        &self,
        subscriber: UserId,
        author: UserId,
    ) -> Result<bool, FollowsServiceError> {
        let result = Follow::delete_many()
            .filter(FollowColumn::UserId.eq(subscriber))
            .filter(FollowColumn::AuthorId.eq(author))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            info!(user_id = %subscriber, author_id = %author, "unfollowed");
        }
        Ok(result.rows_affected > 0)
    }

    pub async fn _is_following(
        &self,
        subscriber: UserId,
        author: UserId,
    ) -> Result<bool, FollowsServiceError> {
        let count = Follow::find()
            .filter(FollowColumn::UserId.eq(subscriber))
            .filter(FollowColumn::AuthorId.eq(author))
            .count(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Every author `subscriber` follows
    pub async fn _followed_authors(
        &self,
        subscriber: UserId,
    ) -> Result<Vec<UserId>, FollowsServiceError> {
        let authors = Follow::find()
            .select_only()
            .column(FollowColumn::AuthorId)
            .distinct()
            .filter(FollowColumn::UserId.eq(subscriber))
            .into_tuple::<UserId>()
            .all(&self.db)
            .await?;

        Ok(authors)
    }

    pub async fn _follower_count(&self, author: UserId) -> Result<u64, FollowsServiceError> {
        Ok(Follow::find()
            .filter(FollowColumn::AuthorId.eq(author))
            .count(&self.db)
            .await?)
    }

    pub async fn _following_count(&self, subscriber: UserId) -> Result<u64, FollowsServiceError> {
        Ok(Follow::find()
            .filter(FollowColumn::UserId.eq(subscriber))
            .count(&self.db)
            .await?)
    }

    async fn author_by_username(&self, username: &str) -> Result<UserModel, FollowsServiceError> {
        User::find()
            .filter(UserColumn::Username.eq(username))
            .one(&self.db)
            .await?
            .ok_or(FollowsServiceError::UserNotFound)
    }

    /// Follow the author named `username` on behalf of `viewer`
    pub async fn _profile_follow(
        &self,
        viewer: &Viewer,
        username: &str,
    ) -> Result<Outcome<()>, FollowsServiceError> {
        let subscriber = match viewer.require(&format!("/profile/{username}/follow/")) {
            Ok(user) => user,
            Err(redirect) => return Ok(Outcome::Redirect(redirect)),
        };

        let author = self.author_by_username(username).await?;
        self._follow(subscriber.id, author.id).await?;

        Ok(Outcome::Redirect(Redirect::Profile {
            username: author.username,
        }))
    }

    /// Unfollow the author named `username` on behalf of `viewer`
    pub async fn _profile_unfollow(
        &self,
        viewer: &Viewer,
        username: &str,
    ) -> Result<Outcome<()>, FollowsServiceError> {
        let subscriber = match viewer.require(&format!("/profile/{username}/unfollow/")) {
            Ok(user) => user,
            Err(redirect) => return Ok(Outcome::Redirect(redirect)),
        };

        let author = self.author_by_username(username).await?;
        self._unfollow(subscriber.id, author.id).await?;

        Ok(Outcome::Redirect(Redirect::Profile {
            username: author.username,
        }))
    }
}

#[zel_service(name = "follows")]
trait Follows {
    #[doc = "Follow an author; answers with a redirect back to their profile"]
    #[method(name = "follow")]
    async fn follow(&self, username: String) -> Result<Outcome<()>, ResourceError>;

    #[doc = "Unfollow an author; answers with a redirect back to their profile"]
    #[method(name = "unfollow")]
    async fn unfollow(&self, username: String) -> Result<Outcome<()>, ResourceError>;

    #[doc = "Whether the calling user follows an author"]
    #[method(name = "is_following")]
    async fn is_following(&self, username: String) -> Result<bool, ResourceError>;

    #[doc = "Number of users following an author"]
    #[method(name = "follower_count")]
    async fn follower_count(&self, username: String) -> Result<u64, ResourceError>;
}

#[async_trait]
impl FollowsServer for FollowsService {
    async fn follow(
        &self,
        ctx: RequestContext,
        username: String,
    ) -> Result<Outcome<()>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(FollowsServiceError::from)?;
        Ok(self._profile_follow(&viewer, &username).await?)
    }

    async fn unfollow(
        &self,
        ctx: RequestContext,
        username: String,
    ) -> Result<Outcome<()>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(FollowsServiceError::from)?;
        Ok(self._profile_unfollow(&viewer, &username).await?)
    }

    async fn is_following(
        &self,
        ctx: RequestContext,
        username: String,
    ) -> Result<bool, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(FollowsServiceError::from)?;
        let Some(subscriber) = viewer.user() else {
            return Ok(false);
        };
        let author = self.author_by_username(&username).await?;
        Ok(self._is_following(subscriber.id, author.id).await?)
    }

    async fn follower_count(
        &self,
        _ctx: RequestContext,
        username: String,
    ) -> Result<u64, ResourceError> {
        let author = self.author_by_username(&username).await?;
        Ok(self._follower_count(author.id).await?)
    }
}
