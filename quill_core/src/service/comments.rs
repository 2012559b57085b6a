use chrono::Utc;
use sea_orm::{ConnectionTrait, DatabaseConnection};
use thiserror::Error;
use tracing::info;
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::Outcome,
    forms::CommentInput,
    ids::{CommentId, PostId, UserId},
    service::viewer::Viewer,
};

#[derive(Debug, Error)]
pub enum CommentsServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("post not found")]
    PostNotFound,
}

impl From<CommentsServiceError> for ResourceError {
    fn from(error: CommentsServiceError) -> Self {
        match error {
            CommentsServiceError::DbError(error) => ResourceError::infra(error),
            CommentsServiceError::PostNotFound => ResourceError::app(error),
        }
    }
}

/// Comments on a post in the order they were written.
pub(crate) async fn list_for_post<C>(db: &C, post_id: PostId) -> Result<Vec<CommentModel>, DbErr>
where
    C: ConnectionTrait,
{
    Comment::find()
        .filter(CommentColumn::PostId.eq(post_id))
        .order_by_asc(CommentColumn::CreatedAt)
        .order_by_asc(CommentColumn::Id)
        .all(db)
        .await
}

pub(crate) async fn insert_comment<C>(
    db: &C,
    post_id: PostId,
    author_id: UserId,
    text: String,
) -> Result<CommentModel, DbErr>
where
    C: ConnectionTrait,
{
    let comment = CommentActiveModel {
        id: Set(CommentId::new()),
        post_id: Set(Some(post_id)),
        author_id: Set(Some(author_id)),
        text: Set(text),
        created_at: Set(Utc::now()),
    };
    Comment::insert(comment).exec_with_returning(db).await
}

#[derive(Clone)]
pub struct CommentsService {
    db: DatabaseConnection,
}

impl CommentsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Comment on a post as the viewer
    pub async fn _add_comment(
        &self,
        viewer: &Viewer,
        post_id: PostId,
        input: CommentInput,
    ) -> Result<Outcome<CommentModel>, CommentsServiceError> {
        let author = match viewer.require(&format!("/posts/{post_id}/comment")) {
            Ok(user) => user,
            Err(redirect) => return Ok(Outcome::Redirect(redirect)),
        };

        if Post::find_by_id(post_id).one(&self.db).await?.is_none() {
            return Err(CommentsServiceError::PostNotFound);
        }

        let valid = match input.validate() {
            Ok(valid) => valid,
            Err(errors) => return Ok(Outcome::Invalid(errors)),
        };

        let comment = insert_comment(&self.db, post_id, author.id, valid.text).await?;

        info!(comment_id = %comment.id, post_id = %post_id, author = %author.username, "comment added");
        Ok(Outcome::Done(comment))
    }

    pub async fn _list_comments(
        &self,
        post_id: PostId,
    ) -> Result<Vec<CommentModel>, CommentsServiceError> {
        Ok(list_for_post(&self.db, post_id).await?)
    }

    pub async fn _comment_count(&self, post_id: PostId) -> Result<u64, CommentsServiceError> {
        Ok(Comment::find()
            .filter(CommentColumn::PostId.eq(post_id))
            .count(&self.db)
            .await?)
    }
}

#[zel_service(name = "comments")]
trait Comments {
    #[doc = "Comment on a post as the calling user"]
    #[method(name = "add_comment")]
    async fn add_comment(
        &self,
        post_id: PostId,
        input: CommentInput,
    ) -> Result<Outcome<CommentModel>, ResourceError>;

    #[doc = "List the comments on a post, oldest first"]
    #[method(name = "list_comments")]
    async fn list_comments(&self, post_id: PostId) -> Result<Vec<CommentModel>, ResourceError>;
}

#[async_trait]
impl CommentsServer for CommentsService {
    async fn add_comment(
        &self,
        ctx: RequestContext,
        post_id: PostId,
        input: CommentInput,
    ) -> Result<Outcome<CommentModel>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(CommentsServiceError::from)?;
        Ok(self._add_comment(&viewer, post_id, input).await?)
    }

    async fn list_comments(
        &self,
        _ctx: RequestContext,
        post_id: PostId,
    ) -> Result<Vec<CommentModel>, ResourceError> {
        Ok(self._list_comments(post_id).await?)
    }
}
