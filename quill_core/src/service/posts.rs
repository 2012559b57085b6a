use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::{FieldError, Outcome, Redirect},
    forms::{ImageChange, PostInput},
    ids::{GroupId, PostId},
    service::{
        comments,
        feed::{hydrate, PostView},
        viewer::Viewer,
    },
};

#[derive(Debug, Error)]
pub enum PostsServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("post not found")]
    PostNotFound,
}

impl From<PostsServiceError> for ResourceError {
    fn from(error: PostsServiceError) -> Self {
        match error {
            PostsServiceError::DbError(error) => ResourceError::infra(error),
            PostsServiceError::PostNotFound => ResourceError::app(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDetail {
    pub post: PostView,
    /// Oldest first.
    pub comments: Vec<CommentModel>,
    /// How many posts the author has written in total.
    pub author_post_count: u64,
}

#[derive(Clone)]
pub struct PostsService {
    db: DatabaseConnection,
}

impl PostsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn check_group(&self, group: Option<GroupId>) -> Result<Option<FieldError>, DbErr> {
        let Some(group_id) = group else {
            return Ok(None);
        };

        let exists = Group::find_by_id(group_id).one(&self.db).await?.is_some();
        Ok((!exists).then(|| {
            FieldError::new(
                "group",
                "Select a valid choice. That choice is not one of the available choices.",
            )
        }))
    }

    /// Publish a new post as the viewer
    pub async fn _create_post(
        &self,
        viewer: &Viewer,
        input: PostInput,
    ) -> Result<Outcome<PostModel>, PostsServiceError> {
        let author = match viewer.require("/create/") {
            Ok(user) => user,
            Err(redirect) => return Ok(Outcome::Redirect(redirect)),
        };

        let valid = match input.validate() {
            Ok(valid) => valid,
            Err(errors) => return Ok(Outcome::Invalid(errors)),
        };
        if let Some(error) = self.check_group(valid.group).await? {
            return Ok(Outcome::Invalid(vec![error]));
        }

        let image = match valid.image {
            ImageChange::Replace(bytes) => Some(bytes),
            ImageChange::Keep | ImageChange::Clear => None,
        };

        let post = PostActiveModel {
            id: Set(PostId::new()),
            text: Set(valid.text),
            author_id: Set(author.id),
            group_id: Set(valid.group),
            image: Set(image),
            created_at: Set(Utc::now()),
        };

        let post = Post::insert(post).exec_with_returning(&self.db).await?;

        info!(post_id = %post.id, author = %author.username, "post created");
        Ok(Outcome::Done(post))
    }

    /// Replace a post's text, group and image. Only its author may do this.
    pub async fn _edit_post(
        &self,
        viewer: &Viewer,
        post_id: PostId,
        input: PostInput,
    ) -> Result<Outcome<PostModel>, PostsServiceError> {
        let editor = match viewer.require(&format!("/posts/{post_id}/edit/")) {
            Ok(user) => user,
            Err(redirect) => return Ok(Outcome::Redirect(redirect)),
        };

        let post = Post::find_by_id(post_id)
            .one(&self.db)
            .await?
            .ok_or(PostsServiceError::PostNotFound)?;
        if editor.id != post.author_id {
            debug!(post_id = %post_id, editor = %editor.username, "edit by non-author refused");
            return Ok(Outcome::Redirect(Redirect::PostDetail { post_id }));
        }

        let valid = match input.validate() {
            Ok(valid) => valid,
            Err(errors) => return Ok(Outcome::Invalid(errors)),
        };
        if let Some(error) = self.check_group(valid.group).await? {
            return Ok(Outcome::Invalid(vec![error]));
        }

        let mut active: PostActiveModel = post.into();
        active.text = Set(valid.text);
        active.group_id = Set(valid.group);
        match valid.image {
            ImageChange::Keep => {}
            ImageChange::Replace(bytes) => active.image = Set(Some(bytes)),
            ImageChange::Clear => active.image = Set(None),
        }

        let updated = active.update(&self.db).await?;

        info!(post_id = %post_id, "post edited");
        Ok(Outcome::Done(updated))
    }

    /// A post with its comments
    pub async fn _post_detail(&self, post_id: PostId) -> Result<PostDetail, PostsServiceError> {
        let row = Post::find_by_id(post_id)
            .find_also_related(User)
            .one(&self.db)
            .await?
            .ok_or(PostsServiceError::PostNotFound)?;

        let author_post_count = Post::find()
            .filter(PostColumn::AuthorId.eq(row.0.author_id))
            .count(&self.db)
            .await?;

        let post = hydrate(&self.db, vec![row])
            .await?
            .pop()
            .ok_or(PostsServiceError::PostNotFound)?;
        let comments = comments::list_for_post(&self.db, post_id).await?;

        Ok(PostDetail {
            post,
            comments,
            author_post_count,
        })
    }
}

#[zel_service(name = "posts")]
trait Posts {
    #[doc = "Publish a new post as the calling user"]
    #[method(name = "create_post")]
    async fn create_post(&self, input: PostInput) -> Result<Outcome<PostModel>, ResourceError>;

    #[doc = "Edit a post (only by author)"]
    #[method(name = "edit_post")]
    async fn edit_post(
        &self,
        post_id: PostId,
        input: PostInput,
    ) -> Result<Outcome<PostModel>, ResourceError>;

    #[doc = "Get a post with its comments"]
    #[method(name = "post_detail")]
    async fn post_detail(&self, post_id: PostId) -> Result<PostDetail, ResourceError>;
}

#[async_trait]
impl PostsServer for PostsService {
    async fn create_post(
        &self,
        ctx: RequestContext,
        input: PostInput,
    ) -> Result<Outcome<PostModel>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(PostsServiceError::from)?;
        Ok(self._create_post(&viewer, input).await?)
    }

    async fn edit_post(
        &self,
        ctx: RequestContext,
        post_id: PostId,
        input: PostInput,
    ) -> Result<Outcome<PostModel>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(PostsServiceError::from)?;
        Ok(self._edit_post(&viewer, post_id, input).await?)
    }

    async fn post_detail(
        &self,
        _ctx: RequestContext,
        post_id: PostId,
    ) -> Result<PostDetail, ResourceError> {
        Ok(self._post_detail(post_id).await?)
    }
}
