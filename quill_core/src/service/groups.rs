use sea_orm::DatabaseConnection;
use thiserror::Error;
use tracing::info;
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::{is_foreign_key_violation, is_unique_violation, FieldError, Outcome, Redirect},
    forms::GroupInput,
    ids::GroupId,
    service::viewer::Viewer,
};

#[derive(Debug, Error)]
pub enum GroupsServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("group not found")]
    GroupNotFound,

    #[error("group still has {posts} post(s)")]
    GroupProtected { posts: u64 },

    #[error("unauthorized: staff only")]
    Unauthorized,
}

impl From<GroupsServiceError> for ResourceError {
    fn from(error: GroupsServiceError) -> Self {
        match error {
            GroupsServiceError::DbError(error) => ResourceError::infra(error),
            GroupsServiceError::GroupNotFound => ResourceError::app(error),
            GroupsServiceError::GroupProtected { .. } => ResourceError::app(error),
            GroupsServiceError::Unauthorized => ResourceError::app(error),
        }
    }
}

#[derive(Clone)]
pub struct GroupsService {
    db: DatabaseConnection,
}

impl GroupsService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a new group
    pub async fn _create_group(
        &self,
        input: GroupInput,
    ) -> Result<Outcome<GroupModel>, GroupsServiceError> {
        let valid = match input.validate() {
            Ok(valid) => valid,
            Err(errors) => return Ok(Outcome::Invalid(errors)),
        };

        if self._find_group(&valid.slug).await?.is_some() {
            return Ok(Outcome::Invalid(vec![slug_taken()]));
        }

        let group = GroupActiveModel {
            id: Set(GroupId::new()),
            title: Set(valid.title),
            slug: Set(valid.slug),
            description: Set(valid.description),
        };

        match Group::insert(group).exec_with_returning(&self.db).await {
            Ok(group) => {
                info!(group_id = %group.id, slug = %group.slug, "group created");
                Ok(Outcome::Done(group))
            }
            Err(error) if is_unique_violation(&error) => Ok(Outcome::Invalid(vec![slug_taken()])),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn _find_group(&self, slug: &str) -> Result<Option<GroupModel>, GroupsServiceError> {
        Ok(Group::find()
            .filter(GroupColumn::Slug.eq(slug))
            .one(&self.db)
            .await?)
    }

    /// Get a specific group by slug
    pub async fn _get_group(&self, slug: &str) -> Result<GroupModel, GroupsServiceError> {
        self._find_group(slug)
            .await?
            .ok_or(GroupsServiceError::GroupNotFound)
    }

    /// All groups, by title
    pub async fn _list_groups(&self) -> Result<Vec<GroupModel>, GroupsServiceError> {
        Ok(Group::find()
            .order_by_asc(GroupColumn::Title)
            .all(&self.db)
            .await?)
    }

    /// Delete a group that no post refers to
    pub async fn _delete_group(&self, slug: &str) -> Result<(), GroupsServiceError> {
        let group = self._get_group(slug).await?;

        let posts = Post::find()
            .filter(PostColumn::GroupId.eq(group.id))
            .count(&self.db)
            .await?;
        if posts > 0 {
            return Err(GroupsServiceError::GroupProtected { posts });
        }

        match Group::delete_by_id(group.id).exec(&self.db).await {
            Ok(_) => {
                info!(group_id = %group.id, slug = %group.slug, "group deleted");
                Ok(())
            }
            // A post landed in the group after the count above
            Err(error) if is_foreign_key_violation(&error) => {
                Err(GroupsServiceError::GroupProtected { posts: 1 })
            }
            Err(error) => Err(error.into()),
        }
    }

    fn require_staff(viewer: &Viewer, next: &str) -> Result<Option<Redirect>, GroupsServiceError> {
        match viewer.require(next) {
            Err(redirect) => Ok(Some(redirect)),
            Ok(user) if user.is_staff => Ok(None),
            Ok(_) => Err(GroupsServiceError::Unauthorized),
        }
    }
}

fn slug_taken() -> FieldError {
    FieldError::new("slug", "Group with this slug already exists.")
}

#[zel_service(name = "groups")]
trait Groups {
    #[doc = "Create a new group (staff only)"]
    #[method(name = "create_group")]
    async fn create_group(&self, input: GroupInput) -> Result<Outcome<GroupModel>, ResourceError>;

    #[doc = "List all groups"]
    #[method(name = "list_groups")]
    async fn list_groups(&self) -> Result<Vec<GroupModel>, ResourceError>;

    #[doc = "Get a specific group by slug"]
    #[method(name = "get_group")]
    async fn get_group(&self, slug: String) -> Result<GroupModel, ResourceError>;

    #[doc = "Delete a group without posts (staff only)"]
    #[method(name = "delete_group")]
    async fn delete_group(&self, slug: String) -> Result<Outcome<()>, ResourceError>;
}

#[async_trait]
impl GroupsServer for GroupsService {
    async fn create_group(
        &self,
        ctx: RequestContext,
        input: GroupInput,
    ) -> Result<Outcome<GroupModel>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(GroupsServiceError::from)?;
        if let Some(redirect) = Self::require_staff(&viewer, "/admin/")? {
            return Ok(Outcome::Redirect(redirect));
        }
        Ok(self._create_group(input).await?)
    }

    async fn list_groups(&self, _ctx: RequestContext) -> Result<Vec<GroupModel>, ResourceError> {
        Ok(self._list_groups().await?)
    }

    async fn get_group(
        &self,
        _ctx: RequestContext,
        slug: String,
    ) -> Result<GroupModel, ResourceError> {
        Ok(self._get_group(&slug).await?)
    }

    async fn delete_group(
        &self,
        ctx: RequestContext,
        slug: String,
    ) -> Result<Outcome<()>, ResourceError> {
        let viewer = Viewer::from_request(&self.db, &ctx)
            .await
            .map_err(GroupsServiceError::from)?;
        if let Some(redirect) = Self::require_staff(&viewer, "/admin/")? {
            return Ok(Outcome::Redirect(redirect));
        }
        self._delete_group(&slug).await?;
        Ok(Outcome::Done(()))
    }
}
