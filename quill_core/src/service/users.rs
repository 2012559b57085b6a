use chrono::Utc;
use iroh::PublicKey;
use sea_orm::{DatabaseConnection, TransactionTrait};
use thiserror::Error;
use tracing::info;
use zel_core::prelude::*;

use crate::{
    entity::prelude::*,
    error::{is_unique_violation, FieldError, Outcome},
    forms::SignupInput,
    ids::UserId,
    service::viewer::Viewer,
};

#[derive(Debug, Error)]
pub enum UsersServiceError {
    #[error("fatal database error")]
    DbError(#[from] DbErr),

    #[error("user not found")]
    UserNotFound,

    #[error("this node is already signed up")]
    AlreadySignedUp,
}

impl From<UsersServiceError> for ResourceError {
    fn from(error: UsersServiceError) -> Self {
        match error {
            UsersServiceError::DbError(error) => ResourceError::infra(error),
            UsersServiceError::UserNotFound => ResourceError::app(error),
            UsersServiceError::AlreadySignedUp => ResourceError::app(error),
        }
    }
}

#[derive(Clone)]
pub struct UsersService {
    db: DatabaseConnection,
    staff_usernames: Vec<String>,
}

impl UsersService {
    pub fn new(db: DatabaseConnection, staff_usernames: Vec<String>) -> Self {
        Self {
            db,
            staff_usernames,
        }
    }

    /// Create a user and bind the calling node to it
    pub async fn _signup(
        &self,
        node_id: PublicKey,
        input: SignupInput,
    ) -> Result<Outcome<UserModel>, UsersServiceError> {
        let username = match input.validate() {
            Ok(username) => username,
            Err(errors) => return Ok(Outcome::Invalid(errors)),
        };

        let node_bytes = node_id.as_bytes().to_vec();
        if Identity::find_by_id(node_bytes.clone())
            .one(&self.db)
            .await?
            .is_some()
        {
            return Err(UsersServiceError::AlreadySignedUp);
        }

        if self._find_user(&username).await?.is_some() {
            return Ok(Outcome::Invalid(vec![username_taken()]));
        }

        let txn = self.db.begin().await?;

        let user = UserActiveModel {
            id: Set(UserId::new()),
            username: Set(username.clone()),
            is_staff: Set(self.staff_usernames.contains(&username)),
            created_at: Set(Utc::now()),
        };

        let user = match User::insert(user).exec_with_returning(&txn).await {
            Ok(user) => user,
            // Lost a race with another signup for the same name
            Err(error) if is_unique_violation(&error) => {
                return Ok(Outcome::Invalid(vec![username_taken()]))
            }
            Err(error) => return Err(error.into()),
        };

        let identity = IdentityActiveModel {
            node_id: Set(node_bytes),
            user_id: Set(user.id),
        };
        Identity::insert(identity).exec(&txn).await?;

        txn.commit().await?;

        info!(user_id = %user.id, username = %user.username, staff = user.is_staff, "user signed up");
        Ok(Outcome::Done(user))
    }

    /// The user bound to a node, if any
    pub async fn _whoami(&self, node_id: PublicKey) -> Result<Option<UserModel>, UsersServiceError> {
        let viewer = Viewer::resolve(&self.db, &node_id).await?;
        Ok(viewer.user().cloned())
    }

    pub async fn _find_user(&self, username: &str) -> Result<Option<UserModel>, UsersServiceError> {
        Ok(User::find()
            .filter(UserColumn::Username.eq(username))
            .one(&self.db)
            .await?)
    }

    /// Get a user by username
    pub async fn _get_user(&self, username: &str) -> Result<UserModel, UsersServiceError> {
        self._find_user(username)
            .await?
            .ok_or(UsersServiceError::UserNotFound)
    }
}

fn username_taken() -> FieldError {
    FieldError::new("username", "A user with that username already exists.")
}

#[zel_service(name = "users")]
trait Users {
    #[doc = "Create a user bound to the calling node"]
    #[method(name = "signup")]
    async fn signup(&self, input: SignupInput) -> Result<Outcome<UserModel>, ResourceError>;

    #[doc = "The user the calling node is signed in as"]
    #[method(name = "whoami")]
    async fn whoami(&self) -> Result<Option<UserModel>, ResourceError>;

    #[doc = "Get a user by username"]
    #[method(name = "get_user")]
    async fn get_user(&self, username: String) -> Result<UserModel, ResourceError>;
}

#[async_trait]
impl UsersServer for UsersService {
    async fn signup(
        &self,
        ctx: RequestContext,
        input: SignupInput,
    ) -> Result<Outcome<UserModel>, ResourceError> {
        let node_id = ctx.connection().remote_id();
        Ok(self._signup(node_id, input).await?)
    }

    async fn whoami(&self, ctx: RequestContext) -> Result<Option<UserModel>, ResourceError> {
        let node_id = ctx.connection().remote_id();
        Ok(self._whoami(node_id).await?)
    }

    async fn get_user(
        &self,
        _ctx: RequestContext,
        username: String,
    ) -> Result<UserModel, ResourceError> {
        Ok(self._get_user(&username).await?)
    }
}
