use iroh::PublicKey;
use sea_orm::ConnectionTrait;
use zel_core::prelude::RequestContext;

use crate::{entity::prelude::*, error::Redirect};

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Authenticated(UserModel),
}

impl Viewer {
    /// Look the caller's node key up in the identity table.
    pub async fn resolve<C>(db: &C, node_id: &PublicKey) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let found = Identity::find_by_id(node_id.as_bytes().to_vec())
            .find_also_related(User)
            .one(db)
            .await?;

        Ok(match found {
            Some((_, Some(user))) => Viewer::Authenticated(user),
            _ => Viewer::Anonymous,
        })
    }

    pub async fn from_request<C>(db: &C, ctx: &RequestContext) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let node_id = ctx.connection().remote_id();
        Self::resolve(db, &node_id).await
    }

    pub fn user(&self) -> Option<&UserModel> {
        match self {
            Viewer::Authenticated(user) => Some(user),
            Viewer::Anonymous => None,
        }
    }

    /// The signed-in user, or a redirect to login that returns to `next`.
    pub fn require(&self, next: &str) -> Result<&UserModel, Redirect> {
        self.user().ok_or_else(|| Redirect::login(next))
    }

    pub fn is_staff(&self) -> bool {
        self.user().is_some_and(|user| user.is_staff)
    }
}
