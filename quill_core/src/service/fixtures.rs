//! Store fixtures shared by the service tests.

use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;

use crate::{
    entity::prelude::*,
    ids::{GroupId, PostId, UserId},
    service::viewer::Viewer,
};

pub async fn create_user(db: &DatabaseConnection, username: &str) -> UserModel {
    let user = UserActiveModel {
        id: Set(UserId::new()),
        username: Set(username.to_string()),
        is_staff: Set(false),
        created_at: Set(Utc::now()),
    };
    User::insert(user).exec_with_returning(db).await.unwrap()
}

pub async fn create_staff(db: &DatabaseConnection, username: &str) -> UserModel {
    let user = UserActiveModel {
        id: Set(UserId::new()),
        username: Set(username.to_string()),
        is_staff: Set(true),
        created_at: Set(Utc::now()),
    };
    User::insert(user).exec_with_returning(db).await.unwrap()
}

pub async fn create_group(db: &DatabaseConnection, slug: &str) -> GroupModel {
    let group = GroupActiveModel {
        id: Set(GroupId::new()),
        title: Set(format!("Group {slug}")),
        slug: Set(slug.to_string()),
        description: Set("Test group".to_string()),
    };
    Group::insert(group).exec_with_returning(db).await.unwrap()
}

/// Insert `count` posts by `author`, each one second newer than the last.
pub async fn create_posts(
    db: &DatabaseConnection,
    author: &UserModel,
    group: Option<&GroupModel>,
    count: usize,
) -> Vec<PostModel> {
    let base = Utc::now() - Duration::hours(1);
    let mut posts = Vec::with_capacity(count);
    for i in 0..count {
        let post = PostActiveModel {
            id: Set(PostId::new()),
            text: Set(format!("{} post {i}", author.username)),
            author_id: Set(author.id),
            group_id: Set(group.map(|g| g.id)),
            image: Set(None),
            created_at: Set(base + Duration::seconds(i as i64)),
        };
        posts.push(Post::insert(post).exec_with_returning(db).await.unwrap());
    }
    posts
}

pub async fn create_post(db: &DatabaseConnection, author: &UserModel, text: &str) -> PostModel {
    let post = PostActiveModel {
        id: Set(PostId::new()),
        text: Set(text.to_string()),
        author_id: Set(author.id),
        group_id: Set(None),
        image: Set(None),
        created_at: Set(Utc::now()),
    };
    Post::insert(post).exec_with_returning(db).await.unwrap()
}

pub fn signed_in(user: &UserModel) -> Viewer {
    Viewer::Authenticated(user.clone())
}
