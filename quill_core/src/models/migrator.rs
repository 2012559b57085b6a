use sea_orm_migration::prelude::*;

mod m20261019_000001_create_user_table;
mod m20261019_000002_create_identity_table;
mod m20261019_000003_create_group_table;
mod m20261019_000004_create_post_table;
mod m20261019_000005_create_comment_table;
mod m20261019_000006_create_follow_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261019_000001_create_user_table::Migration),
            Box::new(m20261019_000002_create_identity_table::Migration),
            Box::new(m20261019_000003_create_group_table::Migration),
            Box::new(m20261019_000004_create_post_table::Migration),
            Box::new(m20261019_000005_create_comment_table::Migration),
            Box::new(m20261019_000006_create_follow_table::Migration),
        ]
    }
}

#[cfg(test)]
use sea_orm::{Database, DbErr};

#[tokio::test]
async fn test_migrations_okay() -> Result<(), DbErr> {
    let db = Database::connect(super::memory_options()).await?;
    let schema_manager = SchemaManager::new(&db);

    Migrator::refresh(&db).await?;

    assert!(schema_manager.has_table("user").await?);
    assert!(schema_manager.has_table("identity").await?);
    assert!(schema_manager.has_table("group").await?);
    assert!(schema_manager.has_table("post").await?);
    assert!(schema_manager.has_table("comment").await?);
    assert!(schema_manager.has_table("follow").await?);
    assert!(
        schema_manager
            .has_index("follow", "idx_follows_user_author_unique")
            .await?
    );

    Ok(())
}
