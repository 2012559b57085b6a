pub mod comments;
pub mod feed;
pub mod follows;
pub mod groups;
pub mod posts;
pub mod users;
pub mod viewer;

#[cfg(test)]
pub(crate) mod fixtures;
