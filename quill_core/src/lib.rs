pub mod cache;
pub mod entity;
pub mod ids;
pub mod models;
pub mod pagination;

use std::{sync::Arc, time::Duration};

use iroh::PublicKey;
use tracing::{debug, info};
use zel_core::{prelude::RpcServerBuilder, IrohBundle};

use crate::{
    cache::MemoryFragmentCache,
    service::{
        comments::{CommentsServer, CommentsService},
        feed::{FeedServer, FeedService, FeedSettings},
        follows::{FollowsServer, FollowsService},
        groups::{GroupsServer, GroupsService},
        posts::{PostsServer, PostsService},
        users::{UsersServer, UsersService},
    },
};

pub mod service;

pub mod error;

pub mod forms;

pub mod config;

pub static ALPN: &[u8] = b"quill::0.1.0";

/// Main runtime handle for a Quill node.
pub struct QuillCore {
    pub config: config::QuillConfig,

    /// Server bundle that accepts inbound RPC traffic.
    pub server: IrohBundle,

    /// Shared with the feed service. Staff can flush it over RPC.
    pub fragments: Arc<MemoryFragmentCache>,
}

impl QuillCore {
    pub async fn start(config: config::QuillConfig) -> Result<Self, Box<dyn std::error::Error>> {
        debug!(?config, "starting quill node");

        let mut server_builder = IrohBundle::builder(Some(config.secret_key.clone())).await?;
        let server_endpoint = server_builder.endpoint().clone();

        // DB + migrations
        let db = models::open_or_create_db(&config).await?;
        models::migrate_up(&db).await?;
        info!(path = %config.database_path.display(), "database ready");

        let fragments = Arc::new(MemoryFragmentCache::new());
        let settings = FeedSettings {
            page_size: config.page_size,
            fragment_ttl: config.fragment_ttl(),
        };

        let users_service = UsersService::new(db.clone(), config.staff_usernames.clone());
        let groups_service = GroupsService::new(db.clone());
        let posts_service = PostsService::new(db.clone());
        let comments_service = CommentsService::new(db.clone());
        let follows_service = FollowsService::new(db.clone());
        let feed_service = FeedService::new(db.clone(), fragments.clone(), settings);

        // Register RPC servers
        let rpc_server_builder = RpcServerBuilder::new(ALPN, server_endpoint.clone());

        let rpc_server_builder = users_service.register_service(rpc_server_builder);
        let rpc_server_builder = groups_service.register_service(rpc_server_builder);
        let rpc_server_builder = posts_service.register_service(rpc_server_builder);
        let rpc_server_builder = comments_service.register_service(rpc_server_builder);
        let rpc_server_builder = follows_service.register_service(rpc_server_builder);
        let rpc_server_builder = feed_service.register_service(rpc_server_builder);

        let rpc_server = rpc_server_builder.build();

        let server = server_builder.accept(ALPN, rpc_server).finish().await;

        server.wait_online().await;
        info!(node_id = %server.endpoint.id(), "quill node online");

        Ok(Self {
            config,
            server,
            fragments,
        })
    }

    pub fn node_id(&self) -> PublicKey {
        self.server.endpoint.id()
    }

    pub async fn shutdown(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("shutting down quill node");
        self.server.shutdown(Duration::from_secs(5)).await?;
        Ok(())
    }
}

pub mod prelude {
    pub use super::cache;
    pub use super::entity;
    pub use super::ids;
    pub use super::models;
    pub use super::pagination;

    pub use super::service;

    pub use super::error;

    pub use super::forms;

    pub use super::config;

    pub use zel_core;
}
