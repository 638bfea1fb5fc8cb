use std::net::SocketAddr;

use axum::Router;
use media_resolver_lib::ResolverConfig;

/// Serve `app` on an ephemeral loopback port
#[allow(dead_code)]
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Config that lets the resolver talk to loopback fixtures
#[allow(dead_code)]
pub fn local_config() -> ResolverConfig {
    ResolverConfig::default().with_allow_private_networks(true)
}
