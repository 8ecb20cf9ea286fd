use anyhow::Result;
use aws_config::{BehaviorVersion, Region};
use axum::Router;
use std::{
    io::ErrorKind,
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use models::node::NodeRuntime;
use services::engine::Engine;
use services::store::S3StoreClient;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config (bad credentials are fatal here) ---
    let cfg = config::AppConfig::from_env_and_args()?;
    tracing::info!(
        "Starting reconciliation node for bucket {} on port {}",
        cfg.bucket_name,
        cfg.an_port
    );

    // --- Shared node runtime + HTTP client ---
    let node = Arc::new(RwLock::new(NodeRuntime::new()));
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(cfg.max_tcp_connections)
        .timeout(Duration::from_secs(cfg.store_timeout))
        .build()?;

    // --- Object-store client ---
    let credentials = aws_sdk_s3::config::Credentials::new(
        &cfg.aws_access_key_id,
        &cfg.aws_secret_access_key,
        None,
        None,
        "config",
    );
    let mut s3_config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(cfg.aws_region.clone()))
        .credentials_provider(credentials)
        .force_path_style(true);
    if let Some(endpoint) = &cfg.s3_gateway {
        s3_config = s3_config.endpoint_url(endpoint);
    }
    let s3 = aws_sdk_s3::Client::from_conf(s3_config.build());
    let store = Arc::new(S3StoreClient::new(
        s3,
        http.clone(),
        cfg.bucket_name.clone(),
        Duration::from_secs(cfg.store_timeout),
        node.clone(),
    ));

    let engine = Arc::new(Engine::new(cfg, store, node));

    // --- Background tasks: cluster membership + reconciliation loop ---
    tokio::spawn(services::cluster::health_check(engine.clone(), http));
    tokio::spawn(services::engine::run(engine.clone()));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(engine.clone());

    // --- Start server ---
    let addr = engine.config.listen_addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            let fallback_addr = format!("127.0.0.1:{}", engine.config.an_port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
