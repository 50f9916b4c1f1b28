//! Berth server binary.

use anyhow::{Context, Result};
use berth_core::{ApiKeyCipher, AppConfig};
use berth_metadata::{MetadataStore, PostgresStore};
use berth_storage::BlobStore as _;
use berth_server::{AppState, SessionVerifier, create_router};
use berth_token::{RegistryKeyPair, TokenAuthority};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Berth - a multi-tenant OCI container registry
#[derive(Parser, Debug)]
#[command(name = "berthd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, env = "BERTH_LISTEN", default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Berth v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env().context("failed to load configuration")?;

    let api_keys = ApiKeyCipher::from_hex(&config.api_key_encryption_key)
        .context("invalid API_KEY_ENCRYPTION_KEY")?;

    // Initialize storage and verify it is reachable before accepting
    // requests, so a misconfigured backend fails startup instead of the
    // first push.
    let storage = berth_storage::from_config(&config.storage);
    storage
        .init()
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata: Arc<dyn MetadataStore> = Arc::new(
        PostgresStore::connect(&config.database, 10)
            .await
            .context("failed to connect to postgres")?,
    );
    tracing::info!("Metadata store initialized");

    let keypair = RegistryKeyPair::from_pem(
        &config.registry.jwt_private_key_pem,
        config.registry.jwt_public_key_pem.as_deref(),
    )
    .context("could not load registry jwt keys")?;
    tracing::info!(kid = keypair.kid(), "Registry signing key loaded");
    let authority = TokenAuthority::new(keypair).context("could not build token authority")?;

    let sessions = SessionVerifier::new(&config.registry.idp_jwks_url);

    let state = AppState::new(
        storage,
        metadata,
        authority,
        api_keys,
        sessions,
        config.registry.service.clone(),
    );
    let app = create_router(state);

    let addr: SocketAddr = args.listen.parse().context("invalid listen address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
