use std::net::SocketAddr;
use std::sync::Arc;

use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use lensdesk::auth::jwt::JwtService;
use lensdesk::calendar::HttpCalendarSync;
use lensdesk::config::AppConfig;
use lensdesk::db;
use lensdesk::mailer::HttpMailer;
use lensdesk::routes::create_router;
use lensdesk::s3::build_client;
use lensdesk::state::AppState;
use lensdesk::storage::S3Storage;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    {
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow::anyhow!("failed to run migrations: {err}"))?;
    }

    let s3_client = build_client(&config).await?;
    let storage = Arc::new(S3Storage::new(s3_client, config.s3_bucket.clone()));
    let mailer = Arc::new(HttpMailer::new(
        config.mail_endpoint.clone(),
        config.mail_from.clone(),
    ));
    let calendar = Arc::new(HttpCalendarSync::new());
    let jwt = JwtService::from_config(&config)?;

    let state = AppState::new(pool, config, storage, mailer, calendar, jwt);
    let listen_addr: SocketAddr = format!(
        "{}:{}",
        state.config.server_host, state.config.server_port
    )
    .parse()?;

    let router = create_router(state);
    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, router).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
