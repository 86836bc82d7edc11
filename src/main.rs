use std::path::PathBuf;

use clap::Parser;
use course_server::{
    config::Config,
    db,
    server::{AppState, build_router},
    utils::init_log,
};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::info;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    database: Option<PathBuf>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Write daily rolling logs here instead of stdout
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        config.apply_env();
        if let Some(database) = self.database {
            config.database = database;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.log_dir.is_some() {
            config.log_dir = self.log_dir;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Args::parse().into_config()?;
    let _guard = init_log(config.log_dir.clone())?;

    let database = db::connect(&config.database).await?;
    let store = SqliteStore::new(database.clone());
    store.migrate().await?;
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    tokio::fs::create_dir_all(&config.certificate_dir).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(AppState::new(database, config), store);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{}", addr);
    info!("Swagger UI available at http://{}/swagger-ui/", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
