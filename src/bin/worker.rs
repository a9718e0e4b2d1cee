use std::env;
use std::time::Duration;

use crosignal::config::AppConfig;
use crosignal::jobs::audit::run_audit_sweep;
use crosignal::AppState;
use dotenvy::dotenv;
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use tokio::time::interval;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialise tracing (INFO level)
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load .env (if present) so DATABASE_URL from file is visible
    let _ = dotenv();

    // Command-line flags
    let run_once = env::args().any(|a| a == "--once");

    let config = AppConfig::from_env();
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let db = Database::connect(&database_url)
        .await
        .expect("failed to connect to database");
    Migrator::up(&db, None).await.expect("migrations failed");

    let state = AppState::new(db, config);

    if run_once {
        match run_audit_sweep(&state).await {
            Ok(summary) => info!(
                recovered = summary.recovered,
                processed = summary.processed,
                "sweep finished"
            ),
            Err(e) => error!(?e, "audit sweep failed"),
        }
        return;
    }

    info!("Worker starting; sweeping the audit queue every 60 seconds");

    let mut ticker = interval(SWEEP_PERIOD);
    loop {
        ticker.tick().await;
        match run_audit_sweep(&state).await {
            Ok(summary) => {
                if summary.recovered > 0 || summary.processed > 0 {
                    info!(
                        recovered = summary.recovered,
                        processed = summary.processed,
                        "sweep finished"
                    );
                }
            }
            Err(e) => error!(?e, "audit sweep failed"),
        }
    }
}
