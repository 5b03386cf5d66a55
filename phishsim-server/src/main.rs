use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use phishsim_core::collaborators::{HttpCourseProgress, HttpMailTransport, HttpUserDirectory};
use phishsim_core::http::start_tracking_server;
use phishsim_core::repositories::{
    PostgresCampaignRepository, PostgresResultRepository, PostgresRiskScoreRepository,
    PostgresTemplateRepository,
};
use phishsim_core::services::{
    spawn_risk_worker, spawn_training_assigner, CampaignDispatcher, DispatcherConfig,
    RiskScoringEngine, TrackingPages, TrackingService,
};
use phishsim_core::tasks::campaign_sweep::spawn_campaign_sweep;
use phishsim_core::tasks::risk_sweep::spawn_risk_sweep;
use phishsim_core::{Database, Error};

#[derive(Parser, Debug, Clone)]
#[command(name = "phishsim")]
#[command(author, version, about = "Phishing-simulation campaign engine")]
struct Args {
    /// Postgres connection URL.
    #[arg(long, default_value = "postgres://phishsim@localhost:5432/phishsim")]
    db_url: String,

    /// Bind address for the public tracking endpoints
    #[arg(long, default_value = "0.0.0.0:8080")]
    tracking_addr: String,

    /// Public base URL embedded in outbound tracking links
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,

    /// "You were phished" landing page
    #[arg(long, default_value = "https://training.example.com/phished")]
    landing_url: String,

    /// Neutral page for unrecognized tokens
    #[arg(long, default_value = "https://www.example.com/")]
    neutral_url: String,

    /// Parallel send workers per campaign
    #[arg(long, default_value = "8")]
    send_workers: usize,

    /// Hard timeout per mail-provider call, in seconds
    #[arg(long, default_value = "10")]
    send_timeout_secs: u64,

    /// Send attempts per recipient before writing the row off as bounced
    #[arg(long, default_value = "3")]
    send_attempts: u32,

    /// Campaign sweep interval, in seconds
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Nightly risk recency sweep interval, in seconds
    #[arg(long, default_value = "86400")]
    risk_sweep_interval_secs: u64,

    /// Mail provider send endpoint
    #[arg(long, default_value = "http://localhost:9100/send")]
    mail_endpoint: String,

    /// Mail provider API key
    #[arg(long, env = "PHISHSIM_MAIL_API_KEY", default_value = "")]
    mail_api_key: String,

    /// User directory service base URL
    #[arg(long, default_value = "http://localhost:9200")]
    directory_url: String,

    /// Course-progress service base URL
    #[arg(long, default_value = "http://localhost:9300")]
    course_url: String,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("phishsim=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)
        .expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    info!("Starting phishsim server...");

    let db = Database::new(&args.db_url).await?;
    db.migrate().await?;

    let templates = Arc::new(PostgresTemplateRepository::new(db.pool().clone()));
    let campaigns = Arc::new(PostgresCampaignRepository::new(db.pool().clone()));
    let results = Arc::new(PostgresResultRepository::new(db.pool().clone()));
    let scores = Arc::new(PostgresRiskScoreRepository::new(db.pool().clone()));

    let mail = Arc::new(HttpMailTransport::new(
        &args.mail_endpoint,
        &args.mail_api_key,
        Duration::from_secs(args.send_timeout_secs),
    )?);
    let directory = Arc::new(HttpUserDirectory::new(&args.directory_url));
    let course = Arc::new(HttpCourseProgress::new(&args.course_url));

    let dispatcher = Arc::new(CampaignDispatcher::new(
        campaigns.clone(),
        templates.clone(),
        results.clone(),
        mail,
        directory.clone(),
        DispatcherConfig {
            workers: args.send_workers,
            send_timeout: Duration::from_secs(args.send_timeout_secs),
            max_attempts: args.send_attempts,
            retry_base_delay: Duration::from_secs(2),
            base_url: args.base_url.clone(),
        },
    ));

    let risk_engine = Arc::new(RiskScoringEngine::new(
        results.clone(),
        scores.clone(),
        directory,
        course.clone(),
    ));

    let (training_tx, training_rx) = mpsc::channel(1024);
    let _assigner = spawn_training_assigner(course, training_rx);

    let (risk_tx, risk_rx) = mpsc::channel(1024);
    let _risk_worker = spawn_risk_worker(risk_engine.clone(), risk_rx);

    let tracking = Arc::new(TrackingService::new(
        results.clone(),
        campaigns.clone(),
        training_tx,
        risk_tx,
        TrackingPages {
            landing_url: args.landing_url.clone(),
            neutral_url: args.neutral_url.clone(),
        },
    ));

    let tracking_addr: SocketAddr = args.tracking_addr.parse()?;
    let shutdown_tracking = start_tracking_server(tracking, tracking_addr).await?;

    let _sweep = spawn_campaign_sweep(
        campaigns.clone(),
        dispatcher.clone(),
        risk_engine.clone(),
        Duration::from_secs(args.sweep_interval_secs),
    );
    let _risk_sweep = spawn_risk_sweep(
        scores.clone(),
        risk_engine,
        Duration::from_secs(args.risk_sweep_interval_secs),
    );

    info!("phishsim server running; Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    let _ = shutdown_tracking.send(());
    Ok(())
}
