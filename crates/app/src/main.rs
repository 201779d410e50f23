use std::sync::Arc;

use anyhow::{Context, bail};
use boxoffice_config::Config;
use boxoffice_db::housekeeping::{self, HousekeepingSettings};
use boxoffice_db::{BookingService, PgStore};
use boxoffice_gateway::HttpGateway;
use boxoffice_models::{Identity, ReservationId, Role, UserId};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;

mod api;
mod auth;
mod error;
mod input;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GIT_HASH: &str = env!("BOXOFFICE_GIT_HASH");

pub(crate) fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH})")
}

// --- CLI definition ---

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Parser)]
#[command(name = "boxoffice")]
#[command(about = "Attendee reservations and ticket issuance")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BOXOFFICE_GIT_HASH"), ")"))]
struct Cli {
    /// Log level (overrides config)
    #[arg(short, long, global = true)]
    log_level: Option<LogLevel>,

    /// Display log timestamps in UTC (default: local time)
    #[arg(long, global = true)]
    utc: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Database URL (overrides config)
    #[arg(long, global = true)]
    db_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the housekeeping loop
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Apply database migrations and exit
    Migrate,
    /// Delete pending reservations older than the configured TTL
    Cleanup,
    /// Issue tickets for confirmed reservations that have none
    Reconcile {
        /// How many reservations to process (overrides config)
        #[arg(long)]
        batch: Option<u32>,
    },
    /// Issue tickets for one confirmed reservation, if it has none yet
    IssueTickets {
        #[arg(long)]
        reservation_id: i64,
    },
    /// List a user's reservations
    ListReservations {
        #[arg(long)]
        user_id: i64,
    },
    /// List a user's confirmed tickets
    ListTickets {
        #[arg(long)]
        user_id: i64,
    },
}

// --- Logging ---

fn init_logging(level: &str, utc: bool, json: bool) {
    let filter = EnvFilter::new(level);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (utc, json) {
        (true, true) => builder.json().with_timer(utc_timer()).init(),
        (true, false) => builder.with_timer(utc_timer()).init(),
        (false, true) => builder.json().with_timer(LocalTimer).init(),
        (false, false) => builder.with_timer(LocalTimer).init(),
    }
}

fn utc_timer() -> OffsetTime<&'static [time::format_description::BorrowedFormatItem<'static>]> {
    OffsetTime::new(
        time::UtcOffset::UTC,
        time::macros::format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        ),
    )
}

struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

// --- Server ---

fn housekeeping_settings(config: &Config) -> HousekeepingSettings {
    HousekeepingSettings {
        pending_ttl: config.pending_ttl(),
        interval: config.housekeeping_interval(),
        reconcile_batch: config.reconcile_batch_size,
    }
}

async fn run_server(config: &Config, booking: BookingService<PgStore>) -> anyhow::Result<()> {
    info!("boxoffice v{}", version_string());

    if config.jwt_secret.is_empty() {
        bail!("jwt_secret is not set; configure it or export JWT_SECRET");
    }

    let state = api::AppState {
        booking: booking.clone(),
        verifier: Arc::new(auth::TokenVerifier::new(&config.jwt_secret)),
        gateway: Arc::new(HttpGateway::new(
            &config.gateway_url,
            &config.gateway_secret_key,
        )),
        currency: Arc::from(config.gateway_currency.as_str()),
    };
    let app = api::router(state).layer(TraceLayer::new_for_http());

    let housekeeping = housekeeping::run_periodic(booking, housekeeping_settings(config));

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    housekeeping.abort();
    info!("Server stopped");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// --- Main ---

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load().with_context(|| {
        format!("failed to read {}", Config::file_path().display())
    })?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.to_string();
    }
    if cli.utc {
        config.utc = true;
    }
    if let Some(url) = cli.db_url {
        config.db_url = url;
    }
    if let Commands::Serve { port: Some(port) } = cli.command {
        config.port = port;
    }

    init_logging(&config.log_level, config.utc, cli.log_json);

    let pool = boxoffice_db::connect(
        &config.db_url,
        config.db_max_connections,
        config.db_acquire_timeout(),
    )
    .await?;
    boxoffice_db::migrate(&pool).await?;

    let store = PgStore::new(pool, config.lock_timeout());
    let booking = BookingService::new(Arc::new(store));

    match cli.command {
        Commands::Serve { .. } => {
            run_server(&config, booking).await?;
        }
        Commands::Migrate => {}
        Commands::Cleanup => {
            let deleted =
                housekeeping::cleanup_expired_pending(booking.store(), config.pending_ttl()).await?;
            println!("{deleted} expired pending reservation(s) deleted");
        }
        Commands::Reconcile { batch } => {
            let batch = batch.unwrap_or(config.reconcile_batch_size);
            let (mut repaired, mut tickets, mut failed) = (0, 0, 0);
            let mut after = None;
            loop {
                let summary = housekeeping::reconcile_unissued(&booking, after, batch).await?;
                repaired += summary.repaired;
                tickets += summary.tickets;
                failed += summary.failed;
                match summary.next_after {
                    Some(next) => after = Some(next),
                    None => break,
                }
            }
            println!("{repaired} reservation(s) repaired, {tickets} ticket(s) issued, {failed} failed");
        }
        Commands::IssueTickets { reservation_id } => {
            let report = booking.issue_tickets(ReservationId(reservation_id)).await?;
            if report.issued == 0 {
                println!("Reservation {reservation_id} already has its tickets.");
            } else {
                println!("{} ticket(s) issued for reservation {reservation_id}", report.issued);
            }
        }
        Commands::ListReservations { user_id } => {
            let identity = Identity {
                user_id: UserId(user_id),
                role: Role::Attendee,
            };
            let rows = booking.list_reservations(&identity).await?;
            if rows.is_empty() {
                println!("No reservations found.");
            } else {
                println!(
                    "{:<8} {:<30} {:<12} {:<6} {:>10} {:<10}",
                    "ID", "Event", "Date", "Qty", "Total", "Status"
                );
                println!("{}", "-".repeat(82));
                for r in &rows {
                    println!(
                        "{:<8} {:<30} {:<12} {:<6} {:>10} {:<10}",
                        r.reservation.reservation_id,
                        r.event_title,
                        r.event_date,
                        r.reservation.quantity,
                        r.reservation.total_price.to_string(),
                        r.reservation.payment_status,
                    );
                }
                println!("\n{} reservation(s) total", rows.len());
            }
        }
        Commands::ListTickets { user_id } => {
            let identity = Identity {
                user_id: UserId(user_id),
                role: Role::Attendee,
            };
            let tickets = booking.list_tickets(&identity).await?;
            if tickets.is_empty() {
                println!("No tickets found.");
            } else {
                println!(
                    "{:<8} {:<12} {:<4} {:<30} {:<12} {}",
                    "Ticket", "Reservation", "#", "Event", "Date", "Venue"
                );
                println!("{}", "-".repeat(90));
                for t in &tickets {
                    println!(
                        "{:<8} {:<12} {:<4} {:<30} {:<12} {}",
                        t.ticket.ticket_id,
                        t.ticket.reservation_id,
                        t.ticket.ticket_number,
                        t.event_name,
                        t.event_date,
                        t.venue_name.as_deref().unwrap_or("-"),
                    );
                }
                println!("\n{} ticket(s) total", tickets.len());
            }
        }
    }

    Ok(())
}
