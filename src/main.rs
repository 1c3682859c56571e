use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bookings::config::Config;
use bookings::mail::{LogTransport, MailDropTransport, MailTransport, run_mail_listener};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    bookings::observability::init(config.metrics_port);

    let transport: Box<dyn MailTransport> = match &config.mail_dir {
        Some(dir) => Box::new(MailDropTransport::new(dir.clone())?),
        None => Box::new(LogTransport),
    };
    let mail_template_dir = config.mail_template_dir.clone();
    let compact_threshold = config.compact_threshold;
    let addr = format!("{}:{}", config.bind, config.port);
    let metrics_port = config.metrics_port;

    let (state, mail_rx) = bookings::build_state(config).await?;

    info!("starting mail listener");
    let mail_task = tokio::spawn(run_mail_listener(mail_rx, transport, mail_template_dir));
    tokio::spawn(bookings::reaper::run_compactor(
        state.store.clone(),
        compact_threshold,
    ));
    tokio::spawn(bookings::reaper::run_session_reaper(state.sessions.clone()));

    let listener = TcpListener::bind(&addr).await?;
    info!("bookings listening on {addr}");
    info!("  data_dir: {}", state.config.data_dir.display());
    info!("  production: {}", state.config.in_production);
    info!("  template cache: {}", state.config.use_cache);
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let app = bookings::routes::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last Mailer; the listener drains what is queued and exits.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(10), mail_task).await;
    info!("bookings stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining connections");
}
