pub mod auth;
pub mod config;
pub mod csrf;
pub mod error;
pub mod forms;
pub mod handlers;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod render;
pub mod routes;
pub mod session;
pub mod store;
pub mod wal;

use std::sync::Arc;

use tracing::{info, warn};

use config::Config;
use handlers::AppState;
use mail::Mailer;
use render::Renderer;
use session::SessionStore;
use store::{Store, StoreError};

/// Create the owner account from config if it does not exist yet.
pub async fn seed_admin(store: &Store, config: &Config) -> Result<(), StoreError> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };
    match store
        .create_user(
            "Admin",
            "User",
            email,
            password,
            auth::ADMIN_ACCESS_LEVEL,
            config.bcrypt_cost,
        )
        .await
    {
        Ok(id) => {
            info!(user = id, "seeded admin account {email}");
            Ok(())
        }
        Err(StoreError::DuplicateEmail(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Open the store, seed it and wire up shared state. Returns the state and
/// the receiving end of the mail queue for the caller to drain.
pub async fn build_state(
    config: Config,
) -> Result<(AppState, tokio::sync::mpsc::Receiver<mail::MailData>), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(config.wal_path())?);
    let seeded = store.seed_defaults().await?;
    if seeded > 0 {
        info!("fresh store, created {seeded} rooms");
    }
    if config.admin_email.is_none() {
        warn!("BOOKINGS_ADMIN_EMAIL not set, no admin account will be seeded");
    }
    seed_admin(&store, &config).await?;

    let renderer = Arc::new(Renderer::new(config.template_dir.clone(), config.use_cache)?);
    let sessions = Arc::new(SessionStore::new(
        config.session_lifetime,
        config.in_production,
    ));
    let (mailer, mail_rx) = Mailer::channel();

    let state = AppState {
        store,
        renderer,
        sessions,
        mailer,
        config: Arc::new(config),
    };
    Ok((state, mail_rx))
}
