use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::get;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::csrf::csrf_guard;
use crate::handlers::{AppState, admin, login, pages, reservations};
use crate::observability::track_metrics;
use crate::session::session_layer;

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(admin::dashboard))
        .route("/reservations-new", get(admin::new_reservations))
        .route("/reservations-all", get(admin::all_reservations))
        .route(
            "/reservations-calendar",
            get(admin::calendar).post(admin::post_calendar),
        )
        .route(
            "/reservations/{src}/{id}/show",
            get(admin::show_reservation).post(admin::post_show_reservation),
        )
        .route(
            "/process-reservation/{src}/{id}/do",
            get(admin::process_reservation),
        )
        .route(
            "/delete-reservation/{src}/{id}/do",
            get(admin::delete_reservation),
        )
        .route_layer(from_fn(login::require_auth))
}

/// The whole site. Layers run outermost first: tracing, session, CSRF.
pub fn router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();
    let sessions = state.sessions.clone();

    Router::new()
        .route("/", get(pages::home))
        .route("/about", get(pages::about))
        .route("/contact", get(pages::contact))
        .route("/generals-quarters", get(pages::generals_quarters))
        .route("/colonels-suite", get(pages::colonels_suite))
        .route(
            "/search-availability",
            get(pages::search_availability).post(reservations::post_availability),
        )
        .route(
            "/search-availability-json",
            axum::routing::post(reservations::availability_json),
        )
        .route("/choose-room/{id}", get(reservations::choose_room))
        .route("/book-room", get(reservations::book_room))
        .route(
            "/make-reservation",
            get(reservations::make_reservation).post(reservations::post_reservation),
        )
        .route("/reservation-summary", get(reservations::reservation_summary))
        .route("/user/login", get(login::show_login).post(login::post_login))
        .route("/user/logout", get(login::logout))
        .nest("/admin", admin_routes())
        .route_layer(from_fn(track_metrics))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(from_fn(csrf_guard))
        .layer(from_fn_with_state(sessions, session_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
