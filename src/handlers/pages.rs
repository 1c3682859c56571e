use axum::extract::State;
use axum::response::Html;

use super::AppState;
use crate::error::AppError;
use crate::render::TemplateData;
use crate::session::Session;

pub async fn home(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    state.page(&session, "home.page.tmpl", TemplateData::default())
}

pub async fn about(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    state.page(&session, "about.page.tmpl", TemplateData::default())
}

pub async fn contact(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    let mut td = TemplateData::default();
    td.string("owner_email", state.config.owner_email.clone());
    state.page(&session, "contact.page.tmpl", td)
}

pub async fn generals_quarters(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    state.page(&session, "generals-quarters.page.tmpl", TemplateData::default())
}

pub async fn colonels_suite(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    state.page(&session, "colonels-suite.page.tmpl", TemplateData::default())
}

pub async fn search_availability(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    state.page(&session, "search-availability.page.tmpl", TemplateData::default())
}
