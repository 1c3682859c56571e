use std::collections::HashMap;

use axum::Form as Posted;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Redirect, Response};
use tracing::{info, warn};

use super::AppState;
use crate::error::AppError;
use crate::forms::Form;
use crate::render::TemplateData;
use crate::session::Session;
use crate::store::StoreError;

pub async fn show_login(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    state.page(
        &session,
        "login.page.tmpl",
        TemplateData::with_form(Form::default()),
    )
}

pub async fn post_login(
    State(state): State<AppState>,
    session: Session,
    Posted(values): Posted<HashMap<String, String>>,
) -> Result<Response, AppError> {
    session.renew_token();

    let mut form = Form::new(values);
    form.required(&["email", "password"]);
    form.is_email("email");
    if !form.valid() {
        return Ok(state
            .page(&session, "login.page.tmpl", TemplateData::with_form(form))?
            .into_response());
    }

    match state
        .store
        .authenticate(form.get("email"), form.get("password"))
        .await
    {
        Ok((user_id, _)) => {
            info!(user = user_id, "user logged in");
            session.set_user_id(user_id);
            session.put_flash("Logged in successfully");
            Ok(Redirect::to("/").into_response())
        }
        Err(StoreError::InvalidCredentials) => {
            warn!("failed login for {}", form.get("email"));
            metrics::counter!(crate::observability::LOGIN_FAILURES_TOTAL).increment(1);
            session.put_error("Invalid login credentials");
            Ok(Redirect::to("/user/login").into_response())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn logout(session: Session) -> Redirect {
    session.destroy();
    session.renew_token();
    Redirect::to("/")
}

/// Gate for `/admin`: anyone without a logged-in user goes to the login page.
pub async fn require_auth(session: Session, req: Request, next: Next) -> Response {
    if !session.is_authenticated() {
        session.put_error("Log in first!");
        return Redirect::to("/user/login").into_response();
    }
    next.run(req).await
}
