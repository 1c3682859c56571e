pub mod admin;
pub mod login;
pub mod pages;
pub mod reservations;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::response::Html;

use crate::config::Config;
use crate::error::AppError;
use crate::forms::Form;
use crate::limits::MAX_FIELD_LEN;
use crate::mail::Mailer;
use crate::render::{Renderer, TemplateData};
use crate::session::{Session, SessionStore};
use crate::store::Store;

/// Shared handles every handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub renderer: Arc<Renderer>,
    pub sessions: Arc<SessionStore>,
    pub mailer: Mailer,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn page(
        &self,
        session: &Session,
        name: &str,
        td: TemplateData,
    ) -> Result<Html<String>, AppError> {
        self.renderer.page(session, name, td)
    }
}

/// Decode an url-encoded body. Repeated names keep the last value.
pub(crate) fn parse_form(body: &Bytes) -> Option<HashMap<String, String>> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .ok()
        .map(|pairs| pairs.into_iter().collect())
}

/// Guest details shared by the public booking form and the admin editor.
pub(crate) fn validate_guest_form(form: &mut Form) {
    const FIELDS: [&str; 4] = ["first_name", "last_name", "email", "phone"];
    form.required(&FIELDS);
    for field in FIELDS {
        form.max_length(field, MAX_FIELD_LEN);
    }
    form.min_length("first_name", 3);
    form.min_length("last_name", 2);
    form.is_email("email");
}

pub(crate) fn guest_from_form(form: &Form) -> crate::model::Guest {
    crate::model::Guest {
        first_name: form.get("first_name").trim().to_string(),
        last_name: form.get("last_name").trim().to_string(),
        email: form.get("email").trim().to_string(),
        phone: form.get("phone").trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_form_last_value_wins() {
        let body = Bytes::from_static(b"a=1&b=two+words&a=3");
        let values = parse_form(&body).unwrap();
        assert_eq!(values["a"], "3");
        assert_eq!(values["b"], "two words");
    }

    #[test]
    fn guest_form_rules() {
        let mut form = Form::new(
            [
                ("first_name", "Jo"),
                ("last_name", "S"),
                ("email", "nope"),
                ("phone", ""),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        validate_guest_form(&mut form);
        for field in ["first_name", "last_name", "email", "phone"] {
            assert!(form.errors.get(field).is_some(), "{field} should fail");
        }
    }

    #[test]
    fn guest_form_caps_field_length() {
        let long = "5".repeat(MAX_FIELD_LEN + 1);
        let mut form = Form::new(
            [
                ("first_name", "John"),
                ("last_name", "Smith"),
                ("email", "john@smith.com"),
                ("phone", long.as_str()),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );
        validate_guest_form(&mut form);
        assert!(!form.valid());
        assert!(form.errors.get("phone").is_some());
        assert!(form.errors.get("first_name").is_none());
    }
}
