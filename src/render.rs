use std::collections::HashMap;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

use axum::response::Html;
use minijinja::{AutoEscape, Environment, ErrorKind, Value};
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;
use crate::forms::Form;
use crate::model::{DATE_FORMAT, parse_date};
use crate::session::Session;

/// Everything a page template can see.
#[derive(Debug, Default, Serialize)]
pub struct TemplateData {
    pub string_map: HashMap<String, String>,
    pub int_map: HashMap<String, i64>,
    pub float_map: HashMap<String, f64>,
    pub data: HashMap<String, Value>,
    pub csrf_token: String,
    pub flash: String,
    pub warning: String,
    pub error: String,
    pub form: Option<Form>,
    pub is_authenticated: bool,
}

impl TemplateData {
    pub fn with_form(form: Form) -> Self {
        Self {
            form: Some(form),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Serialize) -> &mut Self {
        self.data.insert(key.to_string(), Value::from_serialize(value));
        self
    }

    pub fn string(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.string_map.insert(key.to_string(), value.into());
        self
    }
}

/// Fill in the per-request fields: session messages (consumed), the CSRF
/// token and whether someone is logged in.
pub fn add_default_data(mut td: TemplateData, session: &Session) -> TemplateData {
    td.flash = session.pop_flash().unwrap_or_default();
    td.error = session.pop_error().unwrap_or_default();
    td.warning = session.pop_warning().unwrap_or_default();
    td.csrf_token = session.csrf_token();
    td.is_authenticated = session.is_authenticated();
    td
}

// ── Template functions ───────────────────────────────────

/// `YYYY-MM-DD` for a date or an RFC 3339 timestamp.
fn human_date(value: String) -> String {
    value.get(..10).unwrap_or(&value).to_string()
}

fn format_date(value: String, fmt: String) -> Result<String, minijinja::Error> {
    let date = value
        .get(..10)
        .and_then(parse_date)
        .ok_or_else(|| minijinja::Error::new(ErrorKind::InvalidOperation, "not a date"))?;
    let mut out = String::new();
    write!(out, "{}", date.format(&fmt))
        .map_err(|_| minijinja::Error::new(ErrorKind::InvalidOperation, "bad date format"))?;
    Ok(out)
}

fn iterate(count: i64) -> Vec<i64> {
    (0..count.max(0)).collect()
}

fn add(a: i64, b: i64) -> i64 {
    a + b
}

fn is_template(name: &str) -> bool {
    name.ends_with(".page.tmpl") || name.ends_with(".layout.tmpl")
}

/// Every page and layout in `dir`, registered under its file name.
pub fn build_environment(dir: &Path) -> Result<Environment<'static>, AppError> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.add_function("human_date", human_date);
    env.add_function("format_date", format_date);
    env.add_function("iterate", iterate);
    env.add_function("add", add);
    env.add_global("date_format", DATE_FORMAT);

    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::Internal(format!("reading {}: {e}", dir.display())))?;
    for entry in entries {
        let path = entry
            .map_err(|e| AppError::Internal(format!("reading {}: {e}", dir.display())))?
            .path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if !is_template(&name) {
            continue;
        }
        let source = fs::read_to_string(&path)
            .map_err(|e| AppError::Internal(format!("reading {}: {e}", path.display())))?;
        env.add_template_owned(name, source)?;
    }
    debug!("loaded templates from {}", dir.display());
    Ok(env)
}

/// Page renderer. With the cache on, templates are parsed once at startup;
/// with it off they are re-read on every render.
pub struct Renderer {
    dir: PathBuf,
    cached: Option<Environment<'static>>,
}

impl Renderer {
    pub fn new(dir: PathBuf, use_cache: bool) -> Result<Self, AppError> {
        let cached = if use_cache {
            Some(build_environment(&dir)?)
        } else {
            None
        };
        Ok(Self { dir, cached })
    }

    pub fn render(&self, name: &str, data: &TemplateData) -> Result<String, AppError> {
        match &self.cached {
            Some(env) => Ok(env.get_template(name)?.render(data)?),
            None => {
                let env = build_environment(&self.dir)?;
                Ok(env.get_template(name)?.render(data)?)
            }
        }
    }

    pub fn page(
        &self,
        session: &Session,
        name: &str,
        td: TemplateData,
    ) -> Result<Html<String>, AppError> {
        let td = add_default_data(td, session);
        self.render(name, &td).map(Html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn template_dir(files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("bookings_test_render")
            .join(Ulid::new().to_string());
        fs::create_dir_all(&dir).unwrap();
        for (name, body) in files {
            fs::write(dir.join(name), body).unwrap();
        }
        dir
    }

    #[test]
    fn page_extends_layout() {
        let dir = template_dir(&[
            ("base.layout.tmpl", "<main>{% block content %}{% endblock %}</main>"),
            (
                "home.page.tmpl",
                r#"{% extends "base.layout.tmpl" %}{% block content %}{{ string_map.greeting }}{% endblock %}"#,
            ),
            ("notes.txt", "ignored"),
        ]);
        let renderer = Renderer::new(dir, true).unwrap();
        let mut td = TemplateData::default();
        td.string("greeting", "hello");
        assert_eq!(renderer.render("home.page.tmpl", &td).unwrap(), "<main>hello</main>");
    }

    #[test]
    fn values_are_html_escaped() {
        let dir = template_dir(&[("x.page.tmpl", "{{ string_map.name }}")]);
        let renderer = Renderer::new(dir, true).unwrap();
        let mut td = TemplateData::default();
        td.string("name", "<script>");
        assert_eq!(renderer.render("x.page.tmpl", &td).unwrap(), "&lt;script&gt;");
    }

    #[test]
    fn unknown_template_is_an_error() {
        let renderer = Renderer::new(template_dir(&[]), true).unwrap();
        assert!(matches!(
            renderer.render("missing.page.tmpl", &TemplateData::default()),
            Err(AppError::Template(_))
        ));
    }

    #[test]
    fn uncached_renderer_sees_edits() {
        let dir = template_dir(&[("a.page.tmpl", "one")]);
        let renderer = Renderer::new(dir.clone(), false).unwrap();
        assert_eq!(renderer.render("a.page.tmpl", &TemplateData::default()).unwrap(), "one");
        fs::write(dir.join("a.page.tmpl"), "two").unwrap();
        assert_eq!(renderer.render("a.page.tmpl", &TemplateData::default()).unwrap(), "two");
    }

    #[test]
    fn template_functions() {
        let dir = template_dir(&[(
            "f.page.tmpl",
            r#"{{ human_date("2050-01-09T10:00:00Z") }}|{{ format_date("2050-01-09", "%d/%m") }}|{% for i in iterate(3) %}{{ add(i, 1) }}{% endfor %}"#,
        )]);
        let renderer = Renderer::new(dir, true).unwrap();
        assert_eq!(
            renderer.render("f.page.tmpl", &TemplateData::default()).unwrap(),
            "2050-01-09|09/01|123"
        );
    }
}
