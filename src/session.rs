use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::model::{ReservationDraft, RestrictionId, RoomId, UserId};

pub const COOKIE_NAME: &str = "session";

/// Date (`YYYY-MM-DD`) → block id, per room, as shown on the last calendar render.
pub type BlockMaps = HashMap<RoomId, HashMap<String, RestrictionId>>;

#[derive(Debug, Clone)]
pub struct SessionData {
    pub flash: Option<String>,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub user_id: Option<UserId>,
    pub reservation: Option<ReservationDraft>,
    pub block_maps: BlockMaps,
    pub csrf_token: String,
    pub expires_at: Instant,
}

impl SessionData {
    fn new(lifetime: Duration) -> Self {
        Self {
            flash: None,
            error: None,
            warning: None,
            user_id: None,
            reservation: None,
            block_maps: HashMap::new(),
            csrf_token: Ulid::new().to_string(),
            expires_at: Instant::now() + lifetime,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Server-side session storage keyed by the cookie value.
pub struct SessionStore {
    sessions: DashMap<Ulid, SessionData>,
    lifetime: Duration,
    secure: bool,
}

impl SessionStore {
    pub fn new(lifetime: Duration, secure: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            lifetime,
            secure,
        }
    }

    fn load(&self, id: &Ulid) -> Option<SessionData> {
        let data = self.sessions.get(id)?.value().clone();
        if data.expired(Instant::now()) {
            self.sessions.remove(id);
            return None;
        }
        Some(data)
    }

    /// Drop every expired session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, data| !data.expired(now));
        let removed = before.saturating_sub(self.sessions.len());
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn cookie(&self, id: Ulid, expires_at: Instant) -> String {
        let max_age = expires_at.saturating_duration_since(Instant::now()).as_secs();
        let mut cookie =
            format!("{COOKIE_NAME}={id}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

struct SessionInner {
    id: Ulid,
    /// Id to drop from the store on commit after a renew or destroy.
    retired: Option<Ulid>,
    data: SessionData,
    lifetime: Duration,
    /// Set once the request changes the session or hands out its token.
    /// Untouched sessions are neither stored nor sent as a cookie.
    modified: bool,
}

/// Per-request handle to the caller's session. Changes are written back to
/// the store when the response leaves the session middleware.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

impl Session {
    fn new(id: Ulid, data: SessionData, lifetime: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                id,
                retired: None,
                data,
                lifetime,
                modified: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut inner = self.lock();
        inner.modified = true;
        f(&mut inner.data)
    }

    /// Take a value out, marking the session modified only if there was one.
    fn take<T>(&self, f: impl FnOnce(&mut SessionData) -> Option<T>) -> Option<T> {
        let mut inner = self.lock();
        let taken = f(&mut inner.data);
        if taken.is_some() {
            inner.modified = true;
        }
        taken
    }

    pub fn is_modified(&self) -> bool {
        self.lock().modified
    }

    pub fn put_flash(&self, msg: impl Into<String>) {
        self.update(|d| d.flash = Some(msg.into()));
    }

    pub fn put_error(&self, msg: impl Into<String>) {
        self.update(|d| d.error = Some(msg.into()));
    }

    pub fn put_warning(&self, msg: impl Into<String>) {
        self.update(|d| d.warning = Some(msg.into()));
    }

    pub fn pop_flash(&self) -> Option<String> {
        self.take(|d| d.flash.take())
    }

    pub fn pop_error(&self) -> Option<String> {
        self.take(|d| d.error.take())
    }

    pub fn pop_warning(&self) -> Option<String> {
        self.take(|d| d.warning.take())
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.lock().data.user_id
    }

    pub fn set_user_id(&self, id: UserId) {
        self.update(|d| d.user_id = Some(id));
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }

    pub fn reservation(&self) -> Option<ReservationDraft> {
        self.lock().data.reservation.clone()
    }

    pub fn put_reservation(&self, draft: ReservationDraft) {
        self.update(|d| d.reservation = Some(draft));
    }

    pub fn pop_reservation(&self) -> Option<ReservationDraft> {
        self.take(|d| d.reservation.take())
    }

    pub fn block_map(&self, room_id: RoomId) -> HashMap<String, RestrictionId> {
        self.lock()
            .data
            .block_maps
            .get(&room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn put_block_maps(&self, maps: BlockMaps) {
        self.update(|d| d.block_maps = maps);
    }

    /// The session's CSRF token. A token handed to a page has to survive
    /// until the form comes back, so reading it keeps the session.
    pub fn csrf_token(&self) -> String {
        self.update(|d| d.csrf_token.clone())
    }

    /// The token a submitted form must match. Checking does not keep the
    /// session.
    pub(crate) fn expected_csrf_token(&self) -> String {
        self.lock().data.csrf_token.clone()
    }

    /// Move the data to a fresh id. Done on privilege changes so a session
    /// id seen before login is useless after it.
    pub fn renew_token(&self) {
        let mut inner = self.lock();
        let old = inner.id;
        inner.retired.get_or_insert(old);
        inner.id = Ulid::new();
        inner.modified = true;
    }

    /// Throw away everything in the session, including the CSRF token.
    pub fn destroy(&self) {
        let mut inner = self.lock();
        let old = inner.id;
        inner.retired.get_or_insert(old);
        inner.data = SessionData::new(inner.lifetime);
        inner.id = Ulid::new();
        inner.modified = true;
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"))
    }
}

fn cookie_session_id(headers: &HeaderMap) -> Option<Ulid> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .and_then(|(_, value)| Ulid::from_string(value.trim()).ok())
}

/// Load (or start) the caller's session and run the handler. A session the
/// handler touched is saved, and its cookie sent if the id changed.
pub async fn session_layer(
    State(store): State<Arc<SessionStore>>,
    mut req: Request,
    next: Next,
) -> Response {
    let presented = cookie_session_id(req.headers());
    let (id, data) = match presented.and_then(|id| store.load(&id).map(|data| (id, data))) {
        Some(found) => found,
        None => {
            if presented.is_some() {
                debug!("unknown or expired session presented, starting a new one");
            }
            (Ulid::new(), SessionData::new(store.lifetime))
        }
    };

    let session = Session::new(id, data, store.lifetime);
    req.extensions_mut().insert(session.clone());
    let mut response = next.run(req).await;

    let (id, expires_at) = {
        let mut inner = session.lock();
        if !inner.modified {
            return response;
        }
        if let Some(old) = inner.retired.take() {
            store.sessions.remove(&old);
        }
        store.sessions.insert(inner.id, inner.data.clone());
        (inner.id, inner.data.expires_at)
    };

    if presented != Some(id) {
        match HeaderValue::from_str(&store.cookie(id, expires_at)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("could not encode session cookie: {e}"),
        }
    }
    response
}
