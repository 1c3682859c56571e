use std::collections::HashMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;
use tracing::{info, warn};

use super::{AppState, guest_from_form, parse_form, validate_guest_form};
use crate::error::AppError;
use crate::forms::Form;
use crate::mail::MailData;
use crate::model::*;
use crate::render::TemplateData;
use crate::session::Session;
use crate::store::StoreError;

fn stay_from(start: &str, end: &str) -> Option<Stay> {
    Stay::new(parse_date(start)?, parse_date(end)?)
}

fn dates_map(td: &mut TemplateData, stay: &Stay) {
    td.string("start_date", format_date(stay.start));
    td.string("end_date", format_date(stay.end));
}

pub async fn post_availability(
    State(state): State<AppState>,
    session: Session,
    body: Bytes,
) -> Result<Response, AppError> {
    let values = parse_form(&body).unwrap_or_default();
    let get = |k: &str| values.get(k).map(String::as_str).unwrap_or("");
    let Some(stay) = stay_from(get("start"), get("end")) else {
        session.put_error("Please enter a valid arrival and departure date");
        return Ok(Redirect::to("/search-availability").into_response());
    };

    let rooms = match state
        .store
        .search_availability_for_all_rooms(stay.start, stay.end)
        .await
    {
        Ok(rooms) => rooms,
        Err(StoreError::LimitExceeded(_) | StoreError::InvalidStay) => {
            session.put_error("Please choose a shorter date range");
            return Ok(Redirect::to("/search-availability").into_response());
        }
        Err(e) => return Err(e.into()),
    };
    if rooms.is_empty() {
        session.put_error("No rooms available");
        return Ok(Redirect::to("/search-availability").into_response());
    }

    session.put_reservation(ReservationDraft::new(stay));
    let mut td = TemplateData::default();
    td.insert("rooms", &rooms);
    dates_map(&mut td, &stay);
    Ok(state
        .page(&session, "choose-room.page.tmpl", td)?
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub ok: bool,
    pub message: String,
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
}

/// Availability of one room, answered as JSON for the room pages' date picker.
pub async fn availability_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Json<AvailabilityResponse> {
    let values = parse_form(&body).unwrap_or_default();
    let get = |k: &str| values.get(k).cloned().unwrap_or_default();
    let mut resp = AvailabilityResponse {
        ok: false,
        message: String::new(),
        room_id: get("room_id"),
        start_date: get("start"),
        end_date: get("end"),
    };

    let Ok(room_id) = resp.room_id.trim().parse::<RoomId>() else {
        resp.message = "Invalid room".into();
        return Json(resp);
    };
    let Some(stay) = stay_from(&resp.start_date, &resp.end_date) else {
        resp.message = "Invalid dates".into();
        return Json(resp);
    };

    match state
        .store
        .search_availability_by_dates_by_room_id(stay.start, stay.end, room_id)
        .await
    {
        Ok(available) => resp.ok = available,
        Err(StoreError::NotFound { .. }) => resp.message = "Invalid room".into(),
        Err(e) => {
            warn!("availability lookup failed: {e}");
            resp.message = "Error querying availability".into();
        }
    }
    Json(resp)
}

pub async fn choose_room(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<String>,
) -> Response {
    let Some(mut draft) = session.reservation() else {
        session.put_error("Can't get reservation from session");
        return Redirect::to("/").into_response();
    };
    let room = match id.parse::<RoomId>() {
        Ok(room_id) => state.store.room_by_id(room_id).await.ok(),
        Err(_) => None,
    };
    let Some(room) = room else {
        session.put_error("Can't find room");
        return Redirect::to("/").into_response();
    };

    draft.room_id = Some(room.id);
    draft.room_name = room.name;
    session.put_reservation(draft);
    Redirect::to("/make-reservation").into_response()
}

/// Start a reservation straight from a room page: `?id=&s=&e=`.
pub async fn book_room(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let get = |k: &str| params.get(k).map(String::as_str).unwrap_or("");
    let room = match get("id").parse::<RoomId>() {
        Ok(id) => state.store.room_by_id(id).await.ok(),
        Err(_) => None,
    };
    let Some(room) = room else {
        session.put_error("Can't get room from database");
        return Redirect::to("/").into_response();
    };
    let Some(stay) = stay_from(get("s"), get("e")) else {
        session.put_error("Invalid dates");
        return Redirect::to("/").into_response();
    };

    let mut draft = ReservationDraft::new(stay);
    draft.room_id = Some(room.id);
    draft.room_name = room.name;
    session.put_reservation(draft);
    Redirect::to("/make-reservation").into_response()
}

pub async fn make_reservation(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, AppError> {
    let Some(mut draft) = session.reservation() else {
        session.put_error("Can't get reservation from session");
        return Ok(Redirect::temporary("/").into_response());
    };
    let room = match draft.room_id {
        Some(id) => state.store.room_by_id(id).await.ok(),
        None => None,
    };
    let Some(room) = room else {
        session.put_error("Can't find room");
        return Ok(Redirect::temporary("/").into_response());
    };
    draft.room_name = room.name;
    session.put_reservation(draft.clone());

    let mut td = TemplateData::with_form(Form::default());
    td.insert("reservation", &draft);
    dates_map(&mut td, &draft.stay);
    Ok(state
        .page(&session, "make-reservation.page.tmpl", td)?
        .into_response())
}

fn confirmation_mail(state: &AppState, draft: &ReservationDraft) -> MailData {
    MailData {
        to: draft.guest.email.clone(),
        from: state.config.owner_email.clone(),
        subject: "Reservation Confirmation".into(),
        content: format!(
            "<strong>Reservation Confirmation</strong><br>\nDear {}:<br>\nThis is to confirm your reservation from {} to {}.\n",
            draft.guest.first_name,
            format_date(draft.stay.start),
            format_date(draft.stay.end)
        ),
        template: Some("basic.html".into()),
    }
}

fn owner_notification(state: &AppState, draft: &ReservationDraft) -> MailData {
    MailData {
        to: state.config.owner_email.clone(),
        from: state.config.owner_email.clone(),
        subject: "Reservation Notification".into(),
        content: format!(
            "<strong>Reservation Notification</strong><br>\nA reservation has been made for {} from {} to {}.\n",
            draft.room_name,
            format_date(draft.stay.start),
            format_date(draft.stay.end)
        ),
        template: None,
    }
}

pub async fn post_reservation(
    State(state): State<AppState>,
    session: Session,
    body: Bytes,
) -> Result<Response, AppError> {
    let Some(values) = parse_form(&body) else {
        session.put_error("Can't parse form");
        return Ok(Redirect::to("/").into_response());
    };
    let mut form = Form::new(values);

    let Some(stay) = stay_from(form.get("start_date"), form.get("end_date")) else {
        session.put_error("Can't parse dates");
        return Ok(Redirect::to("/").into_response());
    };
    let room = match form.get("room_id").trim().parse::<RoomId>() {
        Ok(id) => state.store.room_by_id(id).await.ok(),
        Err(_) => None,
    };
    let Some(room) = room else {
        session.put_error("Can't find room");
        return Ok(Redirect::to("/").into_response());
    };

    let mut draft = ReservationDraft::new(stay);
    draft.room_id = Some(room.id);
    draft.room_name = room.name;
    draft.guest = guest_from_form(&form);

    validate_guest_form(&mut form);
    if !form.valid() {
        let mut td = TemplateData::with_form(form);
        td.insert("reservation", &draft);
        dates_map(&mut td, &stay);
        return Ok(state
            .page(&session, "make-reservation.page.tmpl", td)?
            .into_response());
    }

    let id = match state
        .store
        .insert_reservation(room.id, draft.guest.clone(), stay)
        .await
    {
        Ok(id) => id,
        Err(StoreError::Conflict(_)) => {
            session.put_error("Those dates are no longer available");
            return Ok(Redirect::to("/search-availability").into_response());
        }
        Err(e @ (StoreError::InvalidStay | StoreError::LimitExceeded(_))) => {
            session.put_error(format!("Can't make reservation: {e}"));
            return Ok(Redirect::to("/").into_response());
        }
        Err(e) => return Err(e.into()),
    };
    draft.id = Some(id);
    info!(reservation = id, room = room.id, "reservation created");

    state.mailer.send(confirmation_mail(&state, &draft));
    state.mailer.send(owner_notification(&state, &draft));

    session.put_reservation(draft);
    Ok(Redirect::to("/reservation-summary").into_response())
}

pub async fn reservation_summary(
    State(state): State<AppState>,
    session: Session,
) -> Result<Response, AppError> {
    let Some(draft) = session.pop_reservation() else {
        session.put_error("Can't get reservation from session");
        return Ok(Redirect::temporary("/").into_response());
    };
    let mut td = TemplateData::default();
    td.insert("reservation", &draft);
    dates_map(&mut td, &draft.stay);
    Ok(state
        .page(&session, "reservation-summary.page.tmpl", td)?
        .into_response())
}
