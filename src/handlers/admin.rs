use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::response::{Html, IntoResponse, Redirect, Response};
use chrono::{Datelike, Months, NaiveDate, Utc};
use tracing::{info, warn};

use super::{AppState, guest_from_form, parse_form, validate_guest_form};
use crate::error::AppError;
use crate::forms::Form;
use crate::model::*;
use crate::render::TemplateData;
use crate::session::{BlockMaps, Session};

/// Lists a reservation can be opened from; the editor returns there.
const SOURCES: [&str; 3] = ["new", "all", "cal"];

fn check_source(src: &str) -> Result<(), AppError> {
    SOURCES.contains(&src).then_some(()).ok_or(AppError::NotFound)
}

fn reservation_id(raw: &str) -> Result<ReservationId, AppError> {
    raw.parse().map_err(|_| AppError::NotFound)
}

/// Back to the calendar month the owner came from, or to the list.
fn back_to(src: &str, year: &str, month: &str) -> Redirect {
    let calendar_month = year
        .trim()
        .parse::<i32>()
        .ok()
        .zip(month.trim().parse::<u32>().ok());
    if let Some((y, m)) = calendar_month {
        Redirect::to(&format!("/admin/reservations-calendar?y={y}&m={m}"))
    } else if src == "cal" {
        Redirect::to("/admin/reservations-calendar")
    } else {
        Redirect::to(&format!("/admin/reservations-{src}"))
    }
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or("")
}

pub async fn dashboard(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    state.page(&session, "admin-dashboard.page.tmpl", TemplateData::default())
}

pub async fn new_reservations(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    let mut td = TemplateData::default();
    td.insert("reservations", state.store.all_new_reservations().await);
    state.page(&session, "admin-new-reservations.page.tmpl", td)
}

pub async fn all_reservations(
    State(state): State<AppState>,
    session: Session,
) -> Result<Html<String>, AppError> {
    let mut td = TemplateData::default();
    td.insert("reservations", state.store.all_reservations().await);
    state.page(&session, "admin-all-reservations.page.tmpl", td)
}

fn show_data(res: &Reservation, src: &str, year: &str, month: &str, form: Form) -> TemplateData {
    let mut td = TemplateData::with_form(form);
    td.insert("reservation", res);
    td.string("src", src).string("year", year).string("month", month);
    td
}

pub async fn show_reservation(
    State(state): State<AppState>,
    session: Session,
    Path((src, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Html<String>, AppError> {
    check_source(&src)?;
    let res = state.store.reservation_by_id(reservation_id(&id)?).await?;
    let td = show_data(
        &res,
        &src,
        param(&params, "y"),
        param(&params, "m"),
        Form::default(),
    );
    state.page(&session, "admin-reservations-show.page.tmpl", td)
}

pub async fn post_show_reservation(
    State(state): State<AppState>,
    session: Session,
    Path((src, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, AppError> {
    check_source(&src)?;
    let id = reservation_id(&id)?;
    let values = parse_form(&body).ok_or(AppError::BadRequest)?;
    let mut form = Form::new(values);
    let year = form.get("year").to_string();
    let month = form.get("month").to_string();

    validate_guest_form(&mut form);
    if !form.valid() {
        let res = state.store.reservation_by_id(id).await?;
        let td = show_data(&res, &src, &year, &month, form);
        return Ok(state
            .page(&session, "admin-reservations-show.page.tmpl", td)?
            .into_response());
    }

    state
        .store
        .update_reservation(id, guest_from_form(&form))
        .await?;
    session.put_flash("Changes saved");
    Ok(back_to(&src, &year, &month).into_response())
}

pub async fn process_reservation(
    State(state): State<AppState>,
    session: Session,
    Path((src, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, AppError> {
    check_source(&src)?;
    let id = reservation_id(&id)?;
    state.store.update_processed_for_reservation(id, true).await?;
    info!(reservation = id, "reservation processed");
    session.put_flash("Reservation marked as processed");
    Ok(back_to(&src, param(&params, "y"), param(&params, "m")))
}

pub async fn delete_reservation(
    State(state): State<AppState>,
    session: Session,
    Path((src, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, AppError> {
    check_source(&src)?;
    let id = reservation_id(&id)?;
    state.store.delete_reservation(id).await?;
    info!(reservation = id, "reservation deleted");
    session.put_flash("Reservation deleted");
    Ok(back_to(&src, param(&params, "y"), param(&params, "m")))
}

/// First day of the requested month; the current month when `y` is absent.
fn month_start(year: &str, month: &str) -> Result<NaiveDate, AppError> {
    if year.is_empty() {
        let today = Utc::now().date_naive();
        return NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
            .ok_or_else(|| AppError::Internal("current month out of range".into()));
    }
    let y: i32 = year.trim().parse().map_err(|_| AppError::BadRequest)?;
    let m: u32 = month.trim().parse().map_err(|_| AppError::BadRequest)?;
    NaiveDate::from_ymd_opt(y, m, 1).ok_or(AppError::BadRequest)
}

/// Per-day maps for one room's month: reservation id per reserved night and
/// block id per blocked night. Days without either are 0.
fn month_maps(
    restrictions: &[Restriction],
    first: NaiveDate,
    last: NaiveDate,
) -> (HashMap<String, i64>, HashMap<String, i64>) {
    let days: Vec<NaiveDate> = first.iter_days().take_while(|d| *d <= last).collect();
    let mut reservation_map: HashMap<String, i64> =
        days.iter().map(|d| (format_date(*d), 0)).collect();
    let mut block_map = reservation_map.clone();

    for r in restrictions {
        let nights = r.stay.days().filter(|d| *d >= first && *d <= last);
        match (r.kind, r.reservation_id) {
            (RestrictionKind::Reservation, Some(res_id)) => {
                for night in nights {
                    reservation_map.insert(format_date(night), res_id);
                }
            }
            _ => {
                for night in nights {
                    block_map.insert(format_date(night), r.id);
                }
            }
        }
    }
    (reservation_map, block_map)
}

pub async fn calendar(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Html<String>, AppError> {
    let first = month_start(param(&params, "y"), param(&params, "m"))?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or(AppError::BadRequest)?;
    let last = next.pred_opt().ok_or(AppError::BadRequest)?;
    let previous = first
        .checked_sub_months(Months::new(1))
        .ok_or(AppError::BadRequest)?;

    let mut td = TemplateData::default();
    td.string("this_month", first.format("%m").to_string())
        .string("this_month_year", first.format("%Y").to_string())
        .string("this_month_name", first.format("%B").to_string())
        .string("next_month", next.format("%m").to_string())
        .string("next_month_year", next.format("%Y").to_string())
        .string("last_month", previous.format("%m").to_string())
        .string("last_month_year", previous.format("%Y").to_string());
    td.int_map.insert("days_in_month".into(), i64::from(last.day()));
    td.insert("now", format_date(first));
    let days: Vec<String> = first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(format_date)
        .collect();
    td.insert("days", days);

    let rooms = state.store.all_rooms().await;
    let mut block_maps: BlockMaps = HashMap::new();
    for room in &rooms {
        let restrictions = state
            .store
            .restrictions_for_room_by_date(room.id, first, last)
            .await?;
        let (reservation_map, block_map) = month_maps(&restrictions, first, last);

        block_maps.insert(
            room.id,
            block_map
                .iter()
                .filter(|(_, id)| **id > 0)
                .map(|(date, id)| (date.clone(), *id))
                .collect(),
        );
        td.insert(&format!("reservation_map_{}", room.id), reservation_map);
        td.insert(&format!("block_map_{}", room.id), block_map);
    }
    td.insert("rooms", &rooms);
    session.put_block_maps(block_maps);

    state.page(&session, "admin-reservations-calendar.page.tmpl", td)
}

/// `add_block_{room}_{date}` → (room, night).
fn parse_add_block(name: &str) -> Option<(RoomId, NaiveDate)> {
    let (room, date) = name.strip_prefix("add_block_")?.split_once('_')?;
    Some((room.parse().ok()?, parse_date(date)?))
}

pub async fn post_calendar(
    State(state): State<AppState>,
    session: Session,
    body: Bytes,
) -> Result<Redirect, AppError> {
    let form = Form::new(parse_form(&body).ok_or(AppError::BadRequest)?);
    let first = month_start(form.get("y"), form.get("m"))?;

    // Blocks shown last time whose "keep" box came back unticked.
    for room in state.store.all_rooms().await {
        for (date, block_id) in session.block_map(room.id) {
            if form.has(&format!("remove_block_{}_{date}", room.id)) {
                continue;
            }
            if let Err(e) = state.store.delete_block_by_id(block_id).await {
                warn!("removing block {block_id}: {e}");
            }
        }
    }

    let mut added: Vec<(RoomId, NaiveDate)> = form.fields().filter_map(parse_add_block).collect();
    added.sort();
    added.dedup();
    for (room_id, night) in added {
        if let Err(e) = state.store.insert_block_for_room(room_id, night).await {
            warn!("adding block on room {room_id} for {night}: {e}");
        }
    }

    session.put_flash("Changes saved");
    Ok(Redirect::to(&format!(
        "/admin/reservations-calendar?y={}&m={}",
        first.year(),
        first.month()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn restriction(id: i64, a: &str, b: &str, reservation_id: Option<i64>) -> Restriction {
        Restriction {
            id,
            room_id: 1,
            stay: Stay::new(d(a), d(b)).unwrap(),
            kind: if reservation_id.is_some() {
                RestrictionKind::Reservation
            } else {
                RestrictionKind::OwnerBlock
            },
            reservation_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn month_maps_clamp_to_month_and_skip_checkout() {
        let restrictions = vec![
            restriction(1, "2050-01-30", "2050-02-02", Some(10)),
            restriction(2, "2050-02-10", "2050-02-11", None),
            restriction(3, "2050-02-27", "2050-03-03", Some(11)),
        ];
        let (res, blocks) = month_maps(&restrictions, d("2050-02-01"), d("2050-02-28"));
        assert_eq!(res.len(), 28);
        assert_eq!(res["2050-02-01"], 10);
        assert_eq!(res["2050-02-02"], 0); // checkout day
        assert_eq!(res["2050-02-27"], 11);
        assert_eq!(res["2050-02-28"], 11);
        assert!(!res.contains_key("2050-03-01"));
        assert_eq!(blocks["2050-02-10"], 2);
        assert_eq!(blocks["2050-02-11"], 0);
    }

    #[test]
    fn add_block_names() {
        assert_eq!(
            parse_add_block("add_block_2_2050-02-10"),
            Some((2, d("2050-02-10")))
        );
        assert_eq!(parse_add_block("remove_block_2_2050-02-10"), None);
        assert_eq!(parse_add_block("add_block_x_2050-02-10"), None);
        assert_eq!(parse_add_block("add_block_2_nope"), None);
    }

    #[test]
    fn month_start_parsing() {
        assert_eq!(month_start("2050", "2").unwrap(), d("2050-02-01"));
        assert!(matches!(month_start("2050", "13"), Err(AppError::BadRequest)));
        assert!(matches!(month_start("abc", "1"), Err(AppError::BadRequest)));
        assert_eq!(month_start("", "").unwrap().day(), 1);
    }

    #[test]
    fn redirect_targets() {
        let target = |r: Redirect| {
            r.into_response().headers()["location"]
                .to_str()
                .unwrap()
                .to_string()
        };
        assert_eq!(target(back_to("new", "", "")), "/admin/reservations-new");
        assert_eq!(target(back_to("cal", "", "")), "/admin/reservations-calendar");
        assert_eq!(
            target(back_to("cal", "2050", "02")),
            "/admin/reservations-calendar?y=2050&m=2"
        );
        assert_eq!(
            target(back_to("all", "2050\nX", "1")),
            "/admin/reservations-all"
        );
        assert!(check_source("bogus").is_err());
    }
}
