use actix_web::{web, HttpResponse, Result};
use askama::Template;
use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    booking::{self, BookingError, BookingRequest},
    db,
    filters,
    models::{AppointmentRow, ServicePackageRow},
    schedule::{format_date, format_time, parse_date, resolve_day, within_booking_window, SlotState},
    state::AppState,
    templates::render,
    whatsapp,
};

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    packages: Vec<ServicePackageRow>,
}

#[derive(Clone, Debug)]
struct PackageOption {
    name: String,
    price_cents: i64,
    duration_minutes: i64,
    selected: bool,
}

#[derive(Clone, Debug, Default)]
struct BookingView {
    client_name: String,
    client_phone: String,
    date: String,
    time: String,
}

#[derive(Clone, Debug)]
struct SlotView {
    time: String,
    available: bool,
    selected: bool,
}

#[derive(Clone, Debug)]
struct DayView {
    date: String,
    closed_reason: String,
    is_closed: bool,
    slots: Vec<SlotView>,
}

#[derive(Template)]
#[template(path = "agendar.html")]
struct ScheduleTemplate {
    packages: Vec<PackageOption>,
    form: BookingView,
    errors: Vec<String>,
    day: Option<DayView>,
    min_date: String,
    max_date: String,
}

#[derive(Template)]
#[template(path = "agendar_sucesso.html")]
struct ScheduleSuccessTemplate {
    appointment: AppointmentRow,
    whatsapp_link: String,
    has_link: bool,
}

#[derive(Deserialize)]
struct ScheduleQuery {
    date: Option<String>,
}

#[derive(Deserialize)]
struct BookingForm {
    client_name: String,
    client_phone: String,
    service_package: Option<String>,
    date: String,
    time: Option<String>,
}

#[derive(Deserialize)]
struct SlotsQuery {
    date: String,
    tag: Option<String>,
}

#[derive(Serialize)]
struct SlotJson {
    time: String,
    available: bool,
}

#[derive(Serialize)]
struct SlotsResponse {
    tag: Option<String>,
    date: String,
    bookable: bool,
    reason: Option<String>,
    slots: Vec<SlotJson>,
}

/// What the form can offer for one date.
struct DayLookup {
    closed_reason: Option<String>,
    slots: Vec<SlotState>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(
            web::resource("/agendar")
                .route(web::get().to(show_schedule))
                .route(web::post().to(create_booking)),
        )
        .service(web::resource("/agendar/horarios").route(web::get().to(slots_json)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

async fn home(state: web::Data<AppState>) -> Result<HttpResponse> {
    let packages = db::active_packages(&state.db).await.unwrap_or_else(|err| {
        log::error!("Failed to load packages: {err}");
        Vec::new()
    });
    Ok(render(HomeTemplate { packages }))
}

async fn lookup_day(state: &AppState, date: NaiveDate) -> Result<DayLookup, sqlx::Error> {
    let window = state.config.booking_window_days;
    if !within_booking_window(date, today(), window) {
        return Ok(DayLookup {
            closed_reason: Some(format!(
                "Escolha uma data entre hoje e os próximos {window} dias."
            )),
            slots: Vec::new(),
        });
    }

    let settings = db::load_settings(&state.db).await?;
    let appointments = db::appointments_on(&state.db, date).await?;
    Ok(match resolve_day(date, &settings, &appointments) {
        Ok(day) if day.is_bookable() => {
            log::debug!("{date}: {} free slots", day.available_times().len());
            DayLookup {
                closed_reason: None,
                slots: day.slots,
            }
        }
        Ok(day) => DayLookup {
            closed_reason: day.closure.map(|closure| closure.message().to_string()),
            slots: Vec::new(),
        },
        Err(err) => {
            log::error!("Cannot resolve availability for {date}: {err}");
            DayLookup {
                closed_reason: Some("Horários indisponíveis no momento.".to_string()),
                slots: Vec::new(),
            }
        }
    })
}

fn day_view(date: NaiveDate, lookup: DayLookup, selected_time: &str) -> DayView {
    let closed_reason = lookup.closed_reason.unwrap_or_default();
    DayView {
        date: format_date(date),
        is_closed: !closed_reason.is_empty(),
        closed_reason,
        slots: lookup
            .slots
            .into_iter()
            .map(|slot| {
                let time = format_time(slot.time);
                SlotView {
                    selected: slot.available && time == selected_time,
                    time,
                    available: slot.available,
                }
            })
            .collect(),
    }
}

async fn package_options(state: &AppState, selected: &str) -> Vec<PackageOption> {
    db::active_packages(&state.db)
        .await
        .unwrap_or_else(|err| {
            log::error!("Failed to load packages: {err}");
            Vec::new()
        })
        .into_iter()
        .map(|package| PackageOption {
            selected: package.name == selected,
            name: package.name,
            price_cents: package.price_cents,
            duration_minutes: package.duration_minutes,
        })
        .collect()
}

fn schedule_page(
    state: &AppState,
    packages: Vec<PackageOption>,
    form: BookingView,
    errors: Vec<String>,
    day: Option<DayView>,
) -> ScheduleTemplate {
    let today = today();
    ScheduleTemplate {
        packages,
        form,
        errors,
        day,
        min_date: format_date(today),
        max_date: format_date(today + Duration::days(state.config.booking_window_days)),
    }
}

async fn show_schedule(
    state: web::Data<AppState>,
    query: web::Query<ScheduleQuery>,
) -> Result<HttpResponse> {
    let date = query
        .date
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .and_then(|raw| parse_date(raw).ok());

    let day = match date {
        Some(date) => {
            let lookup = lookup_day(&state, date)
                .await
                .map_err(actix_web::error::ErrorInternalServerError)?;
            Some(day_view(date, lookup, ""))
        }
        None => None,
    };

    let form = BookingView {
        date: date.map(format_date).unwrap_or_default(),
        ..BookingView::default()
    };
    let packages = package_options(&state, "").await;
    Ok(render(schedule_page(&state, packages, form, Vec::new(), day)))
}

async fn create_booking(
    state: web::Data<AppState>,
    form: web::Form<BookingForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let request = BookingRequest {
        client_name: form.client_name,
        client_phone: form.client_phone,
        service_package: form.service_package.unwrap_or_default(),
        date: form.date,
        time: form.time.unwrap_or_default(),
    };

    let err = match booking::submit(
        &state.db,
        &request,
        today(),
        state.config.booking_window_days,
    )
    .await
    {
        Ok(row) => {
            state.publish("appointment_created", &row);
            let whatsapp_link = match whatsapp::confirmation_link(&state.config.shop, &row) {
                Ok(link) => link,
                Err(err) => {
                    log::warn!("Could not build WhatsApp link for {}: {err}", row.id);
                    String::new()
                }
            };
            return Ok(render(ScheduleSuccessTemplate {
                has_link: !whatsapp_link.is_empty(),
                whatsapp_link,
                appointment: row,
            }));
        }
        Err(err) => err,
    };

    match &err {
        BookingError::Database(db_err) => log::error!("Booking failed: {db_err}"),
        other => log::info!("Booking rejected: {other}"),
    }

    // A conflict clears the chosen time so the refreshed grid drives the next pick.
    let selected_time = if err.conflict_date().is_some() {
        String::new()
    } else {
        request.time.clone()
    };

    let date = err
        .conflict_date()
        .or_else(|| parse_date(&request.date).ok());
    let day = match date {
        Some(date) => match lookup_day(&state, date).await {
            Ok(lookup) => Some(day_view(date, lookup, &selected_time)),
            Err(lookup_err) => {
                log::error!("Failed to refresh availability: {lookup_err}");
                None
            }
        },
        None => None,
    };

    let packages = package_options(&state, request.service_package.trim()).await;
    let view = BookingView {
        client_name: request.client_name,
        client_phone: request.client_phone,
        date: request.date,
        time: selected_time,
    };
    Ok(render(schedule_page(
        &state,
        packages,
        view,
        err.user_messages(),
        day,
    )))
}

async fn slots_json(
    state: web::Data<AppState>,
    query: web::Query<SlotsQuery>,
) -> Result<HttpResponse> {
    let query = query.into_inner();
    let date = match parse_date(&query.date) {
        Ok(date) => date,
        Err(err) => {
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "tag": query.tag,
                "error": err.to_string(),
            })));
        }
    };

    let lookup = lookup_day(&state, date)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(SlotsResponse {
        tag: query.tag,
        date: format_date(date),
        bookable: lookup.closed_reason.is_none(),
        reason: lookup.closed_reason,
        slots: lookup
            .slots
            .into_iter()
            .map(|slot| SlotJson {
                time: format_time(slot.time),
                available: slot.available,
            })
            .collect(),
    }))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, App};

    use super::*;

    async fn app_state() -> AppState {
        AppState::for_tests().await
    }

    /// Next date at least two days out that falls on a working weekday.
    fn next_workday() -> NaiveDate {
        use chrono::{Datelike, Weekday};
        let mut date = today() + Duration::days(2);
        while date.weekday() == Weekday::Sun {
            date += Duration::days(1);
        }
        date
    }

    #[actix_web::test]
    async fn slots_endpoint_echoes_tag_and_marks_taken() {
        let state = app_state().await;
        let date = next_workday();
        db::insert_appointment(
            &state.db,
            &db::NewAppointment {
                client_name: "Ana".to_string(),
                client_phone: "11912345678".to_string(),
                service_package: "Corte".to_string(),
                date,
                time: crate::schedule::parse_time("09:00").unwrap(),
            },
        )
        .await
        .unwrap();

        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;
        let req = actix_web::test::TestRequest::get()
            .uri(&format!("/agendar/horarios?date={}&tag=7", format_date(date)))
            .to_request();
        let body: serde_json::Value = actix_web::test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["tag"], "7");
        assert_eq!(body["bookable"], true);
        let slots = body["slots"].as_array().unwrap();
        assert_eq!(slots.len(), 21);
        let nine = slots.iter().find(|slot| slot["time"] == "09:00").unwrap();
        assert_eq!(nine["available"], false);
        let eight = slots.iter().find(|slot| slot["time"] == "08:00").unwrap();
        assert_eq!(eight["available"], true);
    }

    #[actix_web::test]
    async fn slots_endpoint_rejects_bad_date() {
        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(app_state().await))
                .configure(configure),
        )
        .await;
        let req = actix_web::test::TestRequest::get()
            .uri("/agendar/horarios?date=amanha&tag=1")
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn booking_form_creates_one_row_per_slot() {
        let state = app_state().await;
        let pool = state.db.clone();
        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;
        let date = format_date(next_workday());
        let form = [
            ("client_name", "Ana Souza"),
            ("client_phone", "(11) 91234-5678"),
            ("service_package", "Corte"),
            ("date", date.as_str()),
            ("time", "10:00"),
        ];

        let req = actix_web::test::TestRequest::post().uri("/agendar").set_form(form).to_request();
        let body = actix_web::test::call_and_read_body(&app, req).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("wa.me/5511912345678"), "{body}");

        let req = actix_web::test::TestRequest::post().uri("/agendar").set_form(form).to_request();
        let body = actix_web::test::call_and_read_body(&app, req).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("já foi reservado"), "{body}");

        let rows = db::appointments_on(&pool, parse_date(&date).unwrap()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].client_phone, "11912345678");
    }

    #[actix_web::test]
    async fn schedule_page_renders_chosen_day() {
        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(app_state().await))
                .configure(configure),
        )
        .await;
        let date = format_date(next_workday());
        let req = actix_web::test::TestRequest::get()
            .uri(&format!("/agendar?date={date}"))
            .to_request();
        let body = actix_web::test::call_and_read_body(&app, req).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(&format!("data-date=\"{date}\"")), "{body}");
        assert!(body.contains("value=\"08:00\""));
    }

    #[actix_web::test]
    async fn home_lists_active_packages() {
        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(app_state().await))
                .configure(configure),
        )
        .await;
        let req = actix_web::test::TestRequest::get().uri("/").to_request();
        let body = actix_web::test::call_and_read_body(&app, req).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("Corte + Barba"));
        assert!(body.contains("R$ 55,00"));
    }
}
