use std::collections::BTreeSet;

use actix_web::{
    http::{header, StatusCode},
    middleware::from_fn,
    web, HttpRequest, HttpResponse, Result,
};
use askama::Template;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{self, clear_session_cookie, request_token, session_cookie, session_guard, AdminSession},
    db::{self, PackageUpdate},
    filters::{self, decimal_br, parse_price_cents},
    models::{AdminSettings, AppointmentRow, AppointmentStatus, BlockedSlot, WorkingHours},
    schedule::{
        format_date, format_time, parse_date, parse_time, parse_weekday, slot_grid, weekday_label,
        weekday_name, WEEK,
    },
    state::AppState,
    stats::{self, AppointmentStats, Period},
    templates::{render, render_status},
    whatsapp,
};

#[derive(Template)]
#[template(path = "admin_login.html")]
struct LoginTemplate {
    username: String,
    error: String,
    has_error: bool,
}

#[derive(Clone, Debug)]
struct AppointmentView {
    id: String,
    client_name: String,
    client_phone: String,
    service_package: String,
    appointment_date: String,
    appointment_time: String,
    status_label: &'static str,
    is_pending: bool,
    is_confirmed: bool,
    is_cancelled: bool,
    whatsapp_link: String,
}

#[derive(Clone, Debug)]
struct StatusOption {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "admin_appointments.html")]
struct AppointmentsTemplate {
    username: String,
    appointments: Vec<AppointmentView>,
    statuses: Vec<StatusOption>,
    notice: String,
    has_notice: bool,
}

#[derive(Clone, Debug)]
struct DayOption {
    value: &'static str,
    label: &'static str,
    checked: bool,
}

#[derive(Template)]
#[template(path = "admin_settings.html")]
struct SettingsTemplate {
    username: String,
    days: Vec<DayOption>,
    work_start: String,
    work_end: String,
    blocked_dates: String,
    blocked_slots: String,
    errors: Vec<String>,
    saved: bool,
}

#[derive(Clone, Debug)]
struct PackageView {
    id: String,
    name: String,
    price: String,
    duration_minutes: i64,
    description: String,
    active: bool,
}

#[derive(Template)]
#[template(path = "admin_packages.html")]
struct PackagesTemplate {
    username: String,
    packages: Vec<PackageView>,
    errors: Vec<String>,
    saved: bool,
}

#[derive(Clone, Debug)]
struct PeriodOption {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "admin_stats.html")]
struct StatsTemplate {
    username: String,
    periods: Vec<PeriodOption>,
    start: String,
    end: String,
    stats: AppointmentStats,
    average: String,
    cancellation: String,
    most_popular: String,
    max_daily: u32,
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    username: String,
    expires_at: String,
}

#[derive(Deserialize)]
struct AppointmentFilter {
    status: Option<String>,
    aviso: Option<String>,
}

#[derive(Deserialize)]
struct StatusForm {
    status: String,
}

#[derive(Deserialize)]
struct PackageForm {
    name: String,
    price: String,
    duration_minutes: String,
    description: Option<String>,
    active: Option<String>,
}

#[derive(Deserialize)]
struct StatsQuery {
    period: Option<String>,
    start: Option<String>,
    end: Option<String>,
}

#[derive(Serialize)]
struct StatsResponse {
    start: String,
    end: String,
    #[serde(flatten)]
    stats: AppointmentStats,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // Registered ahead of the guarded scope so they stay reachable without a session.
    cfg.service(
        web::resource("/admin/login")
            .route(web::get().to(login_page))
            .route(web::post().to(login_submit)),
    )
    .service(web::resource("/admin/logout").route(web::post().to(logout)))
    .service(web::resource("/admin/api/login").route(web::post().to(api_login)))
    .service(
        web::scope("/admin")
            .wrap(from_fn(session_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/agendamentos").route(web::get().to(list_appointments)))
            .service(
                web::resource("/agendamentos/{id}/status").route(web::post().to(update_status)),
            )
            .service(
                web::resource("/agendamentos/{id}/excluir")
                    .route(web::post().to(delete_appointment)),
            )
            .service(
                web::resource("/configuracoes")
                    .route(web::get().to(settings_page))
                    .route(web::post().to(save_settings)),
            )
            .service(web::resource("/pacotes").route(web::get().to(packages_page)))
            .service(web::resource("/pacotes/{id}").route(web::post().to(update_package)))
            .service(web::resource("/estatisticas").route(web::get().to(stats_page)))
            .service(web::resource("/api/estatisticas").route(web::get().to(stats_json)))
            .service(web::resource("/api/session").route(web::get().to(session_info))),
    );
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, location))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/admin/agendamentos"))
        .finish()
}

// Session

async fn login_page() -> HttpResponse {
    render(LoginTemplate {
        username: String::new(),
        error: String::new(),
        has_error: false,
    })
}

async fn login_submit(
    state: web::Data<AppState>,
    form: web::Form<LoginForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let session = auth::login(&state, &form.username, &form.password)
        .await
        .map_err(|err| {
            log::error!("Failed to create admin session: {err}");
            actix_web::error::ErrorInternalServerError(err)
        })?;

    match session {
        Some(session) => Ok(HttpResponse::SeeOther()
            .append_header((header::LOCATION, "/admin/agendamentos"))
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .cookie(session_cookie(&state.config, &session))
            .finish()),
        None => Ok(render_status(
            StatusCode::UNAUTHORIZED,
            LoginTemplate {
                username: form.username,
                error: "Usuário ou senha inválidos.".to_string(),
                has_error: true,
            },
        )),
    }
}

async fn api_login(
    state: web::Data<AppState>,
    payload: web::Json<LoginForm>,
) -> Result<HttpResponse> {
    let payload = payload.into_inner();
    let session = auth::login(&state, &payload.username, &payload.password)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(match session {
        Some(session) => HttpResponse::Ok()
            .cookie(session_cookie(&state.config, &session))
            .json(LoginResponse {
                expires_at: db::timestamp(session.expires_at),
                token: session.token,
                username: session.username,
            }),
        None => HttpResponse::Unauthorized()
            .json(serde_json::json!({ "error": "invalid credentials" })),
    })
}

async fn logout(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if let Some(token) = request_token(&req) {
        match auth::invalidate_session(&state.db, &token).await {
            Ok(true) => log::info!("Admin session closed"),
            Ok(false) => log::info!("Logout for unknown session"),
            Err(err) => log::warn!("Failed to invalidate session: {err}"),
        }
    }

    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/admin/login"))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .cookie(clear_session_cookie(&state.config))
        .finish()
}

async fn session_info(session: web::ReqData<AdminSession>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "valid": true,
        "username": session.username,
        "expires_at": db::timestamp(session.expires_at),
    }))
}

// Appointments

fn notice_text(code: &str) -> &'static str {
    match code {
        "conflito" => "Outro agendamento já ocupa este horário. O status não foi alterado.",
        "status" => "Status atualizado.",
        "excluido" => "Agendamento excluído.",
        "invalido" => "Status inválido.",
        _ => "",
    }
}

fn to_view(state: &AppState, row: AppointmentRow) -> AppointmentView {
    let status = AppointmentStatus::parse(&row.status).unwrap_or(AppointmentStatus::Pending);
    let whatsapp_link = whatsapp::confirmation_link(&state.config.shop, &row).unwrap_or_default();
    AppointmentView {
        id: row.id,
        client_name: row.client_name,
        client_phone: row.client_phone,
        service_package: row.service_package,
        appointment_date: row.appointment_date,
        appointment_time: row.appointment_time,
        status_label: status.label(),
        is_pending: status == AppointmentStatus::Pending,
        is_confirmed: status == AppointmentStatus::Confirmed,
        is_cancelled: status == AppointmentStatus::Cancelled,
        whatsapp_link,
    }
}

async fn list_appointments(
    state: web::Data<AppState>,
    session: web::ReqData<AdminSession>,
    query: web::Query<AppointmentFilter>,
) -> Result<HttpResponse> {
    let filter = query
        .status
        .as_deref()
        .and_then(AppointmentStatus::parse);
    let rows = db::list_appointments(&state.db, filter)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let notice = notice_text(query.aviso.as_deref().unwrap_or_default());
    let statuses = AppointmentStatus::ALL
        .iter()
        .map(|status| StatusOption {
            value: status.as_str(),
            label: status.label(),
            selected: Some(*status) == filter,
        })
        .collect();

    Ok(render(AppointmentsTemplate {
        username: session.username.clone(),
        appointments: rows.into_iter().map(|row| to_view(&state, row)).collect(),
        statuses,
        has_notice: !notice.is_empty(),
        notice: notice.to_string(),
    }))
}

async fn update_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    form: web::Form<StatusForm>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let Some(status) = AppointmentStatus::parse(&form.status) else {
        return Ok(redirect("/admin/agendamentos?aviso=invalido"));
    };

    match db::update_appointment_status(&state.db, &appointment_id, status).await {
        Ok(true) => {}
        Ok(false) => return Ok(HttpResponse::NotFound().body("Agendamento não encontrado")),
        Err(err) if db::is_unique_violation(&err) => {
            log::warn!("Status change for {appointment_id} would double-book its slot");
            return Ok(redirect("/admin/agendamentos?aviso=conflito"));
        }
        Err(err) => return Err(actix_web::error::ErrorInternalServerError(err)),
    }

    if let Ok(Some(row)) = db::fetch_appointment(&state.db, &appointment_id).await {
        state.publish("appointment_updated", &row);
    }
    Ok(redirect("/admin/agendamentos?aviso=status"))
}

async fn delete_appointment(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let row = db::fetch_appointment(&state.db, &appointment_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let Some(row) = row else {
        return Ok(HttpResponse::NotFound().body("Agendamento não encontrado"));
    };

    db::delete_appointment(&state.db, &appointment_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    state.publish("appointment_deleted", &row);
    Ok(redirect("/admin/agendamentos?aviso=excluido"))
}

// Settings

fn settings_template(
    username: &str,
    settings: &AdminSettings,
    errors: Vec<String>,
    saved: bool,
) -> SettingsTemplate {
    SettingsTemplate {
        username: username.to_string(),
        days: WEEK
            .into_iter()
            .map(|day| DayOption {
                value: weekday_name(day),
                label: weekday_label(day),
                checked: settings.works_on(day),
            })
            .collect(),
        work_start: format_time(settings.hours.start),
        work_end: format_time(settings.hours.end),
        blocked_dates: settings
            .blocked_dates
            .iter()
            .map(|date| format_date(*date))
            .collect::<Vec<_>>()
            .join("\n"),
        blocked_slots: settings
            .blocked_slots
            .iter()
            .map(|slot| format!("{} {}", format_date(slot.date), format_time(slot.time)))
            .collect::<Vec<_>>()
            .join("\n"),
        errors,
        saved,
    }
}

async fn settings_page(
    state: web::Data<AppState>,
    session: web::ReqData<AdminSession>,
) -> Result<HttpResponse> {
    let settings = db::load_settings(&state.db)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let mut errors = Vec::new();
    if let Err(err) = slot_grid(&settings.hours) {
        errors.push(format!("Horário de funcionamento inválido: {err}"));
    }
    Ok(render(settings_template(&session.username, &settings, errors, false)))
}

/// Parses the settings form. Checkboxes repeat `working_days`; blocked dates
/// and slots are one per line.
fn parse_settings_form(body: &[u8]) -> Result<AdminSettings, Vec<String>> {
    let mut errors = Vec::new();
    let mut working_days = Vec::new();
    let mut work_start = String::new();
    let mut work_end = String::new();
    let mut blocked_dates_raw = String::new();
    let mut blocked_slots_raw = String::new();

    for (key, value) in url::form_urlencoded::parse(body) {
        match &*key {
            "working_days" => match parse_weekday(&value) {
                Some(day) if !working_days.contains(&day) => working_days.push(day),
                Some(_) => {}
                None => errors.push(format!("Dia da semana desconhecido: {value}")),
            },
            "work_start" => work_start = value.into_owned(),
            "work_end" => work_end = value.into_owned(),
            "blocked_dates" => blocked_dates_raw = value.into_owned(),
            "blocked_slots" => blocked_slots_raw = value.into_owned(),
            _ => {}
        }
    }
    working_days.sort_by_key(|day| day.num_days_from_monday());

    if working_days.is_empty() {
        errors.push("Selecione ao menos um dia de funcionamento.".to_string());
    }

    let start = parse_time(&work_start);
    let end = parse_time(&work_end);
    if start.is_err() {
        errors.push("Horário de abertura inválido.".to_string());
    }
    if end.is_err() {
        errors.push("Horário de fechamento inválido.".to_string());
    }
    let hours = match (start, end) {
        (Ok(start), Ok(end)) if start <= end => Some(WorkingHours { start, end }),
        (Ok(_), Ok(_)) => {
            errors.push("A abertura deve ser antes do fechamento.".to_string());
            None
        }
        _ => None,
    };

    let mut blocked_dates = BTreeSet::new();
    for line in blocked_dates_raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match parse_date(line) {
            Ok(date) => {
                blocked_dates.insert(date);
            }
            Err(_) => errors.push(format!("Data bloqueada inválida: {line}")),
        }
    }

    let mut blocked_slots = BTreeSet::new();
    for line in blocked_slots_raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let parsed = line
            .split_once(char::is_whitespace)
            .and_then(|(date, time)| Some((parse_date(date).ok()?, parse_time(time).ok()?)));
        match parsed {
            Some((date, time)) => {
                blocked_slots.insert(BlockedSlot { date, time });
            }
            None => errors.push(format!("Horário bloqueado inválido: {line}")),
        }
    }

    match hours {
        Some(hours) if errors.is_empty() => Ok(AdminSettings {
            working_days,
            hours,
            blocked_dates,
            blocked_slots,
        }),
        _ => Err(errors),
    }
}

async fn save_settings(
    state: web::Data<AppState>,
    session: web::ReqData<AdminSession>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let settings = match parse_settings_form(&body) {
        Ok(settings) => settings,
        Err(errors) => {
            let current = db::load_settings(&state.db)
                .await
                .map_err(actix_web::error::ErrorInternalServerError)?;
            return Ok(render(settings_template(&session.username, &current, errors, false)));
        }
    };

    db::save_settings(&state.db, &settings)
        .await
        .map_err(|err| {
            log::error!("Failed to save settings: {err}");
            actix_web::error::ErrorInternalServerError(err)
        })?;
    log::info!("{} updated business hours", session.username);

    Ok(render(settings_template(&session.username, &settings, Vec::new(), true)))
}

// Packages

async fn package_views(state: &AppState) -> Result<Vec<PackageView>> {
    let rows = db::all_packages(&state.db)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(rows
        .into_iter()
        .map(|row| PackageView {
            id: row.id,
            name: row.name,
            price: decimal_br(row.price_cents),
            duration_minutes: row.duration_minutes,
            description: row.description,
            active: row.active == 1,
        })
        .collect())
}

async fn packages_page(
    state: web::Data<AppState>,
    session: web::ReqData<AdminSession>,
) -> Result<HttpResponse> {
    Ok(render(PackagesTemplate {
        username: session.username.clone(),
        packages: package_views(&state).await?,
        errors: Vec::new(),
        saved: false,
    }))
}

fn parse_package_form(form: PackageForm) -> Result<PackageUpdate, Vec<String>> {
    let mut errors = Vec::new();
    if form.name.trim().is_empty() {
        errors.push("Informe o nome do pacote.".to_string());
    }
    let price_cents = parse_price_cents(&form.price);
    if price_cents.is_none() {
        errors.push("Preço inválido.".to_string());
    }
    let duration_minutes = form
        .duration_minutes
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|minutes| *minutes > 0);
    if duration_minutes.is_none() {
        errors.push("Duração deve ser um número de minutos.".to_string());
    }

    match (price_cents, duration_minutes) {
        (Some(price_cents), Some(duration_minutes)) if errors.is_empty() => Ok(PackageUpdate {
            name: form.name,
            price_cents,
            duration_minutes,
            description: form.description.unwrap_or_default(),
            active: form.active.is_some(),
        }),
        _ => Err(errors),
    }
}

async fn update_package(
    state: web::Data<AppState>,
    session: web::ReqData<AdminSession>,
    path: web::Path<String>,
    form: web::Form<PackageForm>,
) -> Result<HttpResponse> {
    let package_id = path.into_inner();
    let errors = match parse_package_form(form.into_inner()) {
        Ok(update) => match db::update_package(&state.db, &package_id, &update).await {
            Ok(true) => Vec::new(),
            Ok(false) => return Ok(HttpResponse::NotFound().body("Pacote não encontrado")),
            Err(err) if db::is_unique_violation(&err) => {
                vec![format!("Já existe um pacote chamado {}.", update.name.trim())]
            }
            Err(err) => return Err(actix_web::error::ErrorInternalServerError(err)),
        },
        Err(errors) => errors,
    };

    Ok(render(PackagesTemplate {
        username: session.username.clone(),
        packages: package_views(&state).await?,
        saved: errors.is_empty(),
        errors,
    }))
}

// Statistics

fn resolve_range(query: &StatsQuery, today: NaiveDate) -> (Period, NaiveDate, NaiveDate) {
    let period = query
        .period
        .as_deref()
        .and_then(Period::parse)
        .unwrap_or(Period::Week);
    let custom = match (query.start.as_deref(), query.end.as_deref()) {
        (Some(start), Some(end)) => parse_date(start).ok().zip(parse_date(end).ok()),
        _ => None,
    };
    let (start, end) = custom.unwrap_or_else(|| period.range_ending(today));
    if start <= end {
        (period, start, end)
    } else {
        (period, end, start)
    }
}

async fn load_stats(
    state: &AppState,
    query: &StatsQuery,
) -> Result<(Period, NaiveDate, NaiveDate, AppointmentStats)> {
    let (period, start, end) = resolve_range(query, today());
    let rows = db::appointments_between(&state.db, start, end)
        .await
        .map_err(|err| {
            log::error!("Failed to load statistics: {err}");
            actix_web::error::ErrorInternalServerError(err)
        })?;
    Ok((period, start, end, stats::aggregate(&rows)))
}

async fn stats_page(
    state: web::Data<AppState>,
    session: web::ReqData<AdminSession>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse> {
    let (period, start, end, stats) = load_stats(&state, &query).await?;
    let periods = [
        (Period::Week, "Última semana"),
        (Period::Month, "Último mês"),
        (Period::Year, "Último ano"),
    ]
    .into_iter()
    .map(|(value, label)| PeriodOption {
        value: value.as_str(),
        label,
        selected: value == period,
    })
    .collect();

    Ok(render(StatsTemplate {
        username: session.username.clone(),
        periods,
        start: format_date(start),
        end: format_date(end),
        average: format!("{:.1}", stats.average_per_day).replace('.', ","),
        cancellation: format!("{:.1}%", stats.cancellation_rate).replace('.', ","),
        most_popular: stats
            .most_popular_service
            .clone()
            .unwrap_or_else(|| "Nenhum".to_string()),
        max_daily: stats
            .daily_appointments
            .iter()
            .map(|day| day.appointments)
            .max()
            .unwrap_or(0),
        stats,
    }))
}

async fn stats_json(
    state: web::Data<AppState>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse> {
    let (_, start, end, stats) = load_stats(&state, &query).await?;
    Ok(HttpResponse::Ok().json(StatsResponse {
        start: format_date(start),
        end: format_date(end),
        stats,
    }))
}
