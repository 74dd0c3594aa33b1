use std::{fs, path::Path};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    models::{
        AdminSettings, AppointmentRow, AppointmentStatus, BlockedSlot, ServicePackageRow,
        SettingsRow, WorkingHours, STATUS_CANCELLED,
    },
    schedule::{format_date, format_time, parse_date, parse_time, parse_weekday, weekday_name, WEEK},
};

const APPOINTMENT_COLUMNS: &str = "id, client_name, client_phone, service_package, appointment_date, appointment_time, status, created_at";
const PACKAGE_COLUMNS: &str = "id, name, price_cents, duration_minutes, description, active";

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else {
        db_url.strip_prefix("sqlite:")
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// RFC 3339 in UTC with second precision, so stored timestamps sort as text.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

pub async fn seed_defaults(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    seed_settings(pool).await?;
    seed_packages(pool).await?;
    Ok(())
}

async fn seed_settings(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let working_days = serde_json::to_string(&[
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
    ])
    .map_err(|err| sqlx::Error::Protocol(err.to_string()))?;

    sqlx::query(
        r#"INSERT INTO admin_settings (id, working_days, work_start, work_end, updated_at)
           VALUES (1, ?, '08:00', '18:00', ?)
           ON CONFLICT(id) DO NOTHING"#,
    )
    .bind(working_days)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

async fn seed_packages(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM service_packages")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let packages = [
        ("Corte", 3500, 30, "Corte na tesoura ou máquina, com acabamento."),
        ("Barba", 2500, 30, "Barba desenhada com toalha quente."),
        ("Corte + Barba", 5500, 60, "O combo completo para sair renovado."),
        ("Sobrancelha", 1500, 15, "Limpeza e alinhamento da sobrancelha."),
    ];

    for (name, price_cents, duration, description) in packages {
        sqlx::query(
            r#"INSERT INTO service_packages (id, name, price_cents, duration_minutes, description, active)
               VALUES (?, ?, ?, ?, ?, 1)"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(price_cents)
        .bind(duration)
        .bind(description)
        .execute(pool)
        .await?;
    }
    Ok(())
}

// Settings

pub async fn load_settings(pool: &SqlitePool) -> Result<AdminSettings, sqlx::Error> {
    let row = sqlx::query_as::<_, SettingsRow>(
        "SELECT working_days, work_start, work_end FROM admin_settings WHERE id = 1",
    )
    .fetch_one(pool)
    .await?;

    let names: Vec<String> = serde_json::from_str(&row.working_days)
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
    let mut working_days = Vec::new();
    for name in &names {
        match parse_weekday(name) {
            Some(day) => working_days.push(day),
            None => log::warn!("Ignoring unknown working day {name:?}"),
        }
    }
    working_days.sort_by_key(|day| day.num_days_from_monday());
    working_days.dedup();

    let hours = WorkingHours {
        start: parse_time(&row.work_start).map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
        end: parse_time(&row.work_end).map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
    };

    let blocked_dates = sqlx::query_scalar::<_, String>("SELECT blocked_date FROM blocked_dates")
        .fetch_all(pool)
        .await?
        .into_iter()
        .filter_map(|raw| match parse_date(&raw) {
            Ok(date) => Some(date),
            Err(err) => {
                log::warn!("Ignoring blocked date: {err}");
                None
            }
        })
        .collect();

    let blocked_slots = sqlx::query_as::<_, (String, String)>(
        "SELECT blocked_date, blocked_time FROM blocked_time_slots",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .filter_map(|(date, time)| match (parse_date(&date), parse_time(&time)) {
        (Ok(date), Ok(time)) => Some(BlockedSlot { date, time }),
        _ => {
            log::warn!("Ignoring blocked slot {date} {time}");
            None
        }
    })
    .collect();

    Ok(AdminSettings {
        working_days,
        hours,
        blocked_dates,
        blocked_slots,
    })
}

pub async fn save_settings(pool: &SqlitePool, settings: &AdminSettings) -> Result<(), sqlx::Error> {
    let names: Vec<&str> = WEEK
        .into_iter()
        .filter(|day| settings.works_on(*day))
        .map(weekday_name)
        .collect();
    let working_days =
        serde_json::to_string(&names).map_err(|err| sqlx::Error::Protocol(err.to_string()))?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"UPDATE admin_settings
           SET working_days = ?, work_start = ?, work_end = ?, updated_at = ?
           WHERE id = 1"#,
    )
    .bind(working_days)
    .bind(format_time(settings.hours.start))
    .bind(format_time(settings.hours.end))
    .bind(timestamp(Utc::now()))
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM blocked_dates").execute(&mut *tx).await?;
    for date in &settings.blocked_dates {
        sqlx::query("INSERT INTO blocked_dates (blocked_date) VALUES (?)")
            .bind(format_date(*date))
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM blocked_time_slots").execute(&mut *tx).await?;
    for slot in &settings.blocked_slots {
        sqlx::query("INSERT INTO blocked_time_slots (blocked_date, blocked_time) VALUES (?, ?)")
            .bind(format_date(slot.date))
            .bind(format_time(slot.time))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

// Appointments

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub client_name: String,
    pub client_phone: String,
    pub service_package: String,
    pub date: NaiveDate,
    pub time: chrono::NaiveTime,
}

pub async fn appointments_on(
    pool: &SqlitePool,
    date: NaiveDate,
) -> Result<Vec<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE appointment_date = ? ORDER BY appointment_time"
    ))
    .bind(format_date(date))
    .fetch_all(pool)
    .await
}

pub async fn live_appointment_at(
    pool: &SqlitePool,
    date: NaiveDate,
    time: chrono::NaiveTime,
) -> Result<Option<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"SELECT {APPOINTMENT_COLUMNS} FROM appointments
           WHERE appointment_date = ? AND appointment_time = ? AND status <> ?
           LIMIT 1"#
    ))
    .bind(format_date(date))
    .bind(format_time(time))
    .bind(STATUS_CANCELLED)
    .fetch_optional(pool)
    .await
}

/// Inserts a pending appointment. A live row already holding the slot makes
/// this fail with a unique violation.
pub async fn insert_appointment(
    pool: &SqlitePool,
    appointment: &NewAppointment,
) -> Result<AppointmentRow, sqlx::Error> {
    let row = AppointmentRow {
        id: new_id(),
        client_name: appointment.client_name.clone(),
        client_phone: appointment.client_phone.clone(),
        service_package: appointment.service_package.clone(),
        appointment_date: format_date(appointment.date),
        appointment_time: format_time(appointment.time),
        status: AppointmentStatus::Pending.as_str().to_string(),
        created_at: timestamp(Utc::now()),
    };

    sqlx::query(&format!(
        "INSERT INTO appointments ({APPOINTMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&row.id)
    .bind(&row.client_name)
    .bind(&row.client_phone)
    .bind(&row.service_package)
    .bind(&row.appointment_date)
    .bind(&row.appointment_time)
    .bind(&row.status)
    .bind(&row.created_at)
    .execute(pool)
    .await?;

    Ok(row)
}

pub async fn list_appointments(
    pool: &SqlitePool,
    status: Option<AppointmentStatus>,
) -> Result<Vec<AppointmentRow>, sqlx::Error> {
    match status {
        Some(status) => {
            sqlx::query_as::<_, AppointmentRow>(&format!(
                r#"SELECT {APPOINTMENT_COLUMNS} FROM appointments
                   WHERE status = ?
                   ORDER BY appointment_date, appointment_time"#
            ))
            .bind(status.as_str())
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, AppointmentRow>(&format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments ORDER BY appointment_date, appointment_time"
            ))
            .fetch_all(pool)
            .await
        }
    }
}

pub async fn appointments_between(
    pool: &SqlitePool,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"SELECT {APPOINTMENT_COLUMNS} FROM appointments
           WHERE appointment_date >= ? AND appointment_date <= ?
           ORDER BY appointment_date, appointment_time, created_at"#
    ))
    .bind(format_date(start))
    .bind(format_date(end))
    .fetch_all(pool)
    .await
}

pub async fn fetch_appointment(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<AppointmentRow>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentRow>(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ? LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Returns `false` when no appointment has this id.
pub async fn update_appointment_status(
    pool: &SqlitePool,
    id: &str,
    status: AppointmentStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE appointments SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_appointment(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM appointments WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// Service packages

pub async fn active_packages(pool: &SqlitePool) -> Result<Vec<ServicePackageRow>, sqlx::Error> {
    sqlx::query_as::<_, ServicePackageRow>(&format!(
        "SELECT {PACKAGE_COLUMNS} FROM service_packages WHERE active = 1 ORDER BY price_cents, name"
    ))
    .fetch_all(pool)
    .await
}

pub async fn all_packages(pool: &SqlitePool) -> Result<Vec<ServicePackageRow>, sqlx::Error> {
    sqlx::query_as::<_, ServicePackageRow>(&format!(
        "SELECT {PACKAGE_COLUMNS} FROM service_packages ORDER BY price_cents, name"
    ))
    .fetch_all(pool)
    .await
}

pub async fn find_active_package(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<ServicePackageRow>, sqlx::Error> {
    sqlx::query_as::<_, ServicePackageRow>(&format!(
        "SELECT {PACKAGE_COLUMNS} FROM service_packages WHERE name = ? AND active = 1 LIMIT 1"
    ))
    .bind(name.trim())
    .fetch_optional(pool)
    .await
}

#[derive(Debug, Clone)]
pub struct PackageUpdate {
    pub name: String,
    pub price_cents: i64,
    pub duration_minutes: i64,
    pub description: String,
    pub active: bool,
}

pub async fn update_package(
    pool: &SqlitePool,
    id: &str,
    update: &PackageUpdate,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE service_packages
           SET name = ?, price_cents = ?, duration_minutes = ?, description = ?, active = ?
           WHERE id = ?"#,
    )
    .bind(update.name.trim())
    .bind(update.price_cents)
    .bind(update.duration_minutes)
    .bind(update.description.trim())
    .bind(i64::from(update.active))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    seed_defaults(&pool).await.expect("seed");
    pool
}
