use chrono::{NaiveDate, NaiveTime};
use sqlx::SqlitePool;

use crate::{
    db::{self, NewAppointment},
    models::AppointmentRow,
    schedule::{
        day_closure, format_time, is_date_bookable, normalize_phone, parse_date, parse_time,
        slot_grid, within_booking_window, DayClosure,
    },
};

const MIN_PHONE_DIGITS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct BookingRequest {
    pub client_name: String,
    pub client_phone: String,
    pub service_package: String,
    pub date: String,
    pub time: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("invalid booking: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{date} is not open for booking")]
    DateUnavailable {
        date: NaiveDate,
        closure: Option<DayClosure>,
    },
    #[error("{date} {time} is blocked")]
    SlotBlocked { date: NaiveDate, time: NaiveTime },
    #[error("{date} {time} is already taken")]
    SlotTaken { date: NaiveDate, time: NaiveTime },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BookingError {
    /// The date whose occupied slots the caller should refresh.
    pub fn conflict_date(&self) -> Option<NaiveDate> {
        match self {
            BookingError::SlotBlocked { date, .. } | BookingError::SlotTaken { date, .. } => {
                Some(*date)
            }
            _ => None,
        }
    }

    pub fn user_messages(&self) -> Vec<String> {
        match self {
            BookingError::Validation(messages) => messages.clone(),
            BookingError::DateUnavailable { closure, .. } => vec![closure
                .map(|closure| closure.message())
                .unwrap_or("Esta data está fora do período de agendamento.")
                .to_string()],
            BookingError::SlotBlocked { .. } => {
                vec!["Este horário está bloqueado pelo administrador. Escolha outro horário.".to_string()]
            }
            BookingError::SlotTaken { .. } => {
                vec!["Este horário já foi reservado. Por favor, escolha outro horário.".to_string()]
            }
            BookingError::Database(_) => {
                vec!["Erro ao realizar agendamento. Tente novamente.".to_string()]
            }
        }
    }
}

/// A request that passed field validation.
#[derive(Debug, Clone)]
struct ValidBooking {
    client_name: String,
    client_phone: String,
    service_package: String,
    date: NaiveDate,
    time: NaiveTime,
}

fn validate_fields(request: &BookingRequest) -> Result<ValidBooking, BookingError> {
    let mut errors = Vec::new();

    let client_name = request.client_name.trim().to_string();
    if client_name.is_empty() {
        errors.push("Informe seu nome.".to_string());
    }

    let client_phone = normalize_phone(&request.client_phone);
    if request.client_phone.trim().is_empty() {
        errors.push("Informe seu telefone.".to_string());
    } else if client_phone.len() < MIN_PHONE_DIGITS {
        errors.push("Telefone deve ter DDD e número.".to_string());
    }

    let service_package = request.service_package.trim().to_string();
    if service_package.is_empty() {
        errors.push("Escolha um pacote.".to_string());
    }

    let date = if request.date.trim().is_empty() {
        errors.push("Escolha uma data.".to_string());
        None
    } else {
        match parse_date(&request.date) {
            Ok(date) => Some(date),
            Err(_) => {
                errors.push("Data inválida.".to_string());
                None
            }
        }
    };

    let time = if request.time.trim().is_empty() {
        errors.push("Escolha um horário.".to_string());
        None
    } else {
        match parse_time(&request.time) {
            Ok(time) => Some(time),
            Err(_) => {
                errors.push("Horário inválido.".to_string());
                None
            }
        }
    };

    match (date, time) {
        (Some(date), Some(time)) if errors.is_empty() => Ok(ValidBooking {
            client_name,
            client_phone,
            service_package,
            date,
            time,
        }),
        _ => Err(BookingError::Validation(errors)),
    }
}

/// Validates, re-checks the slot, and stores a pending appointment.
///
/// The re-check runs to completion before the insert. A unique violation on
/// insert means another submission won the slot in between and is reported
/// as [`BookingError::SlotTaken`].
pub async fn submit(
    pool: &SqlitePool,
    request: &BookingRequest,
    today: NaiveDate,
    window_days: i64,
) -> Result<AppointmentRow, BookingError> {
    let booking = validate_fields(request)?;

    if db::find_active_package(pool, &booking.service_package)
        .await?
        .is_none()
    {
        return Err(BookingError::Validation(vec![
            "Pacote indisponível.".to_string(),
        ]));
    }

    let settings = db::load_settings(pool).await?;

    if !is_date_bookable(booking.date, &settings)
        || !within_booking_window(booking.date, today, window_days)
    {
        return Err(BookingError::DateUnavailable {
            date: booking.date,
            closure: day_closure(booking.date, &settings),
        });
    }

    let grid = slot_grid(&settings.hours).map_err(|err| {
        log::error!("Cannot build slot grid: {err}");
        BookingError::DateUnavailable {
            date: booking.date,
            closure: None,
        }
    })?;
    if !grid.contains(&booking.time) {
        return Err(BookingError::Validation(vec![
            "Horário fora do expediente.".to_string(),
        ]));
    }

    if settings
        .blocked_times_on(booking.date)
        .any(|time| time == booking.time)
    {
        return Err(BookingError::SlotBlocked {
            date: booking.date,
            time: booking.time,
        });
    }

    if db::live_appointment_at(pool, booking.date, booking.time)
        .await?
        .is_some()
    {
        return Err(BookingError::SlotTaken {
            date: booking.date,
            time: booking.time,
        });
    }

    let new = NewAppointment {
        client_name: booking.client_name,
        client_phone: booking.client_phone,
        service_package: booking.service_package,
        date: booking.date,
        time: booking.time,
    };

    match db::insert_appointment(pool, &new).await {
        Ok(row) => {
            log::info!(
                "Booked {} {} for {}",
                row.appointment_date,
                row.appointment_time,
                row.client_name
            );
            Ok(row)
        }
        Err(err) if db::is_unique_violation(&err) => {
            log::warn!(
                "Slot {} {} taken by a concurrent booking",
                new.date,
                format_time(new.time)
            );
            Err(BookingError::SlotTaken {
                date: new.date,
                time: new.time,
            })
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{appointments_on, load_settings, save_settings, test_pool},
        models::{AppointmentStatus, BlockedSlot, STATUS_PENDING},
    };

    const TODAY: &str = "2024-06-03";

    fn d(raw: &str) -> NaiveDate {
        parse_date(raw).unwrap()
    }

    fn request(date: &str, time: &str) -> BookingRequest {
        BookingRequest {
            client_name: "  Ana Souza ".to_string(),
            client_phone: "(11) 91234-5678".to_string(),
            service_package: "Corte".to_string(),
            date: date.to_string(),
            time: time.to_string(),
        }
    }

    async fn book(pool: &SqlitePool, date: &str, time: &str) -> Result<AppointmentRow, BookingError> {
        submit(pool, &request(date, time), d(TODAY), 30).await
    }

    #[actix_web::test]
    async fn accepted_booking_is_normalized_and_pending() {
        let pool = test_pool().await;
        let row = book(&pool, "2024-06-10", "10:00:00").await.unwrap();
        assert_eq!(row.client_name, "Ana Souza");
        assert_eq!(row.client_phone, "11912345678");
        assert_eq!(row.appointment_time, "10:00");
        assert_eq!(row.appointment_date, "2024-06-10");
        assert_eq!(row.status, STATUS_PENDING);
    }

    #[actix_web::test]
    async fn second_booking_for_same_slot_is_rejected() {
        let pool = test_pool().await;
        book(&pool, "2024-06-10", "10:00").await.unwrap();

        let err = book(&pool, "2024-06-10", "10:00").await.unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken { .. }));
        assert_eq!(err.conflict_date(), Some(d("2024-06-10")));
        assert_eq!(appointments_on(&pool, d("2024-06-10")).await.unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn cancelled_booking_frees_the_slot() {
        let pool = test_pool().await;
        let first = book(&pool, "2024-06-10", "10:00").await.unwrap();
        db::update_appointment_status(&pool, &first.id, AppointmentStatus::Cancelled)
            .await
            .unwrap();
        book(&pool, "2024-06-10", "10:00").await.unwrap();
    }

    #[actix_web::test]
    async fn blocked_slot_is_rejected() {
        let pool = test_pool().await;
        let mut settings = load_settings(&pool).await.unwrap();
        settings.blocked_slots.insert(BlockedSlot {
            date: d("2024-06-10"),
            time: parse_time("15:00").unwrap(),
        });
        save_settings(&pool, &settings).await.unwrap();

        let err = book(&pool, "2024-06-10", "15:00").await.unwrap_err();
        assert!(matches!(err, BookingError::SlotBlocked { .. }));
        assert!(appointments_on(&pool, d("2024-06-10")).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn closed_and_out_of_window_dates_are_rejected() {
        let pool = test_pool().await;
        let mut settings = load_settings(&pool).await.unwrap();
        settings.blocked_dates.insert(d("2024-06-11"));
        save_settings(&pool, &settings).await.unwrap();

        for date in ["2024-06-09", "2024-06-11", "2024-06-01", "2024-07-20"] {
            let err = book(&pool, date, "10:00").await.unwrap_err();
            assert!(
                matches!(err, BookingError::DateUnavailable { .. }),
                "{date}: {err}"
            );
        }
    }

    #[actix_web::test]
    async fn off_grid_time_is_rejected() {
        let pool = test_pool().await;
        for time in ["10:15", "07:30", "18:30"] {
            let err = book(&pool, "2024-06-10", time).await.unwrap_err();
            assert!(matches!(err, BookingError::Validation(_)), "{time}");
        }
    }

    #[actix_web::test]
    async fn missing_fields_are_all_reported() {
        let pool = test_pool().await;
        let err = submit(&pool, &BookingRequest::default(), d(TODAY), 30)
            .await
            .unwrap_err();
        match err {
            BookingError::Validation(messages) => assert_eq!(messages.len(), 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[actix_web::test]
    async fn unknown_package_is_rejected() {
        let pool = test_pool().await;
        let mut req = request("2024-06-10", "10:00");
        req.service_package = "Platinado".to_string();
        let err = submit(&pool, &req, d(TODAY), 30).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[actix_web::test]
    async fn rival_row_blocks_submission() {
        let pool = test_pool().await;
        let rival = NewAppointment {
            client_name: "Rival".to_string(),
            client_phone: "11900000000".to_string(),
            service_package: "Barba".to_string(),
            date: d("2024-06-10"),
            time: parse_time("11:00").unwrap(),
        };
        db::insert_appointment(&pool, &rival).await.unwrap();
        let err = db::insert_appointment(&pool, &rival).await.unwrap_err();
        assert!(db::is_unique_violation(&err));

        let err = book(&pool, "2024-06-10", "11:00").await.unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken { .. }));
    }

    #[actix_web::test]
    async fn simultaneous_submissions_store_one_row() {
        let pool = test_pool().await;
        let (first, second) = tokio::join!(
            book(&pool, "2024-06-10", "10:00"),
            book(&pool, "2024-06-10", "10:00")
        );

        let results = [first, second];
        let accepted = results.iter().filter(|result| result.is_ok()).count();
        let taken = results
            .iter()
            .filter(|result| matches!(result, Err(BookingError::SlotTaken { .. })))
            .count();
        assert_eq!((accepted, taken), (1, 1), "{results:?}");
        assert_eq!(appointments_on(&pool, d("2024-06-10")).await.unwrap().len(), 1);
    }
}
