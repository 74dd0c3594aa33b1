use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::Serialize;

use crate::models::{AdminSettings, AppointmentRow, WorkingHours};

pub const SLOT_MINUTES: u32 = 30;

/// The shop never opens on this day, whatever the working-days setting says.
pub const ALWAYS_CLOSED: Weekday = Weekday::Sun;

pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("working hours start {start} is after end {end}")]
    InvertedHours { start: String, end: String },
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayClosure {
    AlwaysClosed,
    NotWorkingDay,
    BlockedDate,
}

impl DayClosure {
    pub fn message(&self) -> &'static str {
        match self {
            DayClosure::AlwaysClosed => "A barbearia não abre aos domingos.",
            DayClosure::NotWorkingDay => "A barbearia não funciona neste dia da semana.",
            DayClosure::BlockedDate => "Esta data está bloqueada para agendamentos.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotState {
    pub time: NaiveTime,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub closure: Option<DayClosure>,
    pub slots: Vec<SlotState>,
}

impl DayAvailability {
    pub fn is_bookable(&self) -> bool {
        self.closure.is_none()
    }

    pub fn available_times(&self) -> Vec<NaiveTime> {
        self.slots
            .iter()
            .filter(|slot| slot.available)
            .map(|slot| slot.time)
            .collect()
    }

    pub fn occupied_times(&self) -> Vec<NaiveTime> {
        self.slots
            .iter()
            .filter(|slot| !slot.available)
            .map(|slot| slot.time)
            .collect()
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Segunda-feira",
        Weekday::Tue => "Terça-feira",
        Weekday::Wed => "Quarta-feira",
        Weekday::Thu => "Quinta-feira",
        Weekday::Fri => "Sexta-feira",
        Weekday::Sat => "Sábado",
        Weekday::Sun => "Domingo",
    }
}

pub fn parse_weekday(name: &str) -> Option<Weekday> {
    let name = name.trim().to_ascii_lowercase();
    WEEK.into_iter().find(|day| weekday_name(*day) == name)
}

/// Parses `HH:MM` or `HH:MM:SS`; seconds are dropped.
pub fn parse_time(raw: &str) -> Result<NaiveTime, ScheduleError> {
    let trimmed = raw.trim();
    let parsed = NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| ScheduleError::InvalidTime(raw.to_string()))?;
    parsed
        .with_second(0)
        .and_then(|time| time.with_nanosecond(0))
        .ok_or_else(|| ScheduleError::InvalidTime(raw.to_string()))
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::InvalidDate(raw.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Every slot from `start` to `end` inclusive, `SLOT_MINUTES` apart.
pub fn slot_grid(hours: &WorkingHours) -> Result<Vec<NaiveTime>, ScheduleError> {
    if hours.start > hours.end {
        return Err(ScheduleError::InvertedHours {
            start: format_time(hours.start),
            end: format_time(hours.end),
        });
    }

    let start = minute_of_day(hours.start);
    let end = minute_of_day(hours.end);
    Ok((start..=end)
        .step_by(SLOT_MINUTES as usize)
        .filter_map(|minute| NaiveTime::from_hms_opt(minute / 60, minute % 60, 0))
        .collect())
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// Times held on `date` by live appointments or admin blocks.
pub fn occupied_times(
    date: NaiveDate,
    appointments: &[AppointmentRow],
    settings: &AdminSettings,
) -> BTreeSet<NaiveTime> {
    let mut occupied: BTreeSet<NaiveTime> = settings.blocked_times_on(date).collect();

    for appointment in appointments {
        if appointment.is_cancelled() {
            continue;
        }
        if parse_date(&appointment.appointment_date).ok() != Some(date) {
            continue;
        }
        match parse_time(&appointment.appointment_time) {
            Ok(time) => {
                occupied.insert(time);
            }
            Err(err) => log::warn!("Skipping appointment {}: {err}", appointment.id),
        }
    }

    occupied
}

pub fn day_closure(date: NaiveDate, settings: &AdminSettings) -> Option<DayClosure> {
    let weekday = date.weekday();
    if weekday == ALWAYS_CLOSED {
        Some(DayClosure::AlwaysClosed)
    } else if !settings.works_on(weekday) {
        Some(DayClosure::NotWorkingDay)
    } else if settings.blocked_dates.contains(&date) {
        Some(DayClosure::BlockedDate)
    } else {
        None
    }
}

pub fn is_date_bookable(date: NaiveDate, settings: &AdminSettings) -> bool {
    day_closure(date, settings).is_none()
}

/// Dates from `today` through `today + window_days` may be booked.
pub fn within_booking_window(date: NaiveDate, today: NaiveDate, window_days: i64) -> bool {
    date >= today && date <= today + Duration::days(window_days)
}

pub fn resolve_day(
    date: NaiveDate,
    settings: &AdminSettings,
    appointments: &[AppointmentRow],
) -> Result<DayAvailability, ScheduleError> {
    if let Some(closure) = day_closure(date, settings) {
        return Ok(DayAvailability {
            date,
            closure: Some(closure),
            slots: Vec::new(),
        });
    }

    let grid = slot_grid(&settings.hours)?;
    let occupied = occupied_times(date, appointments, settings);
    let slots = grid
        .into_iter()
        .map(|time| SlotState {
            time,
            available: !occupied.contains(&time),
        })
        .collect();

    Ok(DayAvailability {
        date,
        closure: None,
        slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockedSlot, STATUS_CANCELLED, STATUS_CONFIRMED, STATUS_PENDING};

    fn t(raw: &str) -> NaiveTime {
        parse_time(raw).unwrap()
    }

    fn d(raw: &str) -> NaiveDate {
        parse_date(raw).unwrap()
    }

    fn settings() -> AdminSettings {
        AdminSettings {
            working_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
            ],
            hours: WorkingHours {
                start: t("08:00"),
                end: t("18:00"),
            },
            blocked_dates: BTreeSet::new(),
            blocked_slots: BTreeSet::new(),
        }
    }

    fn appointment(date: &str, time: &str, status: &str) -> AppointmentRow {
        AppointmentRow {
            id: format!("{date}-{time}"),
            client_name: "Cliente".to_string(),
            client_phone: "11912345678".to_string(),
            service_package: "Corte".to_string(),
            appointment_date: date.to_string(),
            appointment_time: time.to_string(),
            status: status.to_string(),
            created_at: "2024-06-01T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn grid_covers_hours_inclusive() {
        let cases = [
            ("08:00", "18:00"),
            ("09:00", "09:00"),
            ("09:00", "09:30"),
            ("00:00", "23:30"),
            ("13:30", "17:00"),
        ];
        for (start, end) in cases {
            let hours = WorkingHours {
                start: t(start),
                end: t(end),
            };
            let grid = slot_grid(&hours).unwrap();
            let span = minute_of_day(hours.end) - minute_of_day(hours.start);
            assert_eq!(grid.len() as u32, span / SLOT_MINUTES + 1, "{start}-{end}");
            assert_eq!(grid.first(), Some(&hours.start));
            assert_eq!(grid.last(), Some(&hours.end));
            assert!(grid.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }

    #[test]
    fn grid_stops_before_end_when_not_aligned() {
        let hours = WorkingHours {
            start: t("08:00"),
            end: t("09:45"),
        };
        let grid: Vec<String> = slot_grid(&hours).unwrap().into_iter().map(format_time).collect();
        assert_eq!(grid, vec!["08:00", "08:30", "09:00", "09:30"]);
    }

    #[test]
    fn grid_near_midnight_terminates() {
        let hours = WorkingHours {
            start: t("23:00"),
            end: t("23:59"),
        };
        assert_eq!(slot_grid(&hours).unwrap(), vec![t("23:00"), t("23:30")]);
    }

    #[test]
    fn inverted_hours_are_a_configuration_error() {
        let hours = WorkingHours {
            start: t("18:00"),
            end: t("08:00"),
        };
        assert_eq!(
            slot_grid(&hours),
            Err(ScheduleError::InvertedHours {
                start: "18:00".to_string(),
                end: "08:00".to_string(),
            })
        );
    }

    #[test]
    fn cancelled_appointments_do_not_occupy() {
        let date = d("2024-06-10");
        let rows = vec![
            appointment("2024-06-10", "10:00", STATUS_CANCELLED),
            appointment("2024-06-10", "11:00:00", STATUS_CONFIRMED),
            appointment("2024-06-11", "12:00", STATUS_PENDING),
        ];
        let occupied = occupied_times(date, &rows, &settings());
        assert!(!occupied.contains(&t("10:00")));
        assert!(occupied.contains(&t("11:00")));
        assert!(!occupied.contains(&t("12:00")));
    }

    #[test]
    fn blocked_slots_occupy_only_their_date() {
        let mut settings = settings();
        settings.blocked_slots.insert(BlockedSlot {
            date: d("2024-06-10"),
            time: t("14:30"),
        });
        let monday = resolve_day(d("2024-06-10"), &settings, &[]).unwrap();
        let tuesday = resolve_day(d("2024-06-11"), &settings, &[]).unwrap();
        assert!(!monday.available_times().contains(&t("14:30")));
        assert!(tuesday.available_times().contains(&t("14:30")));
    }

    #[test]
    fn resolve_day_subtracts_occupied_from_grid() {
        let rows = vec![
            appointment("2024-06-10", "08:00", STATUS_PENDING),
            appointment("2024-06-10", "09:30:45", STATUS_CONFIRMED),
        ];
        let day = resolve_day(d("2024-06-10"), &settings(), &rows).unwrap();
        assert!(day.is_bookable());
        assert_eq!(day.slots.len(), 21);
        assert_eq!(day.occupied_times(), vec![t("08:00"), t("09:30")]);
        assert_eq!(day.available_times().len(), 19);
        assert_eq!(day.available_times()[0], t("08:30"));
    }

    #[test]
    fn resolve_day_is_idempotent() {
        let rows = vec![appointment("2024-06-10", "10:00", STATUS_PENDING)];
        let first = resolve_day(d("2024-06-10"), &settings(), &rows).unwrap();
        let second = resolve_day(d("2024-06-10"), &settings(), &rows).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.available_times(), second.available_times());
    }

    #[test]
    fn closed_days_have_no_slots() {
        let mut settings = settings();
        settings.working_days.retain(|day| *day != Weekday::Wed);
        settings.blocked_dates.insert(d("2024-06-13"));

        // 2024-06-09 is a Sunday, 06-12 a Wednesday, 06-13 a Thursday.
        let cases = [
            ("2024-06-09", DayClosure::AlwaysClosed),
            ("2024-06-12", DayClosure::NotWorkingDay),
            ("2024-06-13", DayClosure::BlockedDate),
        ];
        for (date, closure) in cases {
            let day = resolve_day(d(date), &settings, &[]).unwrap();
            assert_eq!(day.closure, Some(closure), "{date}");
            assert!(day.slots.is_empty());
            assert!(!is_date_bookable(d(date), &settings));
        }
    }

    #[test]
    fn sunday_stays_closed_even_when_listed() {
        let mut settings = settings();
        settings.working_days.push(Weekday::Sun);
        assert_eq!(
            day_closure(d("2024-06-09"), &settings),
            Some(DayClosure::AlwaysClosed)
        );
    }

    #[test]
    fn inverted_hours_surface_from_resolve_day() {
        let mut settings = settings();
        settings.hours = WorkingHours {
            start: t("18:00"),
            end: t("08:00"),
        };
        assert!(matches!(
            resolve_day(d("2024-06-10"), &settings, &[]),
            Err(ScheduleError::InvertedHours { .. })
        ));
    }

    #[test]
    fn booking_window_bounds() {
        let today = d("2024-06-10");
        assert!(within_booking_window(today, today, 30));
        assert!(within_booking_window(d("2024-07-10"), today, 30));
        assert!(!within_booking_window(d("2024-07-11"), today, 30));
        assert!(!within_booking_window(d("2024-06-09"), today, 30));
    }

    #[test]
    fn times_are_truncated_to_minutes() {
        assert_eq!(format_time(t("10:00:59")), "10:00");
        assert_eq!(format_time(t(" 07:05 ")), "07:05");
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("dez horas").is_err());
    }

    #[test]
    fn phone_keeps_digits_only() {
        assert_eq!(normalize_phone("(11) 91234-5678"), "11912345678");
        assert_eq!(normalize_phone("+55 11 9 1234 5678"), "5511912345678");
        assert_eq!(normalize_phone("sem número"), "");
    }

    #[test]
    fn weekday_names_round_trip() {
        for day in WEEK {
            assert_eq!(parse_weekday(weekday_name(day)), Some(day));
        }
        assert_eq!(parse_weekday(" Monday "), Some(Weekday::Mon));
        assert_eq!(parse_weekday("segunda"), None);
    }
}
