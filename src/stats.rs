use chrono::{Duration, Months, NaiveDate};
use serde::Serialize;

use crate::models::AppointmentRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Week,
    Month,
    Year,
}

impl Period {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "semana" => Some(Period::Week),
            "mes" => Some(Period::Month),
            "ano" => Some(Period::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Week => "semana",
            Period::Month => "mes",
            Period::Year => "ano",
        }
    }

    /// Inclusive range ending on `today`.
    pub fn range_ending(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = match self {
            Period::Week => today - Duration::days(7),
            Period::Month => today.checked_sub_months(Months::new(1)).unwrap_or(today),
            Period::Year => today.checked_sub_months(Months::new(12)).unwrap_or(today),
        };
        (start, today)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub appointments: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCount {
    pub name: String,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentStats {
    pub total: u32,
    pub average_per_day: f64,
    pub cancellation_rate: f64,
    pub most_popular_service: Option<String>,
    pub daily_appointments: Vec<DailyCount>,
    pub service_distribution: Vec<ServiceCount>,
}

/// Aggregates appointments already narrowed to the requested range.
///
/// Ties for the most popular service go to the one seen first, so callers
/// should pass rows in date/time order.
pub fn aggregate(rows: &[AppointmentRow]) -> AppointmentStats {
    let total = rows.len() as u32;
    let cancelled = rows.iter().filter(|row| row.is_cancelled()).count() as u32;

    let mut services: Vec<ServiceCount> = Vec::new();
    for row in rows {
        match services.iter_mut().find(|entry| entry.name == row.service_package) {
            Some(entry) => entry.value += 1,
            None => services.push(ServiceCount {
                name: row.service_package.clone(),
                value: 1,
            }),
        }
    }

    let mut most_popular: Option<&ServiceCount> = None;
    for entry in &services {
        if most_popular.map_or(true, |best| entry.value > best.value) {
            most_popular = Some(entry);
        }
    }
    let most_popular_service = most_popular.map(|entry| entry.name.clone());

    let mut daily: Vec<DailyCount> = Vec::new();
    for row in rows {
        match daily.iter_mut().find(|day| day.date == row.appointment_date) {
            Some(day) => day.appointments += 1,
            None => daily.push(DailyCount {
                date: row.appointment_date.clone(),
                appointments: 1,
            }),
        }
    }
    daily.sort_by(|a, b| a.date.cmp(&b.date));

    let (average_per_day, cancellation_rate) = if total == 0 {
        (0.0, 0.0)
    } else {
        (
            f64::from(total) / daily.len() as f64,
            f64::from(cancelled) / f64::from(total) * 100.0,
        )
    };

    AppointmentStats {
        total,
        average_per_day,
        cancellation_rate,
        most_popular_service,
        daily_appointments: daily,
        service_distribution: services,
    }
}
