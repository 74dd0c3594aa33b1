use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::Serialize;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CONFIRMED: &str = "confirmed";
pub const STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => STATUS_PENDING,
            AppointmentStatus::Confirmed => STATUS_CONFIRMED,
            AppointmentStatus::Cancelled => STATUS_CANCELLED,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            STATUS_PENDING => Some(AppointmentStatus::Pending),
            STATUS_CONFIRMED => Some(AppointmentStatus::Confirmed),
            STATUS_CANCELLED => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "Pendente",
            AppointmentStatus::Confirmed => "Confirmado",
            AppointmentStatus::Cancelled => "Cancelado",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub client_name: String,
    pub client_phone: String,
    pub service_package: String,
    pub appointment_date: String,
    pub appointment_time: String,
    pub status: String,
    pub created_at: String,
}

impl AppointmentRow {
    pub fn is_cancelled(&self) -> bool {
        self.status == STATUS_CANCELLED
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServicePackageRow {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub duration_minutes: i64,
    pub description: String,
    pub active: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SettingsRow {
    pub working_days: String,
    pub work_start: String,
    pub work_end: String,
}

#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminSessionRow {
    pub id: String,
    pub session_token: String,
    pub username: String,
    pub created_at: String,
    pub expires_at: String,
    pub is_active: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockedSlot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Business-hours configuration, kept as a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminSettings {
    /// Monday-first, no duplicates.
    pub working_days: Vec<Weekday>,
    pub hours: WorkingHours,
    pub blocked_dates: BTreeSet<NaiveDate>,
    pub blocked_slots: BTreeSet<BlockedSlot>,
}

impl AdminSettings {
    pub fn works_on(&self, day: Weekday) -> bool {
        self.working_days.contains(&day)
    }

    pub fn blocked_times_on(&self, date: NaiveDate) -> impl Iterator<Item = NaiveTime> + '_ {
        self.blocked_slots
            .iter()
            .filter(move |slot| slot.date == date)
            .map(|slot| slot.time)
    }
}
