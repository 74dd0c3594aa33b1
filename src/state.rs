use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{auth::AdminCredentials, config::Config, models::AppointmentRow};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<Config>,
    pub credentials: Arc<AdminCredentials>,
    pub events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: Config, credentials: AdminCredentials) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            db,
            config: Arc::new(config),
            credentials: Arc::new(credentials),
            events,
        }
    }

    /// Nobody listening is fine; the event is dropped.
    pub fn publish(&self, kind: &str, row: &AppointmentRow) {
        let _ = self.events.send(ServerEvent::from_row(kind, row));
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub appointment_id: String,
    pub status: String,
    pub client_name: String,
    pub service_package: String,
    pub appointment_date: String,
    pub appointment_time: String,
}

impl ServerEvent {
    pub fn from_row(kind: &str, row: &AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            appointment_id: row.id.clone(),
            status: row.status.clone(),
            client_name: row.client_name.clone(),
            service_package: row.service_package.clone(),
            appointment_date: row.appointment_date.clone(),
            appointment_time: row.appointment_time.clone(),
        }
    }
}

#[cfg(test)]
impl AppState {
    pub async fn for_tests() -> Self {
        let config = Config::for_tests();
        let credentials = AdminCredentials::from_config(&config).expect("hash test password");
        Self::new(crate::db::test_pool().await, config, credentials)
    }
}
