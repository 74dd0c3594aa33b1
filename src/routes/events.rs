use actix_web::{http::header, middleware::from_fn, web, HttpResponse};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;

use crate::{
    auth::session_guard,
    state::{AppState, ServerEvent},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/admin/eventos")
            .wrap(from_fn(session_guard))
            .route(web::get().to(stream_events)),
    );
}

/// Server-sent events for the admin panel: one frame per appointment change.
async fn stream_events(state: web::Data<AppState>) -> HttpResponse {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<web::Bytes, actix_web::Error>(event_to_bytes(&event))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            log::warn!("Event subscriber lagged, {skipped} events dropped");
            None
        }
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

fn event_to_bytes(event: &ServerEvent) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: {}\ndata: {payload}\n\n", event.kind))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, App};

    use super::*;
    use crate::models::AppointmentRow;

    #[test]
    fn frames_carry_kind_and_json() {
        let row = AppointmentRow {
            id: "a1".to_string(),
            client_name: "Ana".to_string(),
            client_phone: "11912345678".to_string(),
            service_package: "Corte".to_string(),
            appointment_date: "2024-06-10".to_string(),
            appointment_time: "10:00".to_string(),
            status: "pending".to_string(),
            created_at: "2024-06-01T12:00:00Z".to_string(),
        };
        let bytes = event_to_bytes(&ServerEvent::from_row("appointment_created", &row));
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("event: appointment_created\ndata: {"));
        assert!(text.contains("\"appointment_id\":\"a1\""));
        assert!(text.ends_with("\n\n"));
    }

    #[actix_web::test]
    async fn stream_requires_session() {
        let app = actix_web::test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::for_tests().await))
                .configure(configure),
        )
        .await;
        let req = actix_web::test::TestRequest::get().uri("/admin/eventos").to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    }
}
