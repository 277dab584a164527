//! Route table. Everything except `/health` sits behind bearer auth.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use super::endpoints::{appointments, directory, health};
use super::{auth, AppState};
use crate::observability::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

pub fn build_router(state: AppState) -> Router {
    let clinic = "/company/:companyId/clinics/:clinicId";
    let appointment = format!("{clinic}/appointments/:appointmentId");

    let protected = Router::new()
        .route("/company", post(directory::create_company))
        .route("/company/:companyId", get(directory::get_company))
        .route(
            "/company/:companyId/clinics",
            post(directory::create_clinic).get(directory::list_clinics),
        )
        .route(clinic, get(directory::get_clinic))
        .route(
            "/company/:companyId/employees",
            post(directory::add_employee).get(directory::list_employees),
        )
        .route(
            "/company/:companyId/employees/:employeeId",
            delete(directory::remove_employee),
        )
        .route(
            &format!("{clinic}/employees/:employeeId/free"),
            get(directory::free_time),
        )
        .route(
            &format!("{clinic}/patients"),
            post(directory::create_patient).get(directory::list_patients),
        )
        .route(
            &format!("{clinic}/patients/:patientId"),
            get(directory::get_patient),
        )
        .route(
            &format!("{clinic}/patients/:patientId/credit"),
            post(directory::add_credit),
        )
        .route(
            &format!("{clinic}/groups"),
            post(directory::create_group).get(directory::list_groups),
        )
        .route(
            &format!("{clinic}/groups/:groupId/members"),
            post(directory::add_group_member),
        )
        .route(
            &format!("{clinic}/services"),
            post(directory::create_service).get(directory::list_services),
        )
        .route(
            &format!("{clinic}/services/:serviceId"),
            delete(directory::remove_service),
        )
        .route(
            &format!("{clinic}/notifications"),
            get(directory::list_notifications),
        )
        .route(
            &format!("{clinic}/appointments"),
            get(appointments::list).post(appointments::create),
        )
        .route(
            &appointment,
            get(appointments::get)
                .patch(appointments::update)
                .delete(appointments::delete),
        )
        .route(
            &format!("{appointment}/complete"),
            patch(appointments::complete),
        )
        .route(&format!("{appointment}/status"), patch(appointments::status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(health::check))
        .merge(protected)
        .layer(middleware::from_fn(track_metrics))
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(started.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, StatusCode};
    use tower::ServiceExt;

    use crate::auth::StaticTokenVerifier;
    use crate::cache::MemoryCache;
    use crate::notify::InvalidationNotifier;
    use crate::tenant::TenantManager;

    fn test_state(name: &str) -> AppState {
        let dir = std::env::temp_dir().join("clinicbook_test_router").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let store = Arc::new(MemoryCache::new());
        let notify = Arc::new(InvalidationNotifier::new(store));
        let views = notify.views(Duration::from_secs(60));
        AppState {
            tenants: Arc::new(TenantManager::new(dir, notify, 1000, 3_600_000)),
            verifier: Arc::new(StaticTokenVerifier::new().with_token("tok-ana", "ana@clinic.test")),
            views,
        }
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let app = build_router(test_state("health"));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn missing_and_unknown_tokens_are_401() {
        let app = build_router(test_state("unauth"));
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/company")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/company/01ARZ3NDEKTSV4RRFFQ69G5FAV")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_company_is_404() {
        let app = build_router(test_state("unknown_company"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/company/01ARZ3NDEKTSV4RRFFQ69G5FAV/clinics")
                    .header(header::AUTHORIZATION, "Bearer tok-ana")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
