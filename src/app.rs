use std::net::SocketAddr;

use axum::{
    http::{HeaderValue, Method, Uri},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{auth, error::AppError, patients, plans, state::AppState, storage::PUBLIC_PREFIX};

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(state.config.frontend_url.as_deref());
    let uploads = ServeDir::new(&state.config.uploads_dir);

    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(patients::router())
                .merge(plans::router())
                .route("/health", get(health)),
        )
        .nest_service(PUBLIC_PREFIX, uploads)
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        )
}

/// A configured frontend origin gets credentialed CORS; otherwise any origin.
fn cors_layer(frontend_url: Option<&str>) -> CorsLayer {
    match frontend_url.and_then(|u| HeaderValue::from_str(u).ok()) {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

async fn health() -> Json<Value> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(json!({ "status": "ok", "timestamp": timestamp }))
}

async fn not_found(method: Method, uri: Uri) -> AppError {
    AppError::not_found(format!("Route not found: {} {}", method, uri))
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        (status, body_json(resp).await)
    }

    async fn register(app: &Router, email: &str, role: &str) -> String {
        let (status, json) = send(
            app,
            Method::POST,
            "/api/auth/register",
            None,
            Some(json!({"email": email, "password": "Pw1234!!", "name": "Someone", "role": role})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["data"]["accessToken"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_and_unknown_route() {
        let app = build_app(AppState::fake());
        let (status, json) = send(&app, Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");

        let (status, json) = send(&app, Method::GET, "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn auth_gates_answer_401_and_403() {
        let app = build_app(AppState::fake());
        let (status, _) = send(&app, Method::GET, "/api/plans", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = send(&app, Method::GET, "/api/plans", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let patient = register(&app, "p@x.com", "PATIENT").await;
        let (status, json) = send(&app, Method::GET, "/api/patients", Some(&patient), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "FORBIDDEN");
        let (status, _) =
            send(&app, Method::GET, "/api/plans/stats/patient", Some(&patient), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_body_and_path_use_the_envelope() {
        let app = build_app(AppState::fake());
        let doctor = register(&app, "d@x.com", "DOCTOR").await;

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "d@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);

        let (status, json) =
            send(&app, Method::GET, "/api/plans/not-a-uuid", Some(&doctor), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn doctor_patient_plan_flow_over_http() {
        let app = build_app(AppState::fake());
        let doctor = register(&app, "d@x.com", "DOCTOR").await;

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/patients",
            Some(&doctor),
            Some(json!({"email": "p@x.com", "password": "Pw1234!!", "name": "Pat"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(json["data"].get("passwordHash").is_none());
        let patient_id = json["data"]["id"].as_str().unwrap().to_string();

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/plans",
            Some(&doctor),
            Some(json!({
                "title": "Week 1",
                "patientId": patient_id,
                "dailyMeals": [{"dayNumber": 1, "dayName": "Monday", "meals": [
                    {"type": "BREAKFAST", "name": "Oatmeal", "foods": [{"name": "Oats", "quantity": "40g"}]}
                ]}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        let plan = &json["data"];
        assert_eq!(plan["patient"]["email"], "p@x.com");
        assert_eq!(plan["doctor"]["email"], "d@x.com");
        let plan_id = plan["id"].as_str().unwrap().to_string();
        let meal_id = plan["dailyMeals"][0]["meals"][0]["id"]
            .as_str()
            .unwrap()
            .to_string();

        let (status, json) = send(
            &app,
            Method::DELETE,
            &format!("/api/plans/{}/meals/{}", plan_id, meal_id),
            Some(&doctor),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["dailyMeals"].as_array().unwrap().len(), 1);
        assert!(json["data"]["dailyMeals"][0]["meals"]
            .as_array()
            .unwrap()
            .is_empty());

        let (status, json) =
            send(&app, Method::GET, "/api/plans/stats/doctor", Some(&doctor), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["patientsCount"], 1);
        assert_eq!(json["data"]["plansCount"], 1);

        let (status, json) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "p@x.com", "password": "Pw1234!!"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let patient = json["data"]["accessToken"].as_str().unwrap().to_string();

        let (status, json) = send(&app, Method::GET, "/api/plans", Some(&patient), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"].as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            Method::DELETE,
            &format!("/api/plans/{}", plan_id),
            Some(&patient),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
