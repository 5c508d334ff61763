//! Health and status endpoints

use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::providers::ProviderChoice;
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    name: &'static str,
    version: &'static str,
    customer: Option<String>,
    plan: Option<String>,
    ai_provider: ProviderChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    deployment_id: Option<String>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let config = &state.config;

    Json(StatusResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        customer: config.customer().map(str::to_string),
        plan: config.plan.clone(),
        ai_provider: state.provider,
        deployment_id: config.deployment_id.clone(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(status))
        .route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(pairs: &'static [(&'static str, &'static str)]) -> Router {
        let config = Config::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap();
        let provider = ProviderChoice::select(&config.credentials());

        router().with_state(AppState {
            config: Arc::new(config),
            provider,
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(app(&[]), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_status_reports_deployment() {
        let (status, body) = get_json(
            app(&[
                ("CUSTOMER_NAME", "Acme"),
                ("PLAN", "starter"),
                ("DEPLOYMENT_ID", "dep-7"),
                ("OPENAI_API_KEY", "sk-1"),
                ("ANTHROPIC_API_KEY", "sk-ant-1"),
            ]),
            "/",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["customer"], "Acme");
        assert_eq!(body["plan"], "starter");
        assert_eq!(body["aiProvider"], "anthropic");
        assert_eq!(body["deploymentId"], "dep-7");
    }

    #[tokio::test]
    async fn test_status_with_minimal_config() {
        let (_, body) = get_json(app(&[("GEMINI_API_KEY", "g-1")]), "/").await;

        assert!(body["customer"].is_null());
        assert!(body["plan"].is_null());
        assert_eq!(body["aiProvider"], "gemini");
        assert!(body.get("deploymentId").is_none());
    }
}
