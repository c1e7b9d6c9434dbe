//! HTTP routes for planogram-server

pub mod actor;
pub mod health;
pub mod pog;
pub mod shelf;
pub mod shelf_update;

use axum::Router;
use axum::routing::{get, patch, post, put};
use http::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone, Default)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Branch-facing routes: layout view, POG requests, update notifications.
fn branch_router() -> Router<AppState> {
    Router::new()
        .route("/api/shelves/{branch}/{shelf}", get(shelf::layout))
        .route(
            "/api/pog-requests",
            post(pog::create).get(pog::list_for_branch),
        )
        .route("/api/pog-requests/{id}/cancel", patch(pog::cancel))
        .route("/api/shelf-updates/{branch}", get(shelf_update::get_flag))
        .route(
            "/api/shelf-updates/{branch}/acknowledge",
            post(shelf_update::acknowledge_flag),
        )
        .route(
            "/api/shelf-updates/{branch}/logs",
            get(shelf_update::list_logs),
        )
        .route(
            "/api/shelf-updates/{branch}/logs/acknowledge",
            post(shelf_update::acknowledge_all),
        )
        .route(
            "/api/shelf-change-logs/{id}/acknowledge",
            patch(shelf_update::acknowledge_one),
        )
}

/// Admin routes: request review and the shelf editor.
fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/pog-requests", get(pog::admin_list))
        .route(
            "/api/admin/pog-requests/bulk-approve",
            post(pog::bulk_approve),
        )
        .route("/api/admin/pog-requests/{id}", patch(pog::update_status))
        .route(
            "/api/admin/shelf-updates/status",
            get(shelf_update::branch_status),
        )
        .route(
            "/api/admin/shelves/{branch}/changes",
            post(shelf::apply_change),
        )
        .route(
            "/api/admin/shelves/{branch}/{shelf}",
            put(shelf::replace_shelf),
        )
        .route(
            "/api/admin/shelves/{branch}/{shelf}/items",
            post(shelf::add_items).delete(shelf::delete_item),
        )
        .route(
            "/api/admin/shelves/{branch}/{shelf}/rows/{row}/reindex",
            post(shelf::reindex_row),
        )
}

/// Create the combined router with middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .merge(branch_router())
        .merge(admin_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            REQUEST_ID_HEADER,
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static(REQUEST_ID_HEADER),
            XRequestId,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{Method, Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::shelf::EngineConfig;
    use crate::store::memory::MemoryStore;

    fn app() -> (MemoryStore, Router) {
        let store = MemoryStore::new();
        for code in 1..=5 {
            store.seed_product(code, &format!("885{code:03}"), Some(&format!("item {code}")), None);
        }
        let state = AppState::with_store(store.shared(), EngineConfig::default());
        (store, create_router(state))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(actor::ACTOR_HEADER, "hq-admin");
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_request_id() {
        let (_, app) = app();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_change_is_visible_to_branch() {
        let (_, app) = app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/admin/shelves/001/changes",
            Some(json!({
                "action": "add",
                "barcode": "885001",
                "to": { "shelf_code": "A1", "row_no": 1, "index": 1 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["change_logs"], 1);

        let (status, layout) = send(&app, Method::GET, "/api/shelves/001/A1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(layout["rows"][0]["items"][0]["barcode"], "885001");
        assert_eq!(layout["rows"][0]["items"][0]["name"], "item 1");

        let (_, flag) = send(&app, Method::GET, "/api/shelf-updates/001", None).await;
        assert_eq!(flag["has_update"], true);

        let (_, page) = send(&app, Method::GET, "/api/shelf-updates/001/logs", None).await;
        assert_eq!(page["unacknowledged_count"], 1);
        assert_eq!(page["logs"][0]["created_by"], "hq-admin");

        let (status, ack) = send(
            &app,
            Method::POST,
            "/api/shelf-updates/001/logs/acknowledge",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["acknowledged"], 1);

        let (_, flag) = send(&app, Method::GET, "/api/shelf-updates/001", None).await;
        assert_eq!(flag["has_update"], false);

        let (_, summary) = send(&app, Method::GET, "/api/admin/shelf-updates/status", None).await;
        assert_eq!(summary["total_pending"], 0);
        assert_eq!(summary["branches"][0]["status"], "acknowledged");
    }

    #[tokio::test]
    async fn test_pog_request_round_trip() {
        let (_, app) = app();
        let form = json!({
            "branch_code": "001",
            "action": "add",
            "barcode": "885002",
            "to_shelf": "B1",
            "to_row": 2,
            "to_index": 1
        });

        let (status, created) = send(&app, Method::POST, "/api/pog-requests", Some(form.clone())).await;
        assert_eq!(status, StatusCode::OK, "{created}");
        assert_eq!(created["status"], "pending");
        assert_eq!(created["created_by"], "hq-admin");
        let id = created["id"].as_i64().unwrap();

        let (status, dup) = send(&app, Method::POST, "/api/pog-requests", Some(form)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(dup["code"], 5002);

        let (_, history) = send(&app, Method::GET, "/api/pog-requests?branch_code=001", None).await;
        assert_eq!(history.as_array().unwrap().len(), 1);

        let (status, done) = send(
            &app,
            Method::PATCH,
            &format!("/api/admin/pog-requests/{id}"),
            Some(json!({ "status": "completed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{done}");
        assert_eq!(done["status"], "completed");

        let (_, layout) = send(&app, Method::GET, "/api/shelves/001/B1", None).await;
        assert_eq!(layout["rows"][0]["row_no"], 2);
        assert_eq!(layout["rows"][0]["items"][0]["code_product"], 2);

        let (status, again) = send(&app, Method::PATCH, &format!("/api/pog-requests/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(again["code"], 5003);

        let (_, list) = send(&app, Method::GET, "/api/admin/pog-requests?status=pending", None).await;
        assert_eq!(list["count"], 0);
        assert_eq!(list["stats"]["completed"], 1);
    }

    #[tokio::test]
    async fn test_bulk_approve_reports_failures() {
        let (store, app) = app();
        store.seed_slots("001", "A1", &[(1, 1, 1)]);

        let (_, first) = send(
            &app,
            Method::POST,
            "/api/pog-requests",
            Some(json!({
                "branch_code": "001",
                "action": "delete",
                "barcode": "885001",
                "from_shelf": "A1",
                "from_row": 1,
                "from_index": 1
            })),
        )
        .await;
        let id = first["id"].as_i64().unwrap();

        let (status, result) = send(
            &app,
            Method::POST,
            "/api/admin/pog-requests/bulk-approve",
            Some(json!({ "ids": [id, 999] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{result}");
        assert_eq!(result["success"], 1);
        assert_eq!(result["failed"], 1);
        assert!(result["errors"][0].as_str().unwrap().starts_with("#999:"));
    }

    #[tokio::test]
    async fn test_direct_editor_routes() {
        let (store, app) = app();
        store.seed_slots("001", "C1", &[(1, 1, 1), (1, 3, 2)]);

        let (status, reindexed) = send(
            &app,
            Method::POST,
            "/api/admin/shelves/001/C1/rows/1/reindex",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reindexed["count"], 2);

        let (status, added) = send(
            &app,
            Method::POST,
            "/api/admin/shelves/001/C1/items",
            Some(json!({ "items": [{ "row_no": 1, "index": 1, "code_product": 3 }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{added}");

        let (status, _) = send(
            &app,
            Method::DELETE,
            "/api/admin/shelves/001/C1/items",
            Some(json!({ "row_no": 1, "code_product": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, layout) = send(&app, Method::GET, "/api/shelves/001/C1", None).await;
        let codes: Vec<i64> = layout["rows"][0]["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["code_product"].as_i64().unwrap())
            .collect();
        assert_eq!(codes, vec![3, 2]);

        let (status, replaced) = send(
            &app,
            Method::PUT,
            "/api/admin/shelves/001/C1",
            Some(json!({ "items": [
                { "row_no": 1, "index": 1, "code_product": 4 },
                { "row_no": 1, "index": 1, "code_product": 5 }
            ] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{replaced}");
    }

    #[tokio::test]
    async fn test_errors_carry_codes() {
        let (_, app) = app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/admin/shelves/001/changes",
            Some(json!({
                "action": "add",
                "barcode": "000000",
                "to": { "shelf_code": "A1", "row_no": 1, "index": 1 }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 6001);

        let (status, body) = send(&app, Method::PATCH, "/api/pog-requests/42/cancel", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 5001);

        let (status, _) = send(&app, Method::PATCH, "/api/shelf-change-logs/42/acknowledge", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::GET, "/api/pog-requests", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 2);
    }
}
