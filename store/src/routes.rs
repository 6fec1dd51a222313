use std::convert::Infallible;
use std::sync::Arc;
use warp::{self, http::Response, Filter};

use common::{ProcessedAgentData, PROCESSED_AGENT_DATA_PATH};

use crate::config::AppState;
use crate::controller::{processed_agent_data, rejection, websocket};

pub fn store_routes(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
    home_route()
        .or(create_processed_agent_data(app_state.clone()))
        .or(list_processed_agent_data(app_state.clone()))
        .or(read_processed_agent_data(app_state.clone()))
        .or(update_processed_agent_data(app_state.clone()))
        .or(delete_processed_agent_data(app_state.clone()))
        .or(live_updates(app_state))
        .recover(rejection::handle_rejection)
}

fn with_state(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || app_state.clone())
}

fn collection() -> impl Filter<Extract = (), Error = warp::Rejection> + Clone {
    warp::path(PROCESSED_AGENT_DATA_PATH).and(warp::path::end())
}

fn item() -> impl Filter<Extract = (i64,), Error = warp::Rejection> + Clone {
    warp::path(PROCESSED_AGENT_DATA_PATH)
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
}

fn home_route() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end() // Matches the root path "/"
        .and(warp::get()) // Only responds to GET requests
        .map(|| {
            Response::builder()
                .status(warp::http::StatusCode::OK)
                .body("Hello from store")
                .expect("Failed to construct response")
        })
}

/// POST /processed_agent_data
///
/// Stores a batch of processed agent data and pushes each item to the live
/// subscribers of its `user_id`.
///
/// ```sh
/// curl -X POST "http://localhost:8000/processed_agent_data" \
///      -H "Content-Type: application/json" \
///      -d '[{"road_state": "pothole", "agent_data": {"user_id": 1,
///            "accelerometer": {"x": 0.1, "y": 0.2, "z": 16500.0},
///            "gps": {"latitude": 50.4501, "longitude": 30.5234},
///            "timestamp": "2024-03-01T10:15:30Z"}}]'
/// ```
fn create_processed_agent_data(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let limit = app_state.configuration.max_body_bytes;
    collection()
        .and(warp::post())
        .and(warp::body::content_length_limit(limit).and(warp::body::json::<Vec<ProcessedAgentData>>()))
        .and(with_state(app_state))
        .and_then(processed_agent_data::create_processed_agent_data_wrapper)
}

/// GET /processed_agent_data
fn list_processed_agent_data(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    collection()
        .and(warp::get())
        .and(with_state(app_state))
        .and_then(processed_agent_data::list_processed_agent_data_wrapper)
}

/// GET /processed_agent_data/:id
fn read_processed_agent_data(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    item()
        .and(warp::get())
        .and(with_state(app_state))
        .and_then(processed_agent_data::read_processed_agent_data_wrapper)
}

/// PUT /processed_agent_data/:id
fn update_processed_agent_data(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let limit = app_state.configuration.max_body_bytes;
    item()
        .and(warp::put())
        .and(warp::body::content_length_limit(limit).and(warp::body::json::<ProcessedAgentData>()))
        .and(with_state(app_state))
        .and_then(processed_agent_data::update_processed_agent_data_wrapper)
}

/// DELETE /processed_agent_data/:id
fn delete_processed_agent_data(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    item()
        .and(warp::delete())
        .and(with_state(app_state))
        .and_then(processed_agent_data::delete_processed_agent_data_wrapper)
}

/// GET /ws/:user_id (WebSocket upgrade)
///
/// Every item later stored for `user_id` arrives as one JSON text frame.
fn live_updates(
    app_state: Arc<AppState>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::param::<i64>())
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_state(app_state))
        .map(|user_id: i64, ws: warp::ws::Ws, app_state: Arc<AppState>| {
            ws.on_upgrade(move |socket| websocket::handle_subscription(socket, user_id, app_state))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use crate::db::{memory::MemoryStore, DataStore};
    use crate::error::{StoreError, StoreResult};
    use common::{NewRecord, ProcessedAgentDataInDB};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;
    use warp::http::StatusCode;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Configuration::default(),
            Arc::new(MemoryStore::default()),
        ))
    }

    fn item_json(user_id: i64, road_state: &str, latitude: f64) -> Value {
        json!({
            "road_state": road_state,
            "agent_data": {
                "user_id": user_id,
                "accelerometer": {"x": 0.5, "y": -1.0, "z": 16400.0},
                "gps": {"latitude": latitude, "longitude": 30.5234},
                "timestamp": "2024-03-01T10:15:30Z"
            }
        })
    }

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    async fn post_batch(app_state: &Arc<AppState>, batch: Value) -> (StatusCode, Value) {
        let resp = warp::test::request()
            .method("POST")
            .path("/processed_agent_data")
            .json(&batch)
            .reply(&store_routes(app_state.clone()))
            .await;
        (resp.status(), body_json(resp.body()))
    }

    async fn wait_for_subscribers(app_state: &Arc<AppState>, user_id: i64, expected: usize) {
        for _ in 0..100 {
            if app_state.subscriptions.subscriber_count(user_id) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} subscribers for user {}, found {}",
            expected,
            user_id,
            app_state.subscriptions.subscriber_count(user_id)
        );
    }

    #[tokio::test]
    async fn test_home_route() {
        let resp = warp::test::request()
            .path("/")
            .reply(&store_routes(state()))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"Hello from store");
    }

    #[tokio::test]
    async fn test_create_then_list_and_read() {
        let app_state = state();
        let (status, body) = post_batch(
            &app_state,
            json!([item_json(1, "normal", 50.1), item_json(2, "pothole", 50.2)]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success"}));

        let resp = warp::test::request()
            .path("/processed_agent_data")
            .reply(&store_routes(app_state.clone()))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let rows: Vec<ProcessedAgentDataInDB> = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[1].id, 2);
        assert_eq!(rows[1].road_state, "pothole");
        assert_eq!(rows[1].user_id, 2);
        assert_eq!(rows[1].latitude, 50.2);

        let resp = warp::test::request()
            .path("/processed_agent_data/2")
            .reply(&store_routes(app_state))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp.body()),
            json!({
                "id": 2,
                "road_state": "pothole",
                "user_id": 2,
                "x": 0.5,
                "y": -1.0,
                "z": 16400.0,
                "latitude": 50.2,
                "longitude": 30.5234,
                "timestamp": "2024-03-01T10:15:30Z"
            })
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_accepted() {
        let app_state = state();
        let (status, body) = post_batch(&app_state, json!([])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success"}));
        assert!(app_state.db.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_is_404() {
        let resp = warp::test::request()
            .path("/processed_agent_data/99")
            .reply(&store_routes(state()))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp.body()), json!({"detail": "Data not found"}));
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_404() {
        let resp = warp::test::request()
            .path("/processed_agent_data/abc")
            .reply(&store_routes(state()))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp.body()), json!({"detail": "Not Found"}));
    }

    #[tokio::test]
    async fn test_invalid_body_is_422_and_stores_nothing() {
        let app_state = state();
        let mut bad = item_json(1, "normal", 50.0);
        bad["agent_data"]["timestamp"] = json!("last tuesday");

        let (status, body) = post_batch(&app_state, json!([item_json(1, "normal", 50.0), bad])).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"]
            .as_str()
            .unwrap()
            .contains("Invalid timestamp format"));
        assert!(app_state.db.list().unwrap().is_empty());

        let (status, _) = post_batch(&app_state, json!({"road_state": "not a list"})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_update_replaces_row() {
        let app_state = state();
        post_batch(&app_state, json!([item_json(1, "normal", 50.0)])).await;

        let mut replacement = item_json(4, "bump", 51.5);
        replacement["agent_data"]["timestamp"] = json!("2024-03-02T08:00:00+02:00");
        let resp = warp::test::request()
            .method("PUT")
            .path("/processed_agent_data/1")
            .json(&replacement)
            .reply(&store_routes(app_state.clone()))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let row: ProcessedAgentDataInDB = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(row.id, 1);
        assert_eq!(row.road_state, "bump");
        assert_eq!(row.user_id, 4);
        assert_eq!(row.latitude, 51.5);
        assert_eq!(row.timestamp.to_rfc3339(), "2024-03-02T06:00:00+00:00");
        assert_eq!(app_state.db.get(1).unwrap(), Some(row));
    }

    #[tokio::test]
    async fn test_update_missing_is_404_and_creates_nothing() {
        let app_state = state();
        let resp = warp::test::request()
            .method("PUT")
            .path("/processed_agent_data/5")
            .json(&item_json(1, "normal", 50.0))
            .reply(&store_routes(app_state.clone()))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp.body()), json!({"detail": "Data not found"}));
        assert!(app_state.db.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let app_state = state();
        post_batch(&app_state, json!([item_json(1, "normal", 50.0)])).await;

        let delete = || {
            warp::test::request()
                .method("DELETE")
                .path("/processed_agent_data/1")
        };

        let resp = delete().reply(&store_routes(app_state.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body()), json!({"status": "deleted"}));

        let resp = delete().reply(&store_routes(app_state.clone())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp.body()), json!({"detail": "Data not found"}));
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let configuration = Configuration {
            max_body_bytes: 64,
            ..Configuration::default()
        };
        let app_state = Arc::new(AppState::new(
            configuration,
            Arc::new(MemoryStore::default()),
        ));
        let (status, _) = post_batch(&app_state, json!([item_json(1, "normal", 50.0)])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app_state.db.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collection_accepts_trailing_slash() {
        let app_state = state();
        let resp = warp::test::request()
            .method("POST")
            .path("/processed_agent_data/")
            .json(&json!([item_json(1, "normal", 50.0)]))
            .reply(&store_routes(app_state.clone()))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body()), json!({"status": "success"}));

        let resp = warp::test::request()
            .path("/processed_agent_data/")
            .reply(&store_routes(app_state))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let rows: Vec<ProcessedAgentDataInDB> = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }

    #[tokio::test]
    async fn test_plain_get_on_live_route_is_400() {
        let resp = warp::test::request()
            .path("/ws/1")
            .reply(&store_routes(state()))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp.body())["detail"].is_string());
    }

    #[tokio::test]
    async fn test_wrong_method_is_405() {
        let resp = warp::test::request()
            .method("PATCH")
            .path("/processed_agent_data/1")
            .reply(&store_routes(state()))
            .await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    struct FailingStore;

    impl DataStore for FailingStore {
        fn insert_batch(&self, _: &[NewRecord]) -> StoreResult<Vec<i64>> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        fn get(&self, _: i64) -> StoreResult<Option<ProcessedAgentDataInDB>> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        fn list(&self) -> StoreResult<Vec<ProcessedAgentDataInDB>> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        fn update(&self, _: i64, _: &NewRecord) -> StoreResult<bool> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
        fn delete(&self, _: i64) -> StoreResult<bool> {
            Err(StoreError::Backend("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_failure_is_500_without_notifying() {
        let app_state = Arc::new(AppState::new(Configuration::default(), Arc::new(FailingStore)));
        let (_, mut updates) = app_state.subscriptions.subscribe(1);

        let (status, body) = post_batch(&app_state, json!([item_json(1, "normal", 50.0)])).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"detail": "Internal Server Error"}));
        assert!(updates.try_recv().is_err());

        let resp = warp::test::request()
            .path("/processed_agent_data")
            .reply(&store_routes(app_state))
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_live_updates_reach_matching_subscriber() {
        let app_state = state();
        let routes = store_routes(app_state.clone());

        let mut client = warp::test::ws()
            .path("/ws/1")
            .handshake(routes.clone())
            .await
            .expect("handshake");
        wait_for_subscribers(&app_state, 1, 1).await;

        let (status, _) = post_batch(
            &app_state,
            json!([item_json(2, "normal", 10.0), item_json(1, "pothole", 50.4474)]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let msg = client.recv().await.expect("live update");
        let pushed: Value = serde_json::from_str(msg.to_str().unwrap()).unwrap();
        assert_eq!(pushed, item_json(1, "pothole", 50.4474));

        client.send(warp::ws::Message::close()).await;
        let reply = client.recv().await.expect("close reply");
        assert!(reply.is_close());
        wait_for_subscribers(&app_state, 1, 0).await;
    }

    #[tokio::test]
    async fn test_live_updates_follow_batch_order() {
        let app_state = state();
        let routes = store_routes(app_state.clone());

        let mut client = warp::test::ws()
            .path("/ws/3")
            .handshake(routes.clone())
            .await
            .expect("handshake");
        wait_for_subscribers(&app_state, 3, 1).await;

        let first = item_json(3, "normal", 50.1);
        let second = item_json(3, "pothole", 50.2);
        let (status, _) = post_batch(&app_state, json!([first.clone(), second.clone()])).await;
        assert_eq!(status, StatusCode::OK);

        let mut pushed = Vec::new();
        for _ in 0..2 {
            let msg = client.recv().await.expect("live update");
            pushed.push(serde_json::from_str::<Value>(msg.to_str().unwrap()).unwrap());
        }
        assert_eq!(pushed, vec![first, second]);
    }
}
