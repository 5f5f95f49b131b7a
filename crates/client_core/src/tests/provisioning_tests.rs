use std::sync::Arc;

use super::*;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct BackendState {
    pulls: Arc<Mutex<Vec<PullImageRequest>>>,
    runs: Arc<Mutex<Vec<RunContainerRequest>>>,
}

async fn handle_pull(
    State(state): State<BackendState>,
    Json(body): Json<PullImageRequest>,
) -> (StatusCode, String) {
    let missing = body.image_name == "missing:latest";
    state.pulls.lock().await.push(body);
    if missing {
        (StatusCode::NOT_FOUND, "no such image\n".to_string())
    } else {
        (StatusCode::OK, String::new())
    }
}

async fn handle_run(
    State(state): State<BackendState>,
    Json(body): Json<RunContainerRequest>,
) -> StatusCode {
    let conflict = body.host_port == 1;
    state.runs.lock().await.push(body);
    if conflict {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::CREATED
    }
}

async fn handle_slow() -> StatusCode {
    tokio::time::sleep(Duration::from_millis(500)).await;
    StatusCode::OK
}

async fn spawn_backend(slow: bool) -> (String, BackendState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = BackendState::default();
    let router = if slow {
        Router::new()
            .route(PULL_PATH, post(handle_slow))
            .route(RUN_PATH, post(handle_slow))
    } else {
        Router::new()
            .route(PULL_PATH, post(handle_pull))
            .route(RUN_PATH, post(handle_run))
    };
    let app = router.with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[tokio::test]
async fn acquire_image_posts_image_name() {
    let (base_url, state) = spawn_backend(false).await;
    let client = HttpProvisioningClient::new(base_url, Duration::from_secs(5));

    client.acquire_image("sim:latest").await.expect("pull");

    let pulls = state.pulls.lock().await;
    assert_eq!(
        pulls.as_slice(),
        &[PullImageRequest {
            image_name: "sim:latest".into()
        }]
    );
}

#[tokio::test]
async fn acquire_image_surfaces_backend_error_text() {
    let (base_url, _state) = spawn_backend(false).await;
    let client = HttpProvisioningClient::new(format!("{base_url}/"), Duration::from_secs(5));

    let err = client
        .acquire_image("missing:latest")
        .await
        .expect_err("must fail");
    assert_eq!(err, ProvisioningError::BackendFailure("no such image".into()));
}

#[tokio::test]
async fn launch_instance_sends_port_mapping() {
    let (base_url, state) = spawn_backend(false).await;
    let client = HttpProvisioningClient::new(base_url, Duration::from_secs(5));

    client
        .launch_instance("sim:latest", 8080, 5900)
        .await
        .expect("run");

    let runs = state.runs.lock().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].host_port, 8080);
    assert_eq!(runs[0].container_port, 5900);
}

#[tokio::test]
async fn empty_error_body_reports_status() {
    let (base_url, _state) = spawn_backend(false).await;
    let client = HttpProvisioningClient::new(base_url, Duration::from_secs(5));

    let err = client
        .launch_instance("sim:latest", 1, 5900)
        .await
        .expect_err("must fail");
    let ProvisioningError::BackendFailure(message) = err else {
        panic!("unexpected error: {err:?}");
    };
    assert!(message.contains("500"), "unexpected message: {message}");
}

#[tokio::test]
async fn slow_backend_times_out() {
    let (base_url, _state) = spawn_backend(true).await;
    let client = HttpProvisioningClient::new(base_url, Duration::from_millis(50));

    let err = client.acquire_image("sim:latest").await.expect_err("must fail");
    assert_eq!(err, ProvisioningError::Timeout);
}

#[tokio::test]
async fn unreachable_backend_is_a_backend_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client = HttpProvisioningClient::new(format!("http://{addr}"), Duration::from_secs(5));

    let err = client.acquire_image("sim:latest").await.expect_err("must fail");
    assert!(matches!(err, ProvisioningError::BackendFailure(_)));
}
