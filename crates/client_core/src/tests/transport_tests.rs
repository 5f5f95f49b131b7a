use super::*;
use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket},
        WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;

async fn greet_then_close(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let _ = socket
            .send(WsMessage::Text(
                r#"{"action":"start_simulation","scenario_id":"s1"}"#.to_string(),
            ))
            .await;
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: 1000,
                reason: "bye".into(),
            })))
            .await;
    })
}

async fn spawn_ws_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = Router::new().route("/ws/:identity", get(greet_then_close));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("ws://{addr}/ws/alice")
}

async fn recv(rx: &mut mpsc::Receiver<ChannelSignal>) -> ChannelSignal {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("signal in time")
        .expect("channel open")
}

#[tokio::test]
async fn delivers_messages_then_clean_close() {
    let url = Url::parse(&spawn_ws_server().await).expect("url");
    let mut rx = WebSocketConnector::default().open(&url);

    assert_eq!(recv(&mut rx).await, ChannelSignal::Connected);
    assert_eq!(
        recv(&mut rx).await,
        ChannelSignal::Message(r#"{"action":"start_simulation","scenario_id":"s1"}"#.into())
    );
    assert_eq!(
        recv(&mut rx).await,
        ChannelSignal::Closed {
            was_clean: true,
            code: 1000,
            reason: "bye".into(),
        }
    );
}

#[tokio::test]
async fn refused_connection_reports_error_then_unclean_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let url = Url::parse(&format!("ws://{addr}/ws/alice")).expect("url");
    let mut rx = WebSocketConnector::default().open(&url);

    let ChannelSignal::Error(err) = recv(&mut rx).await else {
        panic!("expected error signal");
    };
    assert_eq!(err.category, ErrorCategory::ConnectionRefused);
    let ChannelSignal::Closed {
        was_clean, code, ..
    } = recv(&mut rx).await
    else {
        panic!("expected close signal");
    };
    assert!(!was_clean);
    assert_eq!(code, ABNORMAL_CLOSURE);
    assert!(rx.recv().await.is_none());
}
