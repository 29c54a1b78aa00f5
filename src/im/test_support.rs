//! 测试用模拟后端：axum 提供 REST 路由和一个脚本化的 Socket.IO 端点

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::im::realtime::codec::{decode, Packet};

static INIT_LOGGER: Once = Once::new();

pub(crate) fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new(
            "info,connectsphere_sdk_core_rust=debug,hyper_util::client=info,reqwest=info",
        );
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// 绑定在随机端口上的模拟后端
pub(crate) struct MockBackend {
    pub base_url: String,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(app: Router) -> Self {
        init_test_logger();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}/"),
            handle,
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Clone, Debug)]
enum Control {
    Frame(String),
    DropAll,
}

struct MockSocketState {
    reject: Option<String>,
    echo: bool,
    joined: Mutex<Vec<String>>,
    sent: Mutex<Vec<Value>>,
    handshakes: AtomicUsize,
    control: broadcast::Sender<Control>,
}

/// 脚本化的 Socket.IO 服务端
#[derive(Clone)]
pub(crate) struct MockSocket {
    state: Arc<MockSocketState>,
}

impl MockSocket {
    /// 默认会把 sendMessage 以 receiveMessage（带 chatId）广播回去
    pub fn new() -> Self {
        Self::build(None, true)
    }

    /// 不回显 sendMessage
    pub fn silent() -> Self {
        Self::build(None, false)
    }

    /// 拒绝命名空间连接
    pub fn rejecting(message: &str) -> Self {
        Self::build(Some(message.to_string()), false)
    }

    fn build(reject: Option<String>, echo: bool) -> Self {
        let (control, _) = broadcast::channel(64);
        Self {
            state: Arc::new(MockSocketState {
                reject,
                echo,
                joined: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                handshakes: AtomicUsize::new(0),
                control,
            }),
        }
    }

    pub fn mount(&self, router: Router) -> Router {
        let socket = self.clone();
        router.route(
            "/socket.io/",
            get(move |ws: WebSocketUpgrade| {
                let socket = socket.clone();
                async move { ws.on_upgrade(move |ws| socket.serve(ws)) }
            }),
        )
    }

    /// 向所有已连接的客户端推送一个事件
    pub fn push_event(&self, name: &str, payload: Value) {
        let frame = format!("42{}", json!([name, payload]));
        let _ = self.state.control.send(Control::Frame(frame));
    }

    /// 断开所有连接（模拟网络中断）
    pub fn drop_all(&self) {
        let _ = self.state.control.send(Control::DropAll);
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        self.state.joined.lock().unwrap().clone()
    }

    pub fn sent_messages(&self) -> Vec<Value> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    async fn serve(self, mut ws: WebSocket) {
        let mut control = self.state.control.subscribe();
        let open = r#"0{"sid":"eio-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        if ws.send(Message::Text(open.into())).await.is_err() {
            return;
        }

        loop {
            match ws.recv().await {
                Some(Ok(Message::Text(text))) if text.as_str().starts_with("40") => break,
                Some(Ok(_)) => continue,
                _ => return,
            }
        }

        if let Some(reason) = &self.state.reject {
            let frame = format!("44{}", json!({ "message": reason }));
            let _ = ws.send(Message::Text(frame.into())).await;
            return;
        }
        self.state.handshakes.fetch_add(1, Ordering::SeqCst);
        if ws
            .send(Message::Text(r#"40{"sid":"mock-sid"}"#.into()))
            .await
            .is_err()
        {
            return;
        }

        loop {
            tokio::select! {
                msg = ws.recv() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_frame(text.as_str(), &mut ws).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                ctrl = control.recv() => match ctrl {
                    Ok(Control::Frame(frame)) => {
                        if ws.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Control::DropAll) | Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                },
            }
        }
    }

    /// 处理客户端帧，返回 false 表示连接应结束
    async fn handle_frame(&self, text: &str, ws: &mut WebSocket) -> bool {
        match decode(text) {
            Ok(Packet::Disconnect) | Ok(Packet::Close) => false,
            Ok(Packet::Event { name, args }) => {
                match name.as_str() {
                    "joinRoom" => {
                        if let Some(Value::String(chat_id)) = args.first() {
                            self.state.joined.lock().unwrap().push(chat_id.clone());
                        }
                    }
                    "sendMessage" => {
                        let payload = args.first().cloned().unwrap_or(Value::Null);
                        self.state.sent.lock().unwrap().push(payload.clone());
                        if self.state.echo {
                            let echoed = json!({
                                "chatId": payload["chatId"],
                                "sender": payload["messageData"]["sender"],
                                "text": payload["messageData"]["text"],
                            });
                            let frame = format!("42{}", json!(["receiveMessage", echoed]));
                            if ws.send(Message::Text(frame.into())).await.is_err() {
                                return false;
                            }
                        }
                    }
                    _ => {}
                }
                true
            }
            _ => true,
        }
    }
}
