//! ConnectSphere CLI 客户端（测试版）
//!
//! 非交互式 CLI，用于测试和展示实时功能
//! 启动时通过命令行参数指定账号，自动登录连接，只展示接收到的事件

use anyhow::Result;
use clap::Parser;
use connectsphere_sdk_core_rust::im::chat::{ChatMessage, ChatRoomListener, RoomPhase};
use connectsphere_sdk_core_rust::im::client::{ClientConfig, ConnectSphereClient};
use connectsphere_sdk_core_rust::im::friend::{Friend, FriendListener, FriendRequest};
use connectsphere_sdk_core_rust::im::notification::{Notification, NotificationListener};
use connectsphere_sdk_core_rust::im::presence::PresenceListener;
use connectsphere_sdk_core_rust::im::types::Participant;
use connectsphere_sdk_core_rust::{LoginForm, SessionState};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// ConnectSphere CLI 客户端
#[derive(Parser, Debug)]
#[command(name = "connectsphere-cli")]
#[command(about = "ConnectSphere CLI 客户端 - 用于测试和展示实时功能", long_about = None)]
struct Args {
    /// 登录邮箱
    #[arg(short, long)]
    email: String,

    /// 登录密码
    #[arg(short, long)]
    password: String,

    /// 启动后打开的聊天 ID
    #[arg(short, long)]
    chat: Option<String>,

    /// 打开聊天后发送的一条消息
    #[arg(short, long, requires = "chat")]
    send: Option<String>,

    /// 运行时长（秒），0 表示持续运行
    #[arg(short, long, default_value = "0")]
    duration: u64,

    /// 日志级别（默认: info,connectsphere_sdk_core_rust=debug）
    #[arg(long, default_value = "info,connectsphere_sdk_core_rust=debug")]
    log_level: String,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 日志文件打不开时只输出到控制台
    let (log_file, open_error) = match OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
    {
        Ok(file) => (Some(file), None),
        Err(e) => (None, Some(e)),
    };

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = log_file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(file)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    match open_error {
        None => info!("[CLI] 📝 日志已同时输出到控制台和文件: debug.log"),
        Some(e) => warn!("[CLI] ⚠️ 无法创建日志文件 debug.log，仅输出到控制台: {}", e),
    }
}

/// 设置监听器（输出所有接收到的事件）
fn setup_listeners(client: &mut ConnectSphereClient) {
    // 在线状态监听器
    struct CliPresenceListener;
    #[async_trait::async_trait]
    impl PresenceListener for CliPresenceListener {
        async fn on_online_users_changed(&self, online_user_ids: Vec<String>) {
            info!(
                "[CLI/Presence] 🟢 在线用户（{} 人）: {:?}",
                online_user_ids.len(),
                online_user_ids
            );
        }
    }
    client.set_presence_listener(Arc::new(CliPresenceListener));

    // 通知监听器
    struct CliNotificationListener;
    #[async_trait::async_trait]
    impl NotificationListener for CliNotificationListener {
        async fn on_notifications_changed(
            &self,
            notifications: Vec<Notification>,
            unread_count: usize,
        ) {
            info!(
                "[CLI/Notification] 🔔 通知 {} 条，未读 {}",
                notifications.len(),
                unread_count
            );
            for n in notifications.iter().take(5) {
                info!(
                    "[CLI/Notification]   {} {}",
                    if n.is_read { " " } else { "•" },
                    n.summary()
                );
            }
        }
    }
    client.set_notification_listener(Arc::new(CliNotificationListener));

    // 好友监听器
    struct CliFriendListener;
    #[async_trait::async_trait]
    impl FriendListener for CliFriendListener {
        async fn on_friend_list_changed(&self, friends: Vec<Friend>) {
            info!("[CLI/Friend] 👥 好友列表变更（共 {} 个）", friends.len());
        }

        async fn on_friend_request_list_changed(&self, requests: Vec<FriendRequest>) {
            info!("[CLI/Friend] 📝 好友申请变更（共 {} 个）", requests.len());
        }
    }
    client.set_friend_listener(Arc::new(CliFriendListener));
}

/// 聊天室监听器，只打印最新一条消息
struct CliChatListener;

#[async_trait::async_trait]
impl ChatRoomListener for CliChatListener {
    async fn on_messages_changed(&self, chat_id: &str, messages: Vec<ChatMessage>) {
        if let Some(last) = messages.last() {
            let pending = if last.id.is_none() { "（发送中）" } else { "" };
            info!(
                "[CLI/Chat] 📨 {} | {}: {}{}",
                chat_id, last.sender.username, last.text, pending
            );
        }
    }

    async fn on_partner_changed(&self, chat_id: &str, partner: Option<Participant>) {
        if let Some(p) = partner {
            info!("[CLI/Chat] 🤝 {} 的聊天对象: {}", chat_id, p.username);
        }
    }

    async fn on_phase_changed(&self, chat_id: &str, phase: RoomPhase) {
        info!("[CLI/Chat] 🔄 {} 状态: {:?}", chat_id, phase);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    init_logger(&args.log_level);

    info!("[CLI] 🚀 ConnectSphere CLI 客户端（测试模式）");
    info!("[CLI] 📧 邮箱: {}", args.email);
    info!("[CLI] ⏱️  运行时长: {} 秒（0=持续运行）", args.duration);

    let config = ClientConfig::from_env();
    info!("[CLI] 🌐 服务器: {}", config.api_base_url);

    let mut client = ConnectSphereClient::new(config)?;
    setup_listeners(&mut client);

    // 已有有效会话时直接复用，否则登录
    match client.init().await {
        SessionState::Authenticated(user) => {
            info!("[CLI] ✅ 已登录: {}", user.username);
        }
        _ => {
            info!("[CLI] 🔐 正在登录...");
            let user = client
                .login(&LoginForm::new(args.email.clone(), args.password.clone()))
                .await
                .map_err(|e| anyhow::anyhow!("登录失败: {}", e))?;
            info!("[CLI] ✅ 登录成功！用户: {} ({})", user.username, user.id);
        }
    }

    if let Err(e) = client.friends().load().await {
        warn!("[CLI] ⚠️ 加载好友列表失败: {}", e);
    }
    info!("[CLI] 👥 好友列表（共 {} 个）", client.friends().snapshot().len());
    info!(
        "[CLI] 🔔 未读通知: {}",
        client.notifications().unread_count()
    );

    let room = match &args.chat {
        Some(chat_id) => {
            info!("[CLI] 💬 正在打开聊天: {}", chat_id);
            let room = client
                .open_chat_with_listener(chat_id, Arc::new(CliChatListener))
                .await
                .map_err(|e| anyhow::anyhow!("打开聊天失败: {}", e))?;
            info!("[CLI] 📜 历史消息 {} 条", room.messages().len());
            if let Some(text) = &args.send {
                if let Err(e) = room.send_text(text.clone()).await {
                    error!("[CLI] ❌ 发送失败: {}", e);
                }
            }
            Some(room)
        }
        None => None,
    };

    info!("[CLI] 📥 开始监听事件...");
    if args.duration > 0 {
        info!("[CLI] ⏰ {} 秒后自动退出", args.duration);
        sleep(Duration::from_secs(args.duration)).await;
    } else {
        info!("[CLI] ⏰ 持续运行中，按 Ctrl+C 退出");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[CLI] ❌ 监听 Ctrl+C 失败: {}", e);
        }
    }

    if let Some(room) = room {
        room.close().await;
    }
    if let Err(e) = client.logout().await {
        error!("[CLI] ❌ 登出失败: {}", e);
    }
    info!("[CLI] 👋 程序退出");

    Ok(())
}
