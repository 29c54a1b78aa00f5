//! Engine.IO v4 / Socket.IO v5 文本帧编解码
//!
//! 只实现 WebSocket 传输下默认命名空间用到的帧：
//! `0{open}` `1` `2` `3` `6` 以及 Socket.IO 的 `40` `41` `42[...]` `44{...}`。

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// Engine.IO 握手参数（服务器发送的 open 帧）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// 服务器发送 ping 的间隔（毫秒）
    pub ping_interval: u64,
    /// 等待 ping 的超时（毫秒）
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

/// 解码后的帧
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Engine.IO open
    Open(OpenPayload),
    /// Engine.IO close
    Close,
    Ping,
    Pong,
    Noop,
    /// Socket.IO 命名空间连接（客户端发送时可带 auth，服务器确认时带 sid）
    Connect(Option<Value>),
    Disconnect,
    /// Socket.IO 事件：`42["name", arg...]`
    Event { name: String, args: Vec<Value> },
    /// 命名空间连接被拒绝
    ConnectError(String),
}

impl Packet {
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Packet::Event {
            name: name.into(),
            args,
        }
    }
}

/// 编码为文本帧
pub fn encode(packet: &Packet) -> Result<String> {
    let text = match packet {
        Packet::Open(_) => bail!("open 帧只能由服务器发送"),
        Packet::Close => "1".to_string(),
        Packet::Ping => "2".to_string(),
        Packet::Pong => "3".to_string(),
        Packet::Noop => "6".to_string(),
        Packet::Connect(None) => "40".to_string(),
        Packet::Connect(Some(auth)) => format!("40{}", serde_json::to_string(auth)?),
        Packet::Disconnect => "41".to_string(),
        Packet::Event { name, args } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            format!("42{}", serde_json::to_string(&Value::Array(items))?)
        }
        Packet::ConnectError(message) => {
            format!("44{}", serde_json::json!({ "message": message }))
        }
    };
    Ok(text)
}

/// 解码文本帧
pub fn decode(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let engine_type = chars.next().ok_or_else(|| anyhow!("空帧"))?;
    let rest = chars.as_str();

    match engine_type {
        '0' => {
            let open: OpenPayload =
                serde_json::from_str(rest).context("解析 open 帧失败")?;
            Ok(Packet::Open(open))
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket_packet(rest),
        '6' => Ok(Packet::Noop),
        other => bail!("未知的 Engine.IO 帧类型: {other}"),
    }
}

fn decode_socket_packet(text: &str) -> Result<Packet> {
    let mut chars = text.chars();
    let socket_type = chars.next().ok_or_else(|| anyhow!("缺少 Socket.IO 帧类型"))?;
    let payload = strip_ack_id(strip_namespace(chars.as_str()));

    match socket_type {
        '0' => {
            if payload.trim().is_empty() {
                Ok(Packet::Connect(None))
            } else {
                Ok(Packet::Connect(Some(
                    serde_json::from_str(payload).context("解析 connect 帧失败")?,
                )))
            }
        }
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let items: Vec<Value> =
                serde_json::from_str(payload).context("解析 event 帧失败")?;
            let mut items = items.into_iter();
            let name = match items.next() {
                Some(Value::String(name)) => name,
                _ => bail!("event 帧缺少事件名"),
            };
            Ok(Packet::Event {
                name,
                args: items.collect(),
            })
        }
        '4' => {
            let message = serde_json::from_str::<Value>(payload)
                .ok()
                .and_then(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Object(map) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    _ => None,
                })
                .unwrap_or_else(|| payload.to_string());
            Ok(Packet::ConnectError(message))
        }
        // ack 帧对本客户端没有意义，当作 noop
        '3' => Ok(Packet::Noop),
        '5' | '6' => bail!("不支持二进制 Socket.IO 帧"),
        other => bail!("未知的 Socket.IO 帧类型: {other}"),
    }
}

/// 去掉 `/namespace,` 前缀
fn strip_namespace(text: &str) -> &str {
    if text.starts_with('/') {
        match text.find(',') {
            Some(idx) => &text[idx + 1..],
            None => "",
        }
    } else {
        text
    }
}

/// 去掉 payload 前的 ack id 数字
fn strip_ack_id(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_ascii_digit())
}
