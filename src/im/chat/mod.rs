//! 聊天模块

pub mod api;
pub mod listener;
pub mod message;
pub mod room;

pub use api::ChatApi;
pub use listener::{ChatRoomListener, EmptyChatRoomListener};
pub use message::{ChatMessage, Sender};
pub use room::{ChatContext, ChatRoom, FriendRequestStatus, RoomPhase};
