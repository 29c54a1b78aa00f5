//! 好友模块：好友列表、好友申请

pub mod api;
pub mod listener;
pub mod store;
pub mod types;

// 重新导出主要类型
pub use api::FriendApi;
pub use listener::{EmptyFriendListener, FriendListener};
pub use store::{FriendList, FriendRequestStore};
pub use types::{Friend, FriendRequest, FriendRequestState};
