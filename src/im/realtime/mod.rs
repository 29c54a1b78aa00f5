//! 实时通道：Socket.IO 协议编解码、单条连接以及进程内事件总线

pub mod bus;
pub mod codec;
pub mod connection;
pub mod events;

pub use bus::{EventBus, RoomLease, RoomRegistry};
pub use connection::{RealtimeConnection, RealtimeSink};
pub use events::{ClientEvent, OutgoingMessage, ServerEvent};
