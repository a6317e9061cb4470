//! relay-ports - 抽象 trait 层
//!
//! 定义消息投递的领域类型和发布端口

mod delivery;
mod message_publisher;
mod record;

pub use delivery::*;
pub use message_publisher::*;
pub use record::*;
