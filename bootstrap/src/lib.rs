//! relay-bootstrap - 统一启动骨架
//!
//! gateway 和 consumer 共用的启动逻辑

mod runtime;
mod shutdown;

pub use runtime::*;
pub use shutdown::*;
