//! 핸들러 모듈

pub mod connection;
pub mod room;
pub mod wheel;

pub use connection::*;
pub use room::*;
pub use wheel::*;
