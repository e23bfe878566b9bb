// 远程文档存储模块

pub mod client;
pub mod store;
pub mod types;

pub use client::DriveClient;
pub use store::DocumentStore;
pub use types::*;
