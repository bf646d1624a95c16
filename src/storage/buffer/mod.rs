pub mod error;
pub mod lru_k_replacer;
pub mod manager;
pub mod page_guard;

pub use error::BufferPoolError;
pub use lru_k_replacer::LruKReplacer;
pub use manager::BufferPoolManager;
pub use page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
