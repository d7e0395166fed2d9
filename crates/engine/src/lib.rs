pub mod cooldown;
pub mod crawl;
pub mod pool;
pub mod wal;

pub use crawl::{crawl_target, CrawlDeps};
pub use pool::{shard_states, WorkerPool, WorkerSnapshot};
pub use wal::{WalEvent, WorkerWal};
