pub mod environment;
pub mod table;

pub use environment::{BufferPoolConfig, EnvironmentConfig, SyncMode, MIN_MAP_SIZE};
pub use table::TableOptions;
