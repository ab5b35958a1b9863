pub mod config;
pub mod labels;
pub mod storage_paths;

pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 8001;
pub const DEFAULT_CHUNK_TOKENS: usize = 3000;

pub use config::*;
pub use labels::*;
pub use storage_paths::*;
