mod file_scanner;
mod memory_monitor;
mod path_validator;
mod worker_pool;

pub use file_scanner::{is_tiff_path, scan_tiff_files};
pub use memory_monitor::{MemoryMonitor, MemorySnapshot};
pub use path_validator::{ensure_directory_exists, thumbnail_directory, validate_directory_exists};
pub use worker_pool::{TaskHandle, WorkerPool};
