pub mod callback;
pub mod config;
pub mod memory;
pub mod server;

pub use callback::CallbackNotifier;
pub use config::{CallbackConfig, SchedulerConfig};
pub use memory::MemoryScheduler;
pub use server::serve;
