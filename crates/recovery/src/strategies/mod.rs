mod hardware;
mod oom;

pub use hardware::HardwareStrategy;
pub use oom::OomStrategy;
