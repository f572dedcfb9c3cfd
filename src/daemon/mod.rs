// Daemon module - Integration with the service manager: PID file and readiness notifications

pub mod notify;
pub mod pid;

pub use notify::{notify, sd_notify};
pub use pid::PidFile;
