// Demo module - Components run by the bundled binary

mod echo;
mod tasks;

pub use echo::EchoServer;
pub use tasks::{Heartbeat, SleepJob};
