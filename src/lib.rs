// Library exports for the foreman lifecycle orchestrator

pub mod cli;
pub mod component;
pub mod config;
pub mod daemon;
pub mod demo;
pub mod error;
pub mod logging;
pub mod registry;
pub mod reload;
pub mod retry;
pub mod runtime;

pub use component::{Cron, Job, OrderedServer, Server, Shutdown, StopMode};
pub use error::{ForemanError, Result};
pub use runtime::{Foreman, ForemanBuilder, LifecycleState};
