// Reload module - Zero-downtime restart by handing listening sockets to a new process

mod fork;
mod inherit;
mod listener;

pub use fork::{ForkPlan, ForkProtocol};
pub use inherit::{inherited_listeners, is_forked_child, InheritedListener};
pub use listener::{ExportListener, ExportedListener};
pub(crate) use listener::socket_file_name;

/// Number of descriptors handed to the child
pub const ENV_LISTEN_FDS: &str = "LISTEN_FDS";

/// Colon-joined descriptor names, in descriptor order
pub const ENV_LISTEN_FDNAMES: &str = "LISTEN_FDNAMES";

/// Set to `1` in a child started by a reload
pub const ENV_FORK_CHILD: &str = "FORK_CHILD";

/// Argument telling the child to inherit listeners instead of binding
pub const RELOAD_FLAG: &str = "-r";

/// Long form of [`RELOAD_FLAG`] accepted by the CLI
pub const RELOAD_FLAG_LONG: &str = "--reload";

/// First descriptor number used for inherited listeners
pub const LISTEN_FDS_START: i32 = 3;
