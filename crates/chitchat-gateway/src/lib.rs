pub mod connection;
pub mod registry;

pub use connection::{HeartbeatConfig, LoopExit, handle_connection};
pub use registry::{OutboundConfig, OverflowPolicy, PushOutcome, Registry};
