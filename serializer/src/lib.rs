pub mod classify;
pub mod infer;
pub mod network;
pub mod serial;

pub use classify::{Classification, classify};
pub use infer::{Inference, infer_agent_type};
pub use network::{NetworkAnalysis, analyse, compile_network};
pub use serial::{SerialOptions, add_noop_action, compile_serial, compile_serial_instance};
