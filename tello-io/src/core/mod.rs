//! Core abstractions shared by the control and video channels.
//!
//! - [`fault::FaultHandler`]: Where background loops escalate unrecoverable errors
//! - [`types`]: Frames, acknowledgements, session state and shutdown reasons
//! - [`worker`]: Named thread spawning and bounded joins

pub mod fault;
pub mod types;
pub mod worker;
