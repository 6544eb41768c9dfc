//! Body channels between the transport and the request/response objects.
//!
//! - [`InputChannel`]: pulls the request body on demand
//! - [`OutputChannel`]: stages the response body and computes its length

pub mod input;
pub mod output;

pub use input::InputChannel;
pub use output::OutputChannel;
