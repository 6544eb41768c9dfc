//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): every failure this layer reports
//! - [`ExchangeState`](exchangestate::ExchangeState): adapter lifecycle states

pub mod context;
pub mod exchangestate;
pub mod neterror;
