pub mod adapter;
pub mod config;
pub mod pipeline;
pub mod pool;

pub use adapter::Adapter;
pub use config::ConnectorConfig;
pub use pipeline::Pipeline;
pub use pool::{ExchangeSlot, SlotId, SlotPool};
