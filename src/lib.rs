//! # exchangenet
//!
//! The request/response adaptation layer between an HTTP transport and a
//! handler pipeline.
//!
//! `exchangenet` takes one exchange from a transport, normalizes its URI,
//! works out which session the client asked for, maps it to a context and
//! target, and hands the handler a pair of facades backed by pooled
//! `Request`/`Response` objects. Whatever the handler does, the response is
//! completed and both objects are recycled for the next exchange.
//!
//! ## Features
//!
//! - **URI hygiene**: strict percent-decoding and dot-segment normalization
//! - **Session identity**: `;jsessionid=` path parameters and session cookies
//! - **Body channels**: byte or char access with charset conversion, pinned
//!   per exchange
//! - **Pooled objects**: request and response reused across exchanges
//! - **Fail-fast facades**: handles that error once their exchange is gone
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use exchangenet::connector::{Adapter, ConnectorConfig};
//! use exchangenet::exchange::mock::MockExchange;
//! use exchangenet::mapping::{Context, Host, StaticMapper, Target};
//! use exchangenet::session::InMemorySessionStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemorySessionStore::new());
//! let mapper = StaticMapper::new().with_host(
//!     Host::new("localhost").with_context(Context::new("/app", store).with_target(Target::new("page", "/*"))),
//! );
//! let adapter = Adapter::new(
//!     ConnectorConfig::default(),
//!     Arc::new(mapper),
//!     Arc::new(|_req: &_, res: &exchangenet::http::ResponseFacade| res.write_str("hello")),
//! )?;
//!
//! let mut slot = adapter.new_slot();
//! let exchange = MockExchange::get("/app/page").into_ref();
//! adapter.service(&mut slot, exchange.clone())?;
//! assert_eq!(exchange.borrow().written_text(), "hello");
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error type, IO error context and exchange states
//! - [`buffer`] - Dual-mode byte/char buffers and charset conversion
//! - [`channel`] - Request input and response output channels
//! - [`connector`] - Adapter, configuration and the slot pool
//! - [`cookies`] - Request cookie parsing and session cookies
//! - [`exchange`] - The transport-facing exchange trait
//! - [`http`] - Request, Response and their facades
//! - [`mapping`] - Host, context and target mapping
//! - [`session`] - Requested session id resolution and session stores
//! - [`uri`] - Percent-decoding and path normalization

pub mod base;
pub mod buffer;
pub mod channel;
pub mod connector;
pub mod cookies;
pub mod exchange;
pub mod http;
pub mod mapping;
pub mod session;
pub mod uri;
