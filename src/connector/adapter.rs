//! Drives one exchange from request line to recycle.
//!
//! ```text
//!   New ──session (URL), normalize, map──▶ Mapped ──cookies──▶ Dispatched
//!    │                                      │                      │
//!    └── 400 / OPTIONS * ──────┐            └── 404 / 405 / 302 ─┐ │
//!                              ▼                                 ▼ ▼
//!                           Finished ◀───────── complete + recycle ─┘
//! ```
//!
//! Completion runs from a drop guard, so the slot is recycled exactly once
//! on every exit, including a panicking handler.

use crate::base::exchangestate::ExchangeState;
use crate::base::neterror::NetError;
use crate::buffer::{Charset, CharsetCache};
use crate::connector::config::ConnectorConfig;
use crate::connector::pipeline::Pipeline;
use crate::connector::pool::{ExchangeSlot, SlotPool};
use crate::exchange::{Exchange, ExchangeRef};
use crate::http::Request;
use crate::mapping::{Mapper, Target, DEFAULT_METHODS};
use crate::session::strip_session_from_path;
use crate::uri;
use http::header::HOST;
use http::{Method, StatusCode};
use std::rc::Rc;
use std::sync::Arc;

enum Prepared {
    Dispatch,
    Done,
}

pub struct Adapter {
    config: Arc<ConnectorConfig>,
    mapper: Arc<dyn Mapper>,
    pipeline: Arc<dyn Pipeline>,
    charsets: Arc<CharsetCache>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("config", &self.config)
            .field("charsets_cached", &self.charsets.len())
            .finish()
    }
}

impl Adapter {
    pub fn new(
        config: ConnectorConfig,
        mapper: Arc<dyn Mapper>,
        pipeline: Arc<dyn Pipeline>,
    ) -> Result<Self, NetError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            mapper,
            pipeline,
            charsets: Arc::new(CharsetCache::new()),
        })
    }

    /// Share a charset cache with other adapters in the process.
    pub fn with_charsets(mut self, charsets: Arc<CharsetCache>) -> Self {
        self.charsets = charsets;
        self
    }

    pub fn config(&self) -> &Arc<ConnectorConfig> {
        &self.config
    }

    pub fn charsets(&self) -> &Arc<CharsetCache> {
        &self.charsets
    }

    pub fn new_slot(&self) -> ExchangeSlot {
        ExchangeSlot::new(Arc::clone(&self.config), Arc::clone(&self.charsets))
    }

    pub fn new_pool(&self) -> SlotPool {
        SlotPool::new(Arc::clone(&self.config), Arc::clone(&self.charsets))
    }

    /// Serve one exchange on `slot`.
    ///
    /// Malformed requests, unmapped paths, disallowed methods and mapping
    /// redirects are answered inline and return `Ok`. A handler error is
    /// returned after the response is completed and the slot recycled.
    pub fn service(&self, slot: &mut ExchangeSlot, exchange: ExchangeRef) -> Result<(), NetError> {
        slot.bind(Rc::clone(&exchange));
        let mut completion = Completion {
            slot,
            exchange,
            done: false,
        };

        let result = match self.prepare(completion.slot, &completion.exchange) {
            Ok(Prepared::Dispatch) => self.dispatch(completion.slot),
            Ok(Prepared::Done) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.report_failure(completion.slot, e);
        }
        completion.complete();
        result
    }

    fn prepare(&self, slot: &mut ExchangeSlot, exchange: &ExchangeRef) -> Result<Prepared, NetError> {
        let request_rc = Rc::clone(slot.request());
        let response_rc = Rc::clone(slot.response());

        let (method, raw) = {
            let mut request = request_rc.borrow_mut();
            self.connection_info(&mut request, &*exchange.borrow());
            (request.method().clone(), request.raw_uri().to_string())
        };
        tracing::debug!(method = %method, uri = %raw, "servicing exchange");

        if raw == "*" {
            let mut response = response_rc.borrow_mut();
            if method == Method::OPTIONS {
                let mut allow = joined(DEFAULT_METHODS.iter());
                if self.config.allow_trace {
                    allow.push_str(", TRACE");
                }
                response.set_header("allow", &allow)?;
            } else {
                response.send_error(StatusCode::BAD_REQUEST, None)?;
            }
            return Ok(Prepared::Done);
        }

        // Session marker and path parameters come off the raw path first so
        // that `..;x=1` is normalized as `..`.
        let mut raw_uri = raw;
        let mut path = raw_uri.as_bytes().to_vec();
        let session_id = strip_session_from_path(&mut path, &mut raw_uri, &self.config.session_path_param);
        let params = uri::strip_path_parameters(&mut path);

        if let Err(e) = uri::decode_normalize(&mut path, self.config.allow_encoded_slash) {
            if !e.is_malformed_request() {
                return Err(e);
            }
            tracing::debug!(uri = %raw_uri, error = %e, "rejecting malformed request URI");
            response_rc.borrow_mut().send_error(e.status_code(), None)?;
            return Ok(Prepared::Done);
        }

        let host = {
            let mut request = request_rc.borrow_mut();
            if let Some(id) = session_id {
                tracing::debug!(session_id = %id, "session id from URL");
                request.requested_session_mut().offer_url(id);
            }
            *request.raw_uri_mut() = raw_uri;
            request.set_path_parameters(params);

            let charset = self
                .charsets
                .resolve(&self.config.uri_encoding)
                .unwrap_or(Charset::Utf8);
            request.set_request_path(uri::to_text(&path, charset));
            *request.decoded_uri_mut() = path;

            request.server_name().to_string()
        };

        {
            let mut request = request_rc.borrow_mut();
            let path = request.request_path().to_string();
            self.mapper.map(&host, &path, request.mapping_mut())?;
        }
        let (context, target, redirect) = {
            let request = request_rc.borrow();
            let mapping = request.mapping();
            (mapping.context.clone(), mapping.target.clone(), mapping.redirect_path.clone())
        };
        let Some(context) = context else {
            let err = NetError::NotFound;
            tracing::debug!(host = %host, error = %err, "rejecting request");
            response_rc.borrow_mut().send_error(err.status_code(), None)?;
            return Ok(Prepared::Done);
        };
        slot.advance(ExchangeState::Mapped);

        if redirect.is_none() && !self.method_allowed(target.as_deref(), &method) {
            let allow = match target.as_deref() {
                Some(target) => target.allow_header(&method),
                None => joined(DEFAULT_METHODS.iter().filter(|m| **m != method)),
            };
            let mut response = response_rc.borrow_mut();
            response.set_header("allow", &allow)?;
            let err = NetError::MethodNotAllowed { allow };
            tracing::debug!(method = %method, error = %err, "rejecting request");
            response.send_error(err.status_code(), None)?;
            return Ok(Prepared::Done);
        }

        if let Some(path) = redirect {
            let location = {
                let request = request_rc.borrow();
                let mut location = path;
                let requested = request.requested_session();
                if let (true, Some(id)) = (requested.is_from_url(), requested.id()) {
                    location.push(';');
                    location.push_str(&self.config.session_path_param);
                    location.push('=');
                    location.push_str(id);
                }
                if let Some(query) = request.query_string() {
                    location.push('?');
                    location.push_str(query);
                }
                location
            };
            response_rc.borrow_mut().send_redirect(&location)?;
            return Ok(Prepared::Done);
        }

        {
            let mut request = request_rc.borrow_mut();
            if context.cookies_enabled() {
                let cookie_name = context.session_cookie_name(&self.config.session_cookie_name);
                let pairs: Vec<(String, String)> = request
                    .cookies()
                    .iter()
                    .map(|c| (c.name().to_string(), c.value().to_string()))
                    .collect();
                let store = context.session_store();
                request.requested_session_mut().apply_cookies(
                    pairs.iter().map(|(n, v)| (n.as_str(), v.as_str())),
                    cookie_name,
                    |id| store.find(id).is_some(),
                );
            }
            let requested = request.requested_session();
            tracing::debug!(
                session_id = ?requested.id(),
                source = ?requested.source(),
                "requested session resolved"
            );
        }

        if let Some(powered_by) = &self.config.x_powered_by {
            response_rc.borrow_mut().set_header("x-powered-by", powered_by)?;
        }

        slot.advance(ExchangeState::Dispatched);
        Ok(Prepared::Dispatch)
    }

    fn connection_info(&self, request: &mut Request, exchange: &dyn Exchange) {
        match exchange.scheme() {
            Some(scheme) => {
                request.set_scheme(scheme);
                request.set_secure(exchange.is_secure());
            }
            None => {
                request.set_scheme(&self.config.scheme);
                request.set_secure(self.config.secure);
            }
        }

        let host_header = exchange
            .request_headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(split_host);
        let (host_name, host_port) = match host_header {
            Some((name, port)) => (Some(name), port),
            None => (None, None),
        };

        let name = self
            .config
            .proxy_name
            .as_deref()
            .or(host_name)
            .or_else(|| exchange.local_name())
            .unwrap_or("localhost");
        request.set_server_name(name);

        let default_port = if request.scheme() == "https" { 443 } else { 80 };
        let port = self
            .config
            .proxy_port
            .or(host_port)
            .or_else(|| if host_name.is_some() { Some(default_port) } else { exchange.local_port() })
            .unwrap_or(default_port);
        request.set_server_port(port);
    }

    fn method_allowed(&self, target: Option<&Target>, method: &Method) -> bool {
        if *method == Method::TRACE {
            return self.config.allow_trace
                && target.map_or(true, |t| !t.has_declared_methods() || t.allows(method));
        }
        target.map_or(true, |t| t.allows(method))
    }

    fn dispatch(&self, slot: &mut ExchangeSlot) -> Result<(), NetError> {
        let Some((request, response)) = slot.facades().cloned() else {
            return Err(NetError::FacadeRecycled);
        };
        self.pipeline.invoke(&request, &response)
    }

    fn report_failure(&self, slot: &mut ExchangeSlot, err: &NetError) {
        if err.is_client_abort() {
            tracing::debug!(error = %err, "client went away during exchange");
            return;
        }
        tracing::error!(error = %err, "exchange failed");
        let Ok(mut response) = slot.response().try_borrow_mut() else {
            return;
        };
        if !response.is_committed() {
            if let Err(e) = response.send_error(err.status_code(), None) {
                tracing::debug!(error = %e, "could not send error status");
            }
        }
    }
}

/// Drop guard completing the response and recycling the slot.
struct Completion<'a> {
    slot: &'a mut ExchangeSlot,
    exchange: ExchangeRef,
    done: bool,
}

impl Completion<'_> {
    fn complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        if let Ok(mut response) = self.slot.response().try_borrow_mut() {
            if let Err(e) = response.finish() {
                log_completion_error("response", &e);
            }
        }
        if let Ok(mut request) = self.slot.request().try_borrow_mut() {
            request.finish();
        }
        if let Ok(mut exchange) = self.exchange.try_borrow_mut() {
            if let Err(e) = exchange.finish() {
                log_completion_error("exchange", &NetError::client_abort(&e));
            }
        }
        self.slot.advance(ExchangeState::Finished);
        self.slot.recycle();
    }
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.complete();
    }
}

fn log_completion_error(stage: &str, err: &NetError) {
    if err.is_client_abort() {
        tracing::debug!(stage, error = %err, "client went away before completion");
    } else {
        tracing::warn!(stage, error = %err, "completion failed");
    }
}

fn joined<'a>(methods: impl Iterator<Item = &'a Method>) -> String {
    methods.map(Method::as_str).collect::<Vec<_>>().join(", ")
}

/// Split a `Host` header into name and port.
fn split_host(host: &str) -> (&str, Option<u16>) {
    if host.starts_with('[') {
        if let Some(end) = host.find(']') {
            let port = host[end + 1..].strip_prefix(':').and_then(|p| p.parse().ok());
            return (&host[..=end], port);
        }
        return (host, None);
    }
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, Some(port)),
            Err(_) => (host, None),
        },
        None => (host, None),
    }
}
