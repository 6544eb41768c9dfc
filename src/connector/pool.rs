use crate::base::exchangestate::ExchangeState;
use crate::buffer::CharsetCache;
use crate::connector::config::ConnectorConfig;
use crate::exchange::ExchangeRef;
use crate::http::facade::{RequestFacade, ResponseFacade};
use crate::http::{Request, Response};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// One reusable Request/Response pair.
///
/// Both objects are allocated once and recycled between exchanges. They
/// point at each other weakly so that session creation can queue a cookie
/// and redirects can resolve against the request URL.
pub struct ExchangeSlot {
    request: Rc<RefCell<Request>>,
    response: Rc<RefCell<Response>>,
    facades: Option<(RequestFacade, ResponseFacade)>,
    state: ExchangeState,
    served: u64,
}

impl std::fmt::Debug for ExchangeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSlot")
            .field("state", &self.state)
            .field("bound", &self.facades.is_some())
            .field("served", &self.served)
            .finish()
    }
}

impl ExchangeSlot {
    pub fn new(config: Arc<ConnectorConfig>, charsets: Arc<CharsetCache>) -> Self {
        Self {
            request: Rc::new(RefCell::new(Request::new(Arc::clone(&config), Arc::clone(&charsets)))),
            response: Rc::new(RefCell::new(Response::new(config, charsets))),
            facades: None,
            state: ExchangeState::New,
            served: 0,
        }
    }

    /// Attach both objects to `exchange` and hand out fresh facades.
    pub fn bind(&mut self, exchange: ExchangeRef) {
        if self.facades.is_some() {
            tracing::debug!("slot re-bound without recycle");
            self.recycle();
        }
        self.request
            .borrow_mut()
            .bind(Rc::clone(&exchange), Rc::downgrade(&self.response));
        self.response
            .borrow_mut()
            .bind(exchange, Rc::downgrade(&self.request));
        self.facades = Some((
            RequestFacade::new(&self.request),
            ResponseFacade::new(&self.response),
        ));
        self.state = ExchangeState::New;
    }

    pub fn is_bound(&self) -> bool {
        self.facades.is_some()
    }

    pub fn request(&self) -> &Rc<RefCell<Request>> {
        &self.request
    }

    pub fn response(&self) -> &Rc<RefCell<Response>> {
        &self.response
    }

    pub fn facades(&self) -> Option<&(RequestFacade, ResponseFacade)> {
        self.facades.as_ref()
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Move to `next` if the transition is legal.
    pub fn advance(&mut self, next: ExchangeState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::debug!(from = ?self.state, to = ?next, "illegal exchange state transition");
            return false;
        }
        self.state = next;
        true
    }

    /// Exchanges completed by this slot.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Reset both objects for the next exchange. Does nothing when the slot
    /// is not bound, so a second call is harmless.
    pub fn recycle(&mut self) {
        if self.facades.take().is_none() {
            return;
        }
        self.request.borrow_mut().recycle();
        self.response.borrow_mut().recycle();
        self.state = ExchangeState::New;
        self.served += 1;
    }
}

/// Index of a slot in a [`SlotPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// Arena of exchange slots for one thread.
#[derive(Debug)]
pub struct SlotPool {
    slots: Vec<ExchangeSlot>,
    idle: Vec<usize>,
    config: Arc<ConnectorConfig>,
    charsets: Arc<CharsetCache>,
}

impl SlotPool {
    pub fn new(config: Arc<ConnectorConfig>, charsets: Arc<CharsetCache>) -> Self {
        Self {
            slots: Vec::new(),
            idle: Vec::new(),
            config,
            charsets,
        }
    }

    /// An idle slot, or a new one when all are busy.
    pub fn acquire(&mut self) -> SlotId {
        if let Some(index) = self.idle.pop() {
            return SlotId(index);
        }
        self.slots.push(ExchangeSlot::new(
            Arc::clone(&self.config),
            Arc::clone(&self.charsets),
        ));
        SlotId(self.slots.len() - 1)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut ExchangeSlot> {
        self.slots.get_mut(id.0)
    }

    pub fn get(&self, id: SlotId) -> Option<&ExchangeSlot> {
        self.slots.get(id.0)
    }

    /// Recycle the slot and make it available again.
    pub fn release(&mut self, id: SlotId) {
        let Some(slot) = self.slots.get_mut(id.0) else {
            return;
        };
        slot.recycle();
        if !self.idle.contains(&id.0) {
            self.idle.push(id.0);
        }
    }

    /// Slots allocated so far.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}
