/// Where an exchange is in the adapter's lifecycle.
///
/// `New -> Mapped -> Dispatched -> Finished`; a short-circuit (malformed
/// request, 404, 405, mapping redirect) goes straight from `New` or `Mapped`
/// to `Finished`. Recycling returns the slot to `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// Slot bound (or idle), nothing parsed yet.
    #[default]
    New,

    /// URI normalized, session phase run, host/context/target resolved.
    Mapped,

    /// Handed to the handler pipeline.
    Dispatched,

    /// Response completed; waiting for recycle.
    Finished,
}

impl ExchangeState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_advance_to(self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        matches!(
            (self, next),
            (New, Mapped)
                | (New, Finished)
                | (Mapped, Dispatched)
                | (Mapped, Finished)
                | (Dispatched, Finished)
                | (Finished, New)
        )
    }

    pub fn is_finished(self) -> bool {
        self == ExchangeState::Finished
    }
}
