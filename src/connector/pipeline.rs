use crate::base::neterror::NetError;
use crate::http::facade::{RequestFacade, ResponseFacade};

/// The handler chain an exchange is dispatched to.
///
/// Returning an error does not skip completion; the adapter logs it and,
/// when the response is still uncommitted, answers with the error's status.
pub trait Pipeline: Send + Sync {
    fn invoke(&self, request: &RequestFacade, response: &ResponseFacade) -> Result<(), NetError>;
}

impl<F> Pipeline for F
where
    F: Fn(&RequestFacade, &ResponseFacade) -> Result<(), NetError> + Send + Sync,
{
    fn invoke(&self, request: &RequestFacade, response: &ResponseFacade) -> Result<(), NetError> {
        self(request, response)
    }
}
