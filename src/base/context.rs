//! Ergonomic error context helpers.
//!
//! Converts transport IO failures into the matching `NetError` variant so
//! that a write failure is always reported as a client abort.

use crate::base::neterror::NetError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Treat the failure as the peer going away.
    ///
    /// # Example
    /// ```ignore
    /// use exchangenet::base::context::IoResultExt;
    ///
    /// exchange.write_body(&chunk).client_abort_context()?;
    /// // Error: "Client aborted (BrokenPipe): broken pipe"
    /// ```
    fn client_abort_context(self) -> Result<T, NetError>;

    /// Attach the name of the failing transport operation.
    fn transport_context(self, op: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn client_abort_context(self) -> Result<T, NetError> {
        self.map_err(|e| NetError::client_abort(&e))
    }

    fn transport_context(self, op: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::transport(format!("{op}: {e}")))
    }
}
