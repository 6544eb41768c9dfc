pub mod attributes;
pub mod facade;
pub mod httpdate;
pub mod locale;
pub mod parameters;
pub mod request;
pub mod response;

// Re-exports for convenience
pub use facade::{RequestFacade, ResponseFacade};
pub use parameters::ParameterMap;
pub use request::Request;
pub use response::Response;

/// Which body interface an exchange has committed to.
///
/// Requests use `Stream` for the byte stream and `Chars` for the reader;
/// responses use `Stream` for the output stream and `Chars` for the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyAccess {
    #[default]
    None,
    Stream,
    Chars,
}
