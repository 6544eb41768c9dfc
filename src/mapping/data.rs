use super::{Context, Host, Target};
use std::sync::Arc;

/// Result of mapping one request.
#[derive(Debug, Default, Clone)]
pub struct MappingData {
    pub host: Option<Arc<Host>>,
    pub context: Option<Arc<Context>>,
    pub target: Option<Arc<Target>>,
    pub context_path: String,
    pub servlet_path: String,
    pub path_info: Option<String>,
    /// Set when the client must be redirected instead of dispatched.
    pub redirect_path: Option<String>,
}

impl MappingData {
    pub fn recycle(&mut self) {
        self.host = None;
        self.context = None;
        self.target = None;
        self.context_path.clear();
        self.servlet_path.clear();
        self.path_info = None;
        self.redirect_path = None;
    }
}
