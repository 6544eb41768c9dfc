//! Host, context and target resolution.
//!
//! A [`Mapper`] turns the host name and the normalized path into a
//! [`MappingData`]. [`StaticMapper`] is a fixed table built at startup.

pub mod data;
pub mod mapper;

pub use data::MappingData;
pub use mapper::StaticMapper;

use crate::base::neterror::NetError;
use crate::session::SessionStore;
use http::Method;
use std::sync::Arc;

/// Methods a target supports when it declares none.
pub static DEFAULT_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// Resolve the mapping for one request.
pub trait Mapper: Send + Sync {
    /// `host` is the `Host` header value (port allowed), `path` the decoded
    /// and normalized request path without path parameters.
    fn map(&self, host: &str, path: &str, data: &mut MappingData) -> Result<(), NetError>;
}

/// How a target matches the context-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `/exact/path`
    Exact(String),
    /// `/prefix/*`, stored without the `/*`.
    Prefix(String),
    /// `*.ext`, stored without the `*.`.
    Extension(String),
    /// `/`
    Default,
}

impl Pattern {
    pub fn parse(pattern: &str) -> Pattern {
        if pattern == "/" || pattern.is_empty() {
            Pattern::Default
        } else if let Some(prefix) = pattern.strip_suffix("/*") {
            Pattern::Prefix(prefix.to_string())
        } else if let Some(ext) = pattern.strip_prefix("*.") {
            Pattern::Extension(ext.to_string())
        } else {
            Pattern::Exact(pattern.to_string())
        }
    }
}

/// A named handler endpoint within a context.
#[derive(Debug, Clone)]
pub struct Target {
    name: String,
    pattern: Pattern,
    methods: Vec<Method>,
}

impl Target {
    pub fn new(name: impl Into<String>, pattern: &str) -> Self {
        Self {
            name: name.into(),
            pattern: Pattern::parse(pattern),
            methods: Vec::new(),
        }
    }

    /// Restrict the target to `methods`.
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Declared methods, or [`DEFAULT_METHODS`] when none were declared.
    pub fn methods(&self) -> &[Method] {
        if self.methods.is_empty() {
            &DEFAULT_METHODS
        } else {
            &self.methods
        }
    }

    /// True when the target was restricted with [`Target::with_methods`].
    pub fn has_declared_methods(&self) -> bool {
        !self.methods.is_empty()
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.methods().contains(method)
    }

    /// `Allow` header value: the supported methods other than `rejected`.
    pub fn allow_header(&self, rejected: &Method) -> String {
        self.methods()
            .iter()
            .filter(|m| *m != rejected)
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A web application rooted at a path prefix.
pub struct Context {
    path: String,
    targets: Vec<Arc<Target>>,
    store: Arc<dyn SessionStore>,
    cookies: bool,
    url_rewriting: bool,
    session_cookie_name: Option<String>,
    session_cookie_path: Option<String>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("path", &self.path)
            .field("targets", &self.targets)
            .field("cookies", &self.cookies)
            .field("url_rewriting", &self.url_rewriting)
            .field("session_cookie_name", &self.session_cookie_name)
            .finish()
    }
}

impl Context {
    /// `path` is `""` for the root context, otherwise `/name` without a
    /// trailing slash.
    pub fn new(path: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        let mut path = path.into();
        if path == "/" {
            path.clear();
        }
        Self {
            path,
            targets: Vec::new(),
            store,
            cookies: true,
            url_rewriting: true,
            session_cookie_name: None,
            session_cookie_path: None,
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(Arc::new(target));
        self
    }

    /// Whether the session id may travel in a cookie.
    pub fn with_cookies(mut self, enabled: bool) -> Self {
        self.cookies = enabled;
        self
    }

    /// Whether the session id may travel in the URL.
    pub fn with_url_rewriting(mut self, enabled: bool) -> Self {
        self.url_rewriting = enabled;
        self
    }

    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.session_cookie_name = Some(name.into());
        self
    }

    pub fn with_session_cookie_path(mut self, path: impl Into<String>) -> Self {
        self.session_cookie_path = Some(path.into());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn session_store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn cookies_enabled(&self) -> bool {
        self.cookies
    }

    pub fn url_rewriting_enabled(&self) -> bool {
        self.url_rewriting
    }

    /// The context's cookie name, else `default`.
    pub fn session_cookie_name<'a>(&'a self, default: &'a str) -> &'a str {
        self.session_cookie_name.as_deref().unwrap_or(default)
    }

    /// Path attribute for the session cookie.
    pub fn session_cookie_path(&self) -> &str {
        match self.session_cookie_path.as_deref() {
            Some(path) => path,
            None if self.path.is_empty() => "/",
            None => &self.path,
        }
    }
}

/// A virtual host and its contexts.
#[derive(Debug)]
pub struct Host {
    name: String,
    aliases: Vec<String>,
    contexts: Vec<Arc<Context>>,
}

impl Host {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            aliases: Vec::new(),
            contexts: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into().to_ascii_lowercase());
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.contexts.push(Arc::new(context));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contexts(&self) -> &[Arc<Context>] {
        &self.contexts
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}
