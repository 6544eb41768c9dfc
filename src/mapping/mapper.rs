use super::{Context, Host, Mapper, MappingData, Pattern, Target};
use crate::base::neterror::NetError;
use std::sync::Arc;

/// Fixed mapping table.
///
/// Host by name or alias (falling back to the default host), context by
/// longest path prefix, target by exact match, then longest `/x/*` prefix,
/// then `*.ext`, then `/`.
#[derive(Debug, Default)]
pub struct StaticMapper {
    hosts: Vec<Arc<Host>>,
    default_host: Option<String>,
}

impl StaticMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first host added becomes the default unless one is set.
    pub fn with_host(mut self, host: Host) -> Self {
        if self.default_host.is_none() {
            self.default_host = Some(host.name().to_string());
        }
        self.hosts.push(Arc::new(host));
        self
    }

    pub fn with_default_host(mut self, name: impl Into<String>) -> Self {
        self.default_host = Some(name.into());
        self
    }

    fn find_host(&self, header: &str) -> Option<&Arc<Host>> {
        let name = strip_port(header);
        self.hosts.iter().find(|h| h.matches(name)).or_else(|| {
            let default = self.default_host.as_deref()?;
            self.hosts.iter().find(|h| h.matches(default))
        })
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

fn find_context<'a>(host: &'a Host, path: &str) -> Option<&'a Arc<Context>> {
    host.contexts()
        .iter()
        .filter(|c| {
            let prefix = c.path();
            prefix.is_empty()
                || path == prefix
                || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
        })
        .max_by_key(|c| c.path().len())
}

fn find_target(context: &Context, rel: &str, data: &mut MappingData) {
    let targets = context.targets();

    if let Some(t) = targets
        .iter()
        .find(|t| matches!(t.pattern(), Pattern::Exact(p) if p == rel))
    {
        set_target(data, t, rel, None);
        return;
    }

    let prefix = targets
        .iter()
        .filter_map(|t| match t.pattern() {
            Pattern::Prefix(p)
                if rel == p
                    || (rel.starts_with(p.as_str()) && rel.as_bytes().get(p.len()) == Some(&b'/')) =>
            {
                Some((t, p.len()))
            }
            _ => None,
        })
        .max_by_key(|(_, len)| *len);
    if let Some((t, len)) = prefix {
        let info = &rel[len..];
        let info = (!info.is_empty()).then(|| info.to_string());
        set_target(data, t, &rel[..len], info);
        return;
    }

    let last_segment = rel.rsplit('/').next().unwrap_or(rel);
    if let Some((_, ext)) = last_segment.rsplit_once('.') {
        if let Some(t) = targets
            .iter()
            .find(|t| matches!(t.pattern(), Pattern::Extension(e) if e == ext))
        {
            set_target(data, t, rel, None);
            return;
        }
    }

    if let Some(t) = targets.iter().find(|t| *t.pattern() == Pattern::Default) {
        set_target(data, t, rel, None);
    }
}

fn set_target(data: &mut MappingData, target: &Arc<Target>, servlet_path: &str, path_info: Option<String>) {
    data.target = Some(Arc::clone(target));
    data.servlet_path = servlet_path.to_string();
    data.path_info = path_info;
}

impl Mapper for StaticMapper {
    fn map(&self, host: &str, path: &str, data: &mut MappingData) -> Result<(), NetError> {
        let Some(found) = self.find_host(host) else {
            return Ok(());
        };
        data.host = Some(Arc::clone(found));

        let Some(context) = find_context(found, path) else {
            return Ok(());
        };
        data.context = Some(Arc::clone(context));
        data.context_path = context.path().to_string();

        if !context.path().is_empty() && path == context.path() {
            data.redirect_path = Some(format!("{path}/"));
            return Ok(());
        }

        let rel = &path[context.path().len()..];
        find_target(context, rel, data);
        tracing::debug!(
            host = %found.name(),
            context = %data.context_path,
            servlet = ?data.target.as_ref().map(|t| t.name()),
            "request mapped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;

    fn mapper() -> StaticMapper {
        let store = Arc::new(InMemorySessionStore::new());
        let app = Context::new("/app", store.clone())
            .with_target(Target::new("login", "/login"))
            .with_target(Target::new("api", "/api/*"))
            .with_target(Target::new("api-v2", "/api/v2/*"))
            .with_target(Target::new("jsp", "*.jsp"))
            .with_target(Target::new("default", "/"));
        let root = Context::new("", store).with_target(Target::new("root", "/"));
        StaticMapper::new().with_host(
            Host::new("localhost")
                .with_alias("127.0.0.1")
                .with_context(app)
                .with_context(root),
        )
    }

    fn map(host: &str, path: &str) -> MappingData {
        let mut data = MappingData::default();
        mapper().map(host, path, &mut data).unwrap();
        data
    }

    fn target(data: &MappingData) -> &str {
        data.target.as_ref().map(|t| t.name()).unwrap_or("")
    }

    #[test]
    fn test_target_precedence() {
        let data = map("localhost", "/app/login");
        assert_eq!(target(&data), "login");
        assert_eq!(data.context_path, "/app");
        assert_eq!(data.servlet_path, "/login");

        let data = map("localhost:8080", "/app/api/v2/users");
        assert_eq!(target(&data), "api-v2");
        assert_eq!(data.servlet_path, "/api/v2");
        assert_eq!(data.path_info.as_deref(), Some("/users"));

        assert_eq!(target(&map("localhost", "/app/page.jsp")), "jsp");
        assert_eq!(target(&map("localhost", "/app/other")), "default");
    }

    #[test]
    fn test_context_prefix_is_segment_aligned() {
        let data = map("localhost", "/apple");
        assert_eq!(data.context_path, "");
        assert_eq!(target(&data), "root");
    }

    #[test]
    fn test_context_root_redirect() {
        let data = map("localhost", "/app");
        assert_eq!(data.redirect_path.as_deref(), Some("/app/"));
        assert!(data.target.is_none());
    }

    #[test]
    fn test_unknown_host_uses_default() {
        let data = map("example.org", "/app/login");
        assert_eq!(data.host.as_ref().map(|h| h.name()), Some("localhost"));
        assert_eq!(target(&map("127.0.0.1", "/x")), "root");
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("host:80"), "host");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
        assert_eq!(strip_port("host"), "host");
    }
}
