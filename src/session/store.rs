use crate::exchange::AttributeValue;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

/// Server-side session state.
#[derive(Debug)]
pub struct Session {
    id: String,
    creation_time: OffsetDateTime,
    /// Unix milliseconds.
    last_accessed: AtomicI64,
    valid: AtomicBool,
    attributes: DashMap<String, AttributeValue>,
}

fn unix_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            creation_time: now,
            last_accessed: AtomicI64::new(unix_millis(now)),
            valid: AtomicBool::new(true),
            attributes: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn creation_time(&self) -> OffsetDateTime {
        self.creation_time
    }

    pub fn last_accessed(&self) -> OffsetDateTime {
        let ms = self.last_accessed.load(Ordering::Relaxed);
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
            .unwrap_or(self.creation_time)
    }

    pub fn touch(&self) {
        self.last_accessed
            .store(unix_millis(OffsetDateTime::now_utc()), Ordering::Relaxed);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.attributes.clear();
    }

    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.get(name).map(|v| v.value().clone())
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(name.into(), value);
    }

    pub fn remove_attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name).map(|(_, v)| v)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.iter().map(|e| e.key().clone()).collect()
    }
}

/// Session lookup and creation, shared across exchange threads.
pub trait SessionStore: Send + Sync {
    /// A valid session with this id.
    fn find(&self, id: &str) -> Option<Arc<Session>>;

    fn create(&self) -> Arc<Session>;

    fn invalidate(&self, id: &str);
}

const SESSION_ID_BYTES: usize = 24;

/// Sessions kept in a concurrent map for the life of the process.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Arc<Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Register a session under a caller-chosen id.
    pub fn insert(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        session
    }

    /// 24 bytes from the operating system's CSPRNG, base64url encoded.
    fn generate_id(&self) -> String {
        let mut raw = [0u8; SESSION_ID_BYTES];
        OsRng.fill_bytes(&mut raw);
        URL_SAFE_NO_PAD.encode(raw)
    }
}

impl SessionStore for InMemorySessionStore {
    fn find(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .filter(|s| s.is_valid())
    }

    fn create(&self) -> Arc<Session> {
        loop {
            let id = self.generate_id();
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                let session = Arc::new(Session::new(id));
                slot.insert(Arc::clone(&session));
                tracing::debug!(session_id = %session.id(), "session created");
                return session;
            }
        }
    }

    fn invalidate(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_find() {
        let store = InMemorySessionStore::new();
        let session = store.create();
        assert!(session.is_valid());
        let found = store.find(session.id()).unwrap();
        assert!(Arc::ptr_eq(&session, &found));
        assert!(store.find("missing").is_none());
    }

    #[test]
    fn test_ids_unique() {
        let store = InMemorySessionStore::new();
        let a = store.create();
        let b = store.create();
        assert_ne!(a.id(), b.id());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_ids_are_random_and_url_safe() {
        let store = InMemorySessionStore::new();
        let ids: Vec<String> = (0..64).map(|_| store.create().id().to_string()).collect();
        for id in &ids {
            let raw = URL_SAFE_NO_PAD.decode(id).unwrap();
            assert_eq!(raw.len(), SESSION_ID_BYTES);
            assert!(id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        }
        let distinct: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(distinct.len(), ids.len());
        // Consecutive ids share no common prefix beyond chance.
        assert_ne!(&ids[0][..8], &ids[1][..8]);
    }

    #[test]
    fn test_invalidate() {
        let store = InMemorySessionStore::new();
        let session = store.create();
        session.set_attribute("user", Arc::new(7u32));
        store.invalidate(session.id());
        assert!(!session.is_valid());
        assert!(session.attribute("user").is_none());
        assert!(store.find(session.id()).is_none());
    }

    #[test]
    fn test_attributes() {
        let session = Session::new("S1");
        session.set_attribute("n", Arc::new(1i32));
        let value = session.attribute("n").unwrap();
        assert_eq!(value.downcast_ref::<i32>(), Some(&1));
        assert_eq!(session.attribute_names(), vec!["n".to_string()]);
        assert!(session.remove_attribute("n").is_some());
    }
}
