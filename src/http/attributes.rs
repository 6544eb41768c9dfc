use crate::exchange::AttributeValue;
use std::collections::HashMap;

/// Request-scoped attributes. Values are shared, never owned, by the map.
#[derive(Debug, Default)]
pub struct Attributes {
    entries: HashMap<String, AttributeValue>,
}

impl Attributes {
    pub fn get(&self, name: &str) -> Option<AttributeValue> {
        self.entries.get(name).cloned()
    }

    pub fn set(&mut self, name: &str, value: AttributeValue) {
        self.entries.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
