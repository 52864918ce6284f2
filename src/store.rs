use hashbrown::HashMap as Map;

use crate::error::{KvError, Result};

/// Largest key accepted, in bytes.
pub const MAX_KEY_SIZE: usize = 256;

/// Largest value accepted, in bytes.
pub const MAX_VALUE_SIZE: usize = 256 * 1024;

pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        Err(KvError::InvalidKey)
    } else if key.len() > MAX_KEY_SIZE {
        Err(KvError::OversizedKey)
    } else {
        Ok(())
    }
}

pub fn check_value(value: &str) -> Result<()> {
    if value.is_empty() {
        Err(KvError::InvalidValue)
    } else if value.len() > MAX_VALUE_SIZE {
        Err(KvError::OversizedValue)
    } else {
        Ok(())
    }
}

/// In-memory key-value map backing one slave.
#[derive(Debug, Default)]
pub struct Store {
    map: Map<String, String>,
}

impl Store {
    pub fn get(&self, key: &str) -> Result<String> {
        check_key(key)?;
        self.map.get(key).cloned().ok_or(KvError::NoSuchKey)
    }

    pub fn put(&mut self, key: String, value: String) -> Result<()> {
        check_key(&key)?;
        check_value(&value)?;
        self.map.insert(key, value);
        Ok(())
    }

    pub fn del(&mut self, key: &str) -> Result<()> {
        check_key(key)?;
        self.map.remove(key).map(|_| ()).ok_or(KvError::NoSuchKey)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
