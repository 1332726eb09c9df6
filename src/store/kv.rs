//! Config key-value storage alongside the memories, used for the tag
//! vocabulary and small operational settings.

use super::sql;
use crate::remote::Executor;
use crate::Result;

impl<E: Executor> super::MemoryStore<E> {
    /// Reads a config value, or `None` when the key is unset.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let rows = self.executor().exec(sql::config_get(key))?;
        rows.first()
            .map(|row| row.text("value").map(ToString::to_string))
            .transpose()
    }

    /// Writes a config value, overwriting any previous one.
    pub fn set_config(&self, key: &str, value: &str, category: &str) -> Result<()> {
        self.executor()
            .exec(sql::config_set(key, value, category))
            .map(|_| ())
    }

    /// Returns the running tag vocabulary accumulated by writes.
    pub fn tag_vocabulary(&self) -> Result<Vec<String>> {
        let Some(raw) = self.get_config("memory.tag_vocabulary")? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw)
            .map_err(|e| crate::Error::InvalidInput(format!("malformed tag vocabulary: {e}")))
    }
}
