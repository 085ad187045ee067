//! Tunables recognized by the dynamic list sources.

/// Configuration shared by every provider in a registry.
///
/// The token provider ignores `cache_chunk_size`; page sizes are decided
/// by the host.
#[derive(Clone, Debug)]
pub struct DynamicListConfiguration {
    /// Override for the source-type tag emitted on fetch requests.
    pub source_type: Option<String>,
    /// Number of items requested per proactive fetch.
    pub cache_chunk_size: i64,
    /// Distance from a cached edge at which a view hint triggers a fetch.
    pub list_update_buffer_size: i64,
    /// Retries after a timeout or an empty-items response.
    pub fetch_retries: u8,
    /// Deadline for a fetch response, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Lifetime of buffered out-of-order CRUD versions, in milliseconds.
    pub cache_expiry_timeout_ms: u64,
}

impl Default for DynamicListConfiguration {
    fn default() -> Self {
        Self {
            source_type: None,
            cache_chunk_size: 10,
            list_update_buffer_size: 5,
            fetch_retries: 2,
            fetch_timeout_ms: 5000,
            cache_expiry_timeout_ms: 5000,
        }
    }
}

impl DynamicListConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = Some(source_type.into());
        self
    }

    pub fn cache_chunk_size(mut self, size: i64) -> Self {
        self.cache_chunk_size = size.max(1);
        self
    }

    pub fn list_update_buffer_size(mut self, size: i64) -> Self {
        self.list_update_buffer_size = size.max(0);
        self
    }

    pub fn fetch_retries(mut self, retries: u8) -> Self {
        self.fetch_retries = retries;
        self
    }

    pub fn fetch_timeout_ms(mut self, timeout: u64) -> Self {
        self.fetch_timeout_ms = timeout;
        self
    }

    pub fn cache_expiry_timeout_ms(mut self, timeout: u64) -> Self {
        self.cache_expiry_timeout_ms = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DynamicListConfiguration::default();
        assert_eq!(config.cache_chunk_size, 10);
        assert_eq!(config.list_update_buffer_size, 5);
        assert_eq!(config.fetch_retries, 2);
        assert_eq!(config.fetch_timeout_ms, 5000);
        assert_eq!(config.cache_expiry_timeout_ms, 5000);
    }

    #[test]
    fn test_builder_chain() {
        let config = DynamicListConfiguration::new()
            .cache_chunk_size(5)
            .fetch_retries(1)
            .fetch_timeout_ms(100);
        assert_eq!(config.cache_chunk_size, 5);
        assert_eq!(config.fetch_retries, 1);
        assert_eq!(config.fetch_timeout_ms, 100);
    }

    #[test]
    fn test_chunk_size_floor() {
        let config = DynamicListConfiguration::new().cache_chunk_size(0);
        assert_eq!(config.cache_chunk_size, 1);
    }
}
