//! Propagation of context data across process boundaries.
//!
//! Taggable entries of a context node are written into a single header value
//! on outbound calls and read back into a fresh root node on inbound calls.

mod wire;

pub use wire::{decode_pairs, encode_pairs};

use crate::config::CodecConfig;
use crate::context::{ContextNode, DataMap};
use std::collections::HashMap;

/// Header name used when none is configured.
pub const DEFAULT_HEADER_NAME: &str = "Correlation-Context";

/// Reads and writes the propagation header.
#[derive(Debug, Clone)]
pub struct PropagationCodec {
    header_name: String,
}

impl Default for PropagationCodec {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_NAME)
    }
}

impl PropagationCodec {
    /// Creates a codec for the given header name.
    #[must_use]
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }

    /// Creates a codec from configuration.
    #[must_use]
    pub fn from_config(config: &CodecConfig) -> Self {
        Self::new(config.header_name.clone())
    }

    /// Returns the header name.
    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Encodes the given entries. `None` when nothing is eligible.
    #[must_use]
    pub fn encode(&self, entries: &DataMap) -> Option<String> {
        encode_pairs(entries)
    }

    /// Decodes a header value, logging and dropping malformed pairs.
    #[must_use]
    pub fn decode(&self, header: &str) -> DataMap {
        let (data, warnings) = decode_pairs(header);
        for warning in &warnings {
            tracing::warn!(
                header = %self.header_name,
                segment = %warning.segment,
                reason = %warning.reason,
                "Dropped propagation pair"
            );
        }
        data
    }

    /// Builds the outbound headers for a node's taggable view.
    ///
    /// Empty when the node has no taggable scalar data.
    #[must_use]
    pub fn write_to_headers(&self, node: &ContextNode) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(value) = self.encode(&node.taggable_entries()) {
            headers.insert(self.header_name.clone(), value);
        }
        headers
    }

    /// Reads the propagation header (matched case-insensitively) into `node`.
    ///
    /// Call before activating the node so the data is inherited by nested
    /// calls. Returns the number of entries stored.
    pub fn read_from_headers(&self, headers: &HashMap<String, String>, node: &ContextNode) -> usize {
        let Some(header) = headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.header_name))
            .map(|(_, value)| value)
        else {
            return 0;
        };

        let data = self.decode(header);
        let count = data.len();
        for (key, value) in data {
            node.set_data(key, value);
        }
        tracing::debug!(node_id = node.id(), count, "Read propagated context data");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextValue, KeyPolicy, PropagationPolicy};
    use std::sync::Arc;

    fn policy() -> Arc<PropagationPolicy> {
        Arc::new(
            PropagationPolicy::new()
                .with_key("service", KeyPolicy::new().down().taggable())
                .with_key("pi", KeyPolicy::new().down().taggable())
                .with_key("secret", KeyPolicy::new().down()),
        )
    }

    #[test]
    fn test_outbound_headers_contain_taggable_keys_only() {
        let node = ContextNode::root(policy());
        node.set_data("service", "checkout");
        node.set_data("pi", 3.14);
        node.set_data("secret", "hunter2");
        node.activate().unwrap();

        let codec = PropagationCodec::default();
        let headers = codec.write_to_headers(&node);

        assert_eq!(
            headers.get("Correlation-Context"),
            Some(&"pi=3.14;type=d,service=checkout".to_string())
        );
        node.close().unwrap();
    }

    #[test]
    fn test_no_header_without_taggable_data() {
        let node = ContextNode::root(policy());
        node.set_data("secret", "hunter2");

        let headers = PropagationCodec::default().write_to_headers(&node);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_inbound_header_feeds_root_node() {
        let mut headers = HashMap::new();
        headers.insert(
            "correlation-context".to_string(),
            "service=checkout,pi=3.14;type=d,bad=x;type=i".to_string(),
        );

        let codec = PropagationCodec::default();
        let root = ContextNode::root(policy());
        assert_eq!(codec.read_from_headers(&headers, &root), 2);
        root.activate().unwrap();

        let child = ContextNode::child_of(&root);
        assert_eq!(child.get_data("service"), Some("checkout".into()));
        assert_eq!(child.get_data("pi"), Some(ContextValue::Double(3.14)));

        root.close().unwrap();
    }

    #[test]
    fn test_missing_header_reads_nothing() {
        let root = ContextNode::root(policy());
        let read = PropagationCodec::new("X-Custom").read_from_headers(&HashMap::new(), &root);
        assert_eq!(read, 0);
        assert!(root.entries().is_empty());
    }
}
