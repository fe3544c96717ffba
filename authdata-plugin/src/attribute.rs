use serde::{Deserialize, Serialize};

/// Value record returned by single-attribute get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    /// Whether the value came from verified authorization data.
    pub authenticated: bool,
    /// Whether the attribute is completely specified by this module.
    pub complete: bool,
    /// Raw attribute value.
    pub value: Vec<u8>,
    /// Human-readable rendering; empty when the module provides none.
    pub display_value: String,
    /// True when the module holds further values for the same attribute;
    /// callers re-issue the get to retrieve them.
    pub has_more: bool,
}

impl AttributeValue {
    /// A single, final value with no display form.
    pub fn plain(authenticated: bool, value: impl Into<Vec<u8>>) -> Self {
        Self {
            authenticated,
            complete: true,
            value: value.into(),
            display_value: String::new(),
            has_more: false,
        }
    }
}

/// Attribute-type names reported by one module, split by provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTypes {
    /// Attributes the client merely asserted.
    pub asserted: Vec<String>,
    /// Attributes backed by verified authorization data.
    pub verified: Vec<String>,
}
