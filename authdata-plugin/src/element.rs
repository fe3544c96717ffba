use serde::{Deserialize, Serialize};

/// Numeric authorization-data type tag.
pub type AdType = i32;

/// One decoded authorization-data element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdElement {
    pub ad_type: AdType,
    pub contents: Vec<u8>,
}

impl AdElement {
    pub fn new(ad_type: AdType, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            ad_type,
            contents: contents.into(),
        }
    }
}

/// The decoded element lists a caller hands to verification, one per
/// protocol source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthMaterial {
    /// Elements embedded in the ticket.
    pub ticket_elements: Vec<AdElement>,
    /// Elements embedded in the authenticator.
    pub authenticator_elements: Vec<AdElement>,
}

/// Collect every element of `ad_type` from the two sources, ticket first.
/// Returns `None` when neither source carries the type.
pub fn find_ad_elements(
    ticket: &[AdElement],
    authenticator: &[AdElement],
    ad_type: AdType,
) -> Option<Vec<AdElement>> {
    let mut found: Vec<AdElement> = ticket
        .iter()
        .filter(|e| e.ad_type == ad_type)
        .cloned()
        .collect();
    found.extend(
        authenticator
            .iter()
            .filter(|e| e.ad_type == ad_type)
            .cloned(),
    );
    if found.is_empty() { None } else { Some(found) }
}
