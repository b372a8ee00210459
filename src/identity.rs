use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The authenticated principal as reported by the CAS server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    /// CAS 2.0 `<cas:attributes>`; multi-valued attributes keep document order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
    /// IOU under which the CAS server delivered a proxy-granting ticket, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgt_iou: Option<String>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Identity {
            username: username.into(),
            attributes: BTreeMap::new(),
            pgt_iou: None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(|values| values.first()).map(String::as_str)
    }
}
