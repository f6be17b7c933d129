//! Resource offers from the cluster manager.
//!
//! An offer describes what a single worker has available right now: scalar
//! resources (`cpus`, `mem`, ...) and textual attributes. Offers are decided
//! exactly once — either a task is launched on them or they are declined.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A resource offer for one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub id: String,
    pub hostname: String,
    /// Scalar resources by name, e.g. `cpus`, `mem`, `disk`.
    #[serde(default)]
    pub resources: HashMap<String, f64>,
    /// Textual worker attributes by name.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Offer {
    /// Scalar resource amount, zero if the resource is absent.
    pub fn scalar(&self, name: &str) -> f64 {
        self.resources.get(name).copied().unwrap_or(0.0)
    }

    /// The offer's attribute map with the synthetic `hostname` attribute
    /// always present.
    pub fn attribute_map(&self) -> HashMap<String, String> {
        let mut attributes = HashMap::with_capacity(self.attributes.len() + 1);
        attributes.insert("hostname".to_string(), self.hostname.clone());
        for (name, value) in &self.attributes {
            if !value.is_empty() {
                attributes.insert(name.clone(), value.clone());
            }
        }

        attributes
    }
}
