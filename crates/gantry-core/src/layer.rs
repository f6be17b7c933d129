//! Configuration layers.
//!
//! A stack document can be tagged as a datacenter, cluster or zone layer.
//! Layers compose strictly datacenter ← cluster ← zone ← stack; a document
//! may only absorb overrides from a layer at the same or a lower level.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Layer tag of a stack document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Zone,
    Cluster,
    Datacenter,
    /// A plain runnable stack, the most specific layer.
    #[default]
    Stack,
}

impl Layer {
    /// Numeric level; merging requires parent-level ≥ child-level.
    pub fn level(&self) -> u8 {
        match self {
            Layer::Zone => 0,
            Layer::Cluster => 1,
            Layer::Datacenter => 2,
            Layer::Stack => 3,
        }
    }

    /// Parse the layer name used by the create-layer API.
    pub fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "zone" => Ok(Layer::Zone),
            "cluster" => Ok(Layer::Cluster),
            "datacenter" => Ok(Layer::Datacenter),
            other => Err(CoreError::InvalidLayer(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order_datacenter_down_to_zone() {
        assert!(Layer::Datacenter.level() > Layer::Cluster.level());
        assert!(Layer::Cluster.level() > Layer::Zone.level());
        assert!(Layer::Stack.level() > Layer::Datacenter.level());
    }

    #[test]
    fn from_name_accepts_layer_names_only() {
        assert_eq!(Layer::from_name("zone").unwrap(), Layer::Zone);
        assert_eq!(Layer::from_name("cluster").unwrap(), Layer::Cluster);
        assert_eq!(Layer::from_name("datacenter").unwrap(), Layer::Datacenter);
        assert!(Layer::from_name("stack").is_err());
        assert!(Layer::from_name("region").is_err());
    }
}
