//! Control-plane wire types.
//!
//! Nodes join with `POST /nodes` and a JSON declaration, and leave with
//! `DELETE /nodes/{id}`. Declarations are validated in full before the
//! registry sees them, so a rejected body never changes routing state.

use serde::{Deserialize, Serialize};

use corelib::layer::LayerOptions;
use corelib::node::NodeId;

use crate::error::{BalancerError, Result};

/// Upper bound on `node_weight`; each unit adds a block of vnodes to every
/// ring the node joins.
pub const MAX_NODE_WEIGHT: u32 = 1000;

/// Body of `POST /nodes` as sent by a node.
#[derive(Debug, Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    listen_port: Option<u16>,
    #[serde(default)]
    node_weight: Option<u32>,
    #[serde(default)]
    layers: Vec<LayerDeclaration>,
}

#[derive(Debug, Deserialize)]
struct LayerDeclaration {
    name: String,
    #[serde(default)]
    options: Option<LayerOptions>,
}

/// A validated registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: NodeId,
    pub listen_port: u16,
    pub weight: u32,
    pub layers: Vec<(String, LayerOptions)>,
}

impl Registration {
    pub fn new(id: NodeId, listen_port: u16) -> Self {
        Self {
            id,
            listen_port,
            weight: 1,
            layers: Vec::new(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_layer(mut self, name: impl Into<String>, options: LayerOptions) -> Self {
        self.layers.push((name.into(), options));
        self
    }

    /// Parse and validate a `POST /nodes` body.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|_| BalancerError::Validation("Invalid JSON body".to_string()))?;
        if !value.is_object() {
            return Err(BalancerError::Validation("Invalid JSON body".to_string()));
        }
        let request: RegisterRequest = serde_json::from_value(value).map_err(|e| {
            BalancerError::Validation(format!("Invalid registration body ({})", e))
        })?;

        let id = match request.id {
            Some(id) if !id.is_empty() => NodeId::new(id)?,
            _ => {
                return Err(BalancerError::Validation(
                    "No \"id\" provided (unique instance id)".to_string(),
                ))
            }
        };
        let listen_port = match request.listen_port {
            Some(port) if port != 0 => port,
            _ => {
                return Err(BalancerError::Validation(
                    "No \"listen_port\" provided".to_string(),
                ))
            }
        };

        // 0 and absent both mean the default weight.
        let weight = match request.node_weight {
            None | Some(0) => 1,
            Some(w) if w <= MAX_NODE_WEIGHT => w,
            Some(w) => {
                return Err(BalancerError::Validation(format!(
                    "\"node_weight\" {} exceeds {}",
                    w, MAX_NODE_WEIGHT
                )))
            }
        };

        let mut layers = Vec::with_capacity(request.layers.len());
        for layer in request.layers {
            if layer.name.is_empty() {
                return Err(BalancerError::Validation(
                    "Layer declared without a name".to_string(),
                ));
            }
            let options = layer.options.unwrap_or_default();
            options.validate()?;
            layers.push((layer.name, options));
        }

        Ok(Self {
            id,
            listen_port,
            weight,
            layers,
        })
    }
}

/// Body returned to a node on successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Secret the node should expect on incoming health probes.
    pub token: String,
    /// Probe cadence in milliseconds.
    pub check_interval: u64,
}
