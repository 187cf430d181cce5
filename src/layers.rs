//! Named collision layers and the pairwise rule matrix.
//!
//! Each layer owns one `u64` row holding a 2-bit [`LayerRule`] per peer
//! layer, so a pair lookup is one shift and mask. Rows start all-ones
//! (`Always`). Layer 0 is `"default"` and always collides with everything.

use crate::PhysicsError;
use crate::types::{LayerId, LayerRule};

/// Hard cap on distinct layer names, including `"default"`.
pub const MAX_LAYERS: usize = 32;

pub const DEFAULT_LAYER: &str = "default";

#[derive(Clone, Debug)]
pub struct LayerTable {
    names: Vec<Option<String>>,
    rules: [u64; MAX_LAYERS],
}

impl Default for LayerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerTable {
    pub fn new() -> Self {
        let mut names = vec![None; MAX_LAYERS];
        names[0] = Some(DEFAULT_LAYER.to_owned());
        Self {
            names,
            rules: [u64::MAX; MAX_LAYERS],
        }
    }

    /// Register `name`, returning its id. Existing names return their id.
    pub fn add_layer(&mut self, name: &str) -> Result<LayerId, PhysicsError> {
        if let Some(id) = self.id(name) {
            return Ok(id);
        }
        let Some(slot) = self.names.iter().skip(1).position(Option::is_none) else {
            return Err(PhysicsError::LayerCapacity { limit: MAX_LAYERS });
        };
        let index = slot + 1;
        self.names[index] = Some(name.to_owned());
        tracing::debug!(layer = name, id = index, "layer added");
        Ok(LayerId(index as u8))
    }

    pub fn id(&self, name: &str) -> Option<LayerId> {
        self.names
            .iter()
            .position(|n| n.as_deref() == Some(name))
            .map(|i| LayerId(i as u8))
    }

    pub fn name(&self, id: LayerId) -> Option<&str> {
        self.names.get(id.0 as usize)?.as_deref()
    }

    /// Registered layers in id order.
    pub fn names(&self) -> impl Iterator<Item = (LayerId, &str)> {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_deref().map(|n| (LayerId(i as u8), n)))
    }

    /// Set the rule for both orderings of the pair, registering unknown names.
    pub fn set_rule(&mut self, a: &str, b: &str, rule: LayerRule) -> Result<(), PhysicsError> {
        let ia = self.add_layer(a)?;
        let ib = self.add_layer(b)?;
        if ia == LayerId::DEFAULT || ib == LayerId::DEFAULT {
            return Err(PhysicsError::DefaultLayerRule);
        }
        self.write(ia, ib, rule);
        self.write(ib, ia, rule);
        Ok(())
    }

    fn write(&mut self, row: LayerId, col: LayerId, rule: LayerRule) {
        let shift = 2 * col.0 as u32;
        let row = &mut self.rules[row.0 as usize];
        *row = (*row & !(0b11 << shift)) | (rule.bits() << shift);
    }

    /// Rule by name; pairs involving unknown names fall back to `Always`.
    pub fn rule(&self, a: &str, b: &str) -> LayerRule {
        match (self.id(a), self.id(b)) {
            (Some(ia), Some(ib)) => self.rule_by_id(ia, ib),
            _ => LayerRule::Always,
        }
    }

    pub fn rule_by_id(&self, a: LayerId, b: LayerId) -> LayerRule {
        let (a, b) = (a.0 as usize, b.0 as u32);
        if a >= MAX_LAYERS || b as usize >= MAX_LAYERS {
            return LayerRule::Always;
        }
        LayerRule::from_bits(self.rules[a] >> (2 * b))
    }

    /// Whether bodies on these layers/groups may interact.
    pub fn allows(&self, layer_a: LayerId, group_a: u32, layer_b: LayerId, group_b: u32) -> bool {
        self.rule_by_id(layer_a, layer_b).allows(group_a, group_b)
    }
}
