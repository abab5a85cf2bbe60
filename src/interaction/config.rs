//! Tunables of the transfer pipeline.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Patch boxes are grown by this many patch cell widths on every side
    /// before selecting overlap cells.
    pub ghost_cell_width: f64,
    /// Accepted barycenter distance between an overlap cell and its native
    /// origin, relative to the native cell diameter.
    pub correspondence_tolerance: f64,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            ghost_cell_width: 1.0,
            correspondence_tolerance: 1e-12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: InteractionConfig = serde_json::from_str(r#"{ "ghost_cell_width": 2.5 }"#).unwrap();
        assert_eq!(cfg.ghost_cell_width, 2.5);
        assert_eq!(cfg.correspondence_tolerance, 1e-12);
        let back: InteractionConfig =
            serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(back, cfg);
    }
}
