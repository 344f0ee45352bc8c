use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::model::EPS_MM;

/// Machine constraints, immutable for the duration of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Machine {
    /// Full printable film width.
    pub usable_width_mm: f64,
    /// Hard cap on the length of a single base.
    pub max_length_mm: f64,
    /// Lower bound on the DPI of any placed artwork.
    pub min_dpi: u32,
}

impl Default for Machine {
    fn default() -> Self {
        Self {
            usable_width_mm: 600.0,
            max_length_mm: 2500.0,
            min_dpi: 300,
        }
    }
}

/// Margin constants. Configurable per tenant but constant within a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Margins {
    /// Kept free along all four outer edges of a base.
    pub side_mm: f64,
    /// Minimum separation between any two placed items.
    pub inter_item_mm: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            side_mm: 20.0,
            inter_item_mm: 10.0,
        }
    }
}

/// Packing strategies. Both share the same per-base placement loop and
/// differ only in the order items are fed to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PackMode {
    /// Strict picklist order.
    Sequence,
    /// Area-descending reorder for higher utilization.
    Optimize,
}

impl FromStr for PackMode {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequence" | "seq" => Ok(Self::Sequence),
            "optimize" | "opt" => Ok(Self::Optimize),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    pub machine: Machine,
    #[serde(default)]
    pub margins: Margins,
    #[serde(default = "default_mode")]
    pub mode: PackMode,
    /// Accepted on the API surface; the current engine never rotates items.
    #[serde(default)]
    pub allow_rotate: bool,
    /// Raster resolution of rendered base artifacts.
    #[serde(default = "default_render_dpi")]
    pub render_dpi: u32,
    /// Pin the manifest's clock-derived fields for byte-stable reruns.
    #[serde(default)]
    pub reproducible: bool,
    /// Soft job deadline in seconds. `None` disables the deadline.
    #[serde(default = "default_deadline")]
    pub soft_deadline_secs: Option<u64>,
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            machine: Machine::default(),
            margins: Margins::default(),
            mode: default_mode(),
            allow_rotate: false,
            render_dpi: default_render_dpi(),
            reproducible: false,
            soft_deadline_secs: default_deadline(),
        }
    }
}

impl ComposeConfig {
    /// Width actually available to items once side margins are reserved.
    pub fn usable_margin_width_mm(&self) -> f64 {
        self.machine.usable_width_mm - 2.0 * self.margins.side_mm
    }

    /// Validates machine and margin parameters.
    ///
    /// Returns an error if dimensions are non-positive, margins leave no
    /// usable space, or the render DPI is zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::ComposeError;

        let m = &self.machine;
        if !(m.usable_width_mm > 0.0) || !(m.max_length_mm > 0.0) {
            return Err(ComposeError::InvalidConfig(format!(
                "machine dimensions must be positive (got {}x{} mm)",
                m.usable_width_mm, m.max_length_mm
            )));
        }
        if m.min_dpi == 0 {
            return Err(ComposeError::InvalidConfig(
                "machine min_dpi must be at least 1".into(),
            ));
        }
        if self.margins.side_mm < 0.0 || self.margins.inter_item_mm < 0.0 {
            return Err(ComposeError::InvalidConfig(format!(
                "margins must be non-negative (got side {} mm, inter-item {} mm)",
                self.margins.side_mm, self.margins.inter_item_mm
            )));
        }
        if self.usable_margin_width_mm() <= EPS_MM {
            return Err(ComposeError::InvalidConfig(format!(
                "side margin {} mm * 2 leaves no usable width on a {} mm machine",
                self.margins.side_mm, m.usable_width_mm
            )));
        }
        if m.max_length_mm - 2.0 * self.margins.side_mm <= EPS_MM {
            return Err(ComposeError::InvalidConfig(format!(
                "side margin {} mm * 2 leaves no usable length within {} mm",
                self.margins.side_mm, m.max_length_mm
            )));
        }
        if self.render_dpi == 0 {
            return Err(ComposeError::InvalidConfig(
                "render_dpi must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Create a fluent builder for `ComposeConfig`.
    pub fn builder() -> ComposeConfigBuilder {
        ComposeConfigBuilder::new()
    }
}

fn default_mode() -> PackMode {
    PackMode::Sequence
}
fn default_render_dpi() -> u32 {
    300
}
fn default_deadline() -> Option<u64> {
    Some(300)
}

/// Builder for `ComposeConfig` for ergonomic construction.
#[derive(Debug, Default, Clone)]
pub struct ComposeConfigBuilder {
    cfg: ComposeConfig,
}

impl ComposeConfigBuilder {
    pub fn new() -> Self {
        Self {
            cfg: ComposeConfig::default(),
        }
    }
    pub fn machine(mut self, usable_width_mm: f64, max_length_mm: f64, min_dpi: u32) -> Self {
        self.cfg.machine = Machine {
            usable_width_mm,
            max_length_mm,
            min_dpi,
        };
        self
    }
    pub fn margins(mut self, side_mm: f64, inter_item_mm: f64) -> Self {
        self.cfg.margins = Margins {
            side_mm,
            inter_item_mm,
        };
        self
    }
    pub fn mode(mut self, v: PackMode) -> Self {
        self.cfg.mode = v;
        self
    }
    pub fn allow_rotate(mut self, v: bool) -> Self {
        self.cfg.allow_rotate = v;
        self
    }
    pub fn render_dpi(mut self, v: u32) -> Self {
        self.cfg.render_dpi = v;
        self
    }
    pub fn reproducible(mut self, v: bool) -> Self {
        self.cfg.reproducible = v;
        self
    }
    pub fn soft_deadline_secs(mut self, v: Option<u64>) -> Self {
        self.cfg.soft_deadline_secs = v;
        self
    }
    pub fn build(self) -> ComposeConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ComposeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_width_rejected() {
        let cfg = ComposeConfig::builder().machine(0.0, 2500.0, 300).build();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn margins_exhausting_width_rejected() {
        let cfg = ComposeConfig::builder()
            .machine(600.0, 2500.0, 300)
            .margins(300.0, 10.0)
            .build();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("sequence".parse::<PackMode>(), Ok(PackMode::Sequence));
        assert_eq!("OPTIMIZE".parse::<PackMode>(), Ok(PackMode::Optimize));
        assert!("shelf".parse::<PackMode>().is_err());
    }
}
