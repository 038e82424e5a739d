//! Conversion and writer settings.

use nalgebra::Vector3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Smallest tessellation factor accepted by the primitive tessellators.
pub const MIN_TESSELLATION: f64 = 0.01;

/// Settings for COLLADA → link/joint tree conversion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionConfig {
    /// Tessellation factor for box/sphere/cylinder primitives.
    /// Values below [`MIN_TESSELLATION`] are clamped.
    pub tessellation: f64,

    /// Velocity limit (rad/s) used when a rotational axis resolves none or zero.
    pub revolute_velocity_fallback: f64,

    /// Velocity limit (m/s) used when a prismatic axis resolves none or zero.
    pub prismatic_velocity_fallback: f64,

    /// Half-width of the range given to an unlimited prismatic axis.
    pub prismatic_range_fallback: f64,

    /// Record each link's merged mesh in the artifact store.
    pub collect_artifacts: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            tessellation: 1.0,
            revolute_velocity_fallback: 0.5,
            prismatic_velocity_fallback: 0.01,
            prismatic_range_fallback: 100_000.0,
            collect_artifacts: true,
        }
    }
}

impl ConversionConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tessellation factor.
    #[must_use]
    pub fn with_tessellation(mut self, tessellation: f64) -> Self {
        self.tessellation = tessellation;
        self
    }

    /// Set the rotational and prismatic velocity fallbacks.
    #[must_use]
    pub fn with_velocity_fallbacks(mut self, revolute: f64, prismatic: f64) -> Self {
        self.revolute_velocity_fallback = revolute;
        self.prismatic_velocity_fallback = prismatic;
        self
    }

    /// Set the range used for unlimited prismatic axes.
    #[must_use]
    pub fn with_prismatic_range_fallback(mut self, range: f64) -> Self {
        self.prismatic_range_fallback = range;
        self
    }

    /// Enable or disable merged-mesh artifact collection.
    #[must_use]
    pub fn with_artifacts(mut self, collect: bool) -> Self {
        self.collect_artifacts = collect;
        self
    }

    /// The tessellation factor after clamping.
    #[must_use]
    pub fn effective_tessellation(&self) -> f64 {
        self.tessellation.max(MIN_TESSELLATION)
    }
}

/// Settings for writing a link/joint tree back out as COLLADA.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WriterConfig {
    /// Authoring tool recorded in the asset contributor.
    pub author: String,

    /// Gravity written into the physics scene.
    pub gravity: Vector3<f64>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            author: "URDF Collada Writer".to_string(),
            gravity: Vector3::new(0.0, 0.0, -9.81),
        }
    }
}

impl WriterConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authoring tool name.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Set the physics scene gravity.
    #[must_use]
    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults() {
        let config = ConversionConfig::default();
        assert_relative_eq!(config.tessellation, 1.0);
        assert_relative_eq!(config.revolute_velocity_fallback, 0.5);
        assert_relative_eq!(config.prismatic_velocity_fallback, 0.01);
        assert!(config.collect_artifacts);
    }

    #[test]
    fn test_tessellation_clamped() {
        let config = ConversionConfig::new().with_tessellation(0.0);
        assert_relative_eq!(config.effective_tessellation(), MIN_TESSELLATION);
        let config = ConversionConfig::new().with_tessellation(2.5);
        assert_relative_eq!(config.effective_tessellation(), 2.5);
    }

    #[test]
    fn test_writer_builders() {
        let config = WriterConfig::new()
            .with_author("tester")
            .with_gravity(Vector3::new(0.0, -9.8, 0.0));
        assert_eq!(config.author, "tester");
        assert_relative_eq!(config.gravity.y, -9.8);
    }
}
