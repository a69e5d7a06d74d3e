//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables shared by the selector, region reader and parsers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tolerance for comparing scales and rounding rectangles. Absorbs drift
    /// between floating-point rectangle math and integer level geometry.
    pub epsilon: f64,
    /// Largest GIF XMP payload that will be buffered. Longer payloads are
    /// consumed and dropped.
    pub max_gif_xmp_len: usize,
    /// Largest JPEG extended XMP packet that will be reassembled. Packets
    /// declaring a longer full length are dropped.
    pub max_extended_xmp_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.001,
            max_gif_xmp_len: 65_536,
            max_extended_xmp_len: 16 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon.abs();
        self
    }

    pub fn with_max_gif_xmp_len(mut self, len: usize) -> Self {
        self.max_gif_xmp_len = len;
        self
    }

    pub fn with_max_extended_xmp_len(mut self, len: usize) -> Self {
        self.max_extended_xmp_len = len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.epsilon, 0.001);
        assert_eq!(config.max_gif_xmp_len, 65_536);
        assert_eq!(config.max_extended_xmp_len, 16 * 1024 * 1024);
    }

    #[test]
    fn test_builder_normalizes_epsilon() {
        let config = EngineConfig::new().with_epsilon(-0.2);
        assert_eq!(config.epsilon, 0.2);
    }
}
