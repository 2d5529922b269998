//! Renderer configuration.
//!
//! [`RendererConfig`] is validated up front so misconfiguration surfaces at
//! startup rather than as a corrupted frame later.

use anyhow::Result;

use crate::constants;

/// Configuration for the atlas cache and instanced batchers
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Square atlas texture edge in pixels
    pub tex_size: u32,

    /// Default number of equal-height rows per atlas. Collections may
    /// override this at registration time.
    pub tex_rows: u32,

    /// Maximum number of distinct atlases referenced by one draw call
    pub texes_per_batch: usize,

    /// Maximum number of instances per draw call
    pub batch_size: usize,

    /// Background color in normalized RGBA, used by the arrowhead blend
    pub bg_color: [f32; 4],

    /// Release an atlas's CPU canvas once it is locked and uploaded.
    /// Reclaims memory, but the garbage collector cannot repack an atlas
    /// whose CPU pixels are gone.
    pub release_locked_canvases: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            tex_size: constants::atlas::DEFAULT_TEX_SIZE,
            tex_rows: constants::atlas::DEFAULT_TEX_ROWS,
            texes_per_batch: constants::atlas::DEFAULT_TEXES_PER_BATCH,
            batch_size: constants::batch::DEFAULT_BATCH_SIZE,
            bg_color: [1.0, 1.0, 1.0, 1.0],
            release_locked_canvases: false,
        }
    }
}

impl RendererConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.tex_size == 0 {
            return Err(anyhow::anyhow!("RendererConfig: tex_size cannot be 0"));
        }

        if self.tex_rows == 0 {
            return Err(anyhow::anyhow!("RendererConfig: tex_rows cannot be 0"));
        }

        if self.tex_rows > self.tex_size {
            return Err(anyhow::anyhow!(
                "RendererConfig: tex_rows {} exceeds tex_size {}",
                self.tex_rows,
                self.tex_size
            ));
        }

        if self.tex_size % self.tex_rows != 0 {
            return Err(anyhow::anyhow!(
                "RendererConfig: tex_size {} is not divisible by tex_rows {}",
                self.tex_size,
                self.tex_rows
            ));
        }

        if self.batch_size == 0 {
            return Err(anyhow::anyhow!("RendererConfig: batch_size cannot be 0"));
        }

        if self.texes_per_batch == 0 {
            return Err(anyhow::anyhow!(
                "RendererConfig: texes_per_batch cannot be 0"
            ));
        }

        for (i, c) in self.bg_color.iter().enumerate() {
            if !(0.0..=1.0).contains(c) {
                return Err(anyhow::anyhow!(
                    "RendererConfig: bg_color[{}] = {} outside [0, 1]",
                    i,
                    c
                ));
            }
        }

        log::debug!("[RendererConfig::validate] Configuration validated successfully");
        Ok(())
    }

    /// Clamp the atlas texture size to what the device supports
    pub fn clamp_for_device(&mut self, device: &wgpu::Device) {
        let max_dimension = device.limits().max_texture_dimension_2d;
        if self.tex_size > max_dimension {
            // Keep tex_size divisible by tex_rows after clamping
            let clamped = max_dimension - (max_dimension % self.tex_rows);
            log::warn!(
                "[RendererConfig::clamp_for_device] tex_size clamped from {} to {} due to GPU limits (max: {})",
                self.tex_size,
                clamped,
                max_dimension
            );
            self.tex_size = clamped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let mut config = RendererConfig::default();
        config.tex_size = 0;
        assert!(config.validate().is_err());

        let mut config = RendererConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = RendererConfig::default();
        config.texes_per_batch = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_indivisible_rows() {
        let mut config = RendererConfig::default();
        config.tex_size = 100;
        config.tex_rows = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_bg_color() {
        let mut config = RendererConfig::default();
        config.bg_color = [0.0, 0.0, 1.5, 1.0];
        assert!(config.validate().is_err());
    }
}
