//! Gain effect - Simple volume control

use crate::effect::{Effect, EffectBase, EffectInfo, ParamInfo};
use crate::types::Sample;

/// A simple gain (volume) effect
///
/// Parameters:
/// - factor: linear multiplier (0.0 = silence, 1.0 = unity, 4.0 = +12dB)
pub struct GainEffect {
    base: EffectBase,
}

impl GainEffect {
    /// Name of the gain factor parameter
    pub const FACTOR: &'static str = "factor";

    /// Create a new gain effect at unity
    pub fn new() -> Self {
        let info = EffectInfo::new("Gain", "Gain").with_param(
            ParamInfo::new(Self::FACTOR, 1.0)
                .with_range(0.0, 4.0)
                .with_unit("×"),
        );

        Self {
            base: EffectBase::new(info),
        }
    }

    /// Create a gain effect with an initial factor (clamped)
    pub fn with_factor(factor: f32) -> Self {
        let mut effect = Self::new();
        effect.base.set_param(0, factor);
        effect
    }

    /// Get the current gain value
    pub fn factor(&self) -> f32 {
        self.base.param(0)
    }
}

impl Default for GainEffect {
    fn default() -> Self {
        Self::new()
    }
}

impl Effect for GainEffect {
    fn info(&self) -> &EffectInfo {
        self.base.info()
    }

    fn params(&self) -> &[f32] {
        self.base.params()
    }

    fn set_param(&mut self, index: usize, value: f32) {
        self.base.set_param(index, value);
    }

    fn process(&mut self, samples: &mut [Sample], _channels: u16) {
        let factor = self.factor();
        if factor == 1.0 {
            return;
        }
        for sample in samples.iter_mut() {
            *sample *= factor;
        }
    }

    fn reset(&mut self) {
        // No state to reset
    }
}
