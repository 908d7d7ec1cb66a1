//! Effect system - traits, stages and the processing chain
//!
//! Every effect implements [`Effect`]: it describes its parameters through
//! [`EffectInfo`] and transforms interleaved blocks in place. Effects are
//! wrapped in an [`EffectStage`] (identity + enabled flag) and run in order by
//! an [`EffectChain`].
//!
//! Parameter values are actual values within each parameter's declared
//! range; out-of-range requests are clamped.

mod chain;
pub mod native;

pub use chain::{ChainLayout, EffectChain, ParamChange, ParamLayout, StageFault, StageLayout};

use thiserror::Error;

use crate::types::Sample;

/// Information about an effect parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    /// Parameter name, unique within its effect
    pub name: String,
    /// Default value
    pub default: f32,
    /// Minimum value
    pub min: f32,
    /// Maximum value
    pub max: f32,
    /// Unit label (e.g., "ms", "dB", "×")
    pub unit: String,
}

impl Default for ParamInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            default: 0.0,
            min: 0.0,
            max: 1.0,
            unit: String::new(),
        }
    }
}

impl ParamInfo {
    /// Create a new parameter info with name and default value
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            ..Default::default()
        }
    }

    /// Set the value range
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the unit label
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Clamp a value into the declared range (NaN becomes the default)
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Information about an effect
#[derive(Debug, Clone, PartialEq)]
pub struct EffectInfo {
    /// Effect name for display
    pub name: String,
    /// Kind tag (e.g., "Gain", "Filter")
    pub kind: String,
    /// Parameter descriptions, indexed by position
    pub params: Vec<ParamInfo>,
}

impl EffectInfo {
    /// Create a new effect info
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            params: Vec::new(),
        }
    }

    /// Add a parameter to this effect
    pub fn with_param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    /// Get the number of parameters
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Index of the parameter called `name`
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }
}

/// The core effect trait - implemented by all audio effects
///
/// `process` runs on the processing worker once per frame. It must not block
/// and should not allocate; any DSP state belongs to the effect itself.
pub trait Effect: Send {
    /// Get information about this effect (name, kind, parameters)
    fn info(&self) -> &EffectInfo;

    /// Current parameter values, indexed like `info().params`
    fn params(&self) -> &[f32];

    /// Set a parameter by index (the value is clamped to its range)
    fn set_param(&mut self, index: usize, value: f32);

    /// Process an interleaved block in place
    fn process(&mut self, samples: &mut [Sample], channels: u16);

    /// Clear internal DSP state
    fn reset(&mut self);
}

/// Base implementation helper for effects
///
/// Stores the effect info and current parameter values.
#[derive(Debug, Clone)]
pub struct EffectBase {
    info: EffectInfo,
    values: Vec<f32>,
}

impl EffectBase {
    /// Create a new effect base, every parameter at its default
    pub fn new(info: EffectInfo) -> Self {
        let values = info.params.iter().map(|p| p.clamp(p.default)).collect();
        Self { info, values }
    }

    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    pub fn params(&self) -> &[f32] {
        &self.values
    }

    /// Set a parameter value, clamped to its range
    pub fn set_param(&mut self, index: usize, value: f32) {
        let info = self.info.params.get(index);
        if let (Some(slot), Some(info)) = (self.values.get_mut(index), info) {
            *slot = info.clamp(value);
        }
    }

    /// Get a parameter's value (0.0 for an unknown index)
    pub fn param(&self, index: usize) -> f32 {
        self.values.get(index).copied().unwrap_or(0.0)
    }
}

/// Identifier of a stage within a chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for StageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One effect instance in a chain
pub struct EffectStage {
    pub id: StageId,
    pub enabled: bool,
    pub effect: Box<dyn Effect>,
}

impl EffectStage {
    /// Wrap an effect as an enabled stage
    pub fn new(id: impl Into<StageId>, effect: impl Effect + 'static) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            effect: Box::new(effect),
        }
    }

    /// Start disabled (builder style)
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Kind tag of the wrapped effect
    pub fn kind(&self) -> &str {
        &self.effect.info().kind
    }

    /// Current value of a named parameter
    pub fn param(&self, name: &str) -> Option<f32> {
        let index = self.effect.info().param_index(name)?;
        self.effect.params().get(index).copied()
    }
}

impl std::fmt::Debug for EffectStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectStage")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Errors from effect chain operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("Unknown effect stage: {0}")]
    UnknownStage(StageId),

    #[error("Stage {stage} has no parameter '{param}'")]
    UnknownParameter { stage: StageId, param: String },

    /// Non-fatal: the value was clamped and applied
    #[error("{stage}.{param} = {requested} is outside [{min}, {max}], applied {applied}")]
    ParameterOutOfRange {
        stage: StageId,
        param: String,
        requested: f32,
        applied: f32,
        min: f32,
        max: f32,
    },

    #[error("Duplicate effect stage id: {0}")]
    DuplicateStage(StageId),
}

impl EffectError {
    /// Whether the requested change still took effect
    pub fn is_applied(&self) -> bool {
        matches!(self, EffectError::ParameterOutOfRange { .. })
    }
}

/// Clamp a requested value, reporting the clamp as a non-fatal error
pub(crate) fn clamp_param(
    stage: &StageId,
    info: &ParamInfo,
    requested: f32,
) -> (f32, Option<EffectError>) {
    let applied = info.clamp(requested);
    if info.contains(requested) {
        return (applied, None);
    }
    let error = EffectError::ParameterOutOfRange {
        stage: stage.clone(),
        param: info.name.clone(),
        requested,
        applied,
        min: info.min,
        max: info.max,
    };
    (applied, Some(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_info() {
        let param = ParamInfo::new("Gain", 1.0)
            .with_range(-24.0, 24.0)
            .with_unit("dB");

        assert_eq!(param.name, "Gain");
        assert_eq!(param.default, 1.0);
        assert_eq!(param.min, -24.0);
        assert_eq!(param.max, 24.0);
        assert_eq!(param.unit, "dB");
        assert_eq!(param.clamp(30.0), 24.0);
        assert_eq!(param.clamp(f32::NAN), 1.0);
    }

    #[test]
    fn test_effect_info() {
        let info = EffectInfo::new("Test Effect", "Filter")
            .with_param(ParamInfo::new("Cutoff", 0.5))
            .with_param(ParamInfo::new("Resonance", 0.0));

        assert_eq!(info.name, "Test Effect");
        assert_eq!(info.kind, "Filter");
        assert_eq!(info.param_count(), 2);
        assert_eq!(info.param_index("Resonance"), Some(1));
        assert_eq!(info.param_index("Drive"), None);
    }

    #[test]
    fn test_effect_base() {
        let info = EffectInfo::new("Test", "Test")
            .with_param(ParamInfo::new("P1", 50.0).with_range(0.0, 100.0))
            .with_param(ParamInfo::new("P2", 0.0).with_range(-1.0, 1.0));

        let mut base = EffectBase::new(info);
        assert_eq!(base.params(), &[50.0, 0.0]);

        base.set_param(0, 150.0);
        assert_eq!(base.param(0), 100.0);

        base.set_param(1, -0.5);
        assert_eq!(base.param(1), -0.5);

        // Unknown index is ignored
        base.set_param(5, 1.0);
        assert_eq!(base.param(5), 0.0);
    }

    #[test]
    fn test_clamp_param_reports_out_of_range() {
        let stage = StageId::from("gain");
        let info = ParamInfo::new("factor", 1.0).with_range(0.0, 4.0);

        assert_eq!(clamp_param(&stage, &info, 2.0), (2.0, None));

        let (applied, err) = clamp_param(&stage, &info, 9.0);
        assert_eq!(applied, 4.0);
        let err = err.unwrap();
        assert!(err.is_applied());
        assert!(matches!(
            err,
            EffectError::ParameterOutOfRange { requested, applied, .. }
                if requested == 9.0 && applied == 4.0
        ));
    }
}
