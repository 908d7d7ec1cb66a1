//! Ordered effect chain and its control-side layout
//!
//! The [`EffectChain`] is owned by whoever processes frames (the worker while
//! a session runs, the engine otherwise). Control code never touches it
//! directly during a session; it validates requests against a
//! [`ChainLayout`] mirror and sends indexed commands instead.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use super::{clamp_param, EffectError, EffectStage, ParamInfo, StageId};
use crate::types::{AudioFrame, Sample};

/// A stage that panicked and was disabled
#[derive(Debug, Clone, PartialEq)]
pub struct StageFault {
    pub stage: StageId,
    pub message: String,
}

/// Ordered sequence of effect stages
pub struct EffectChain {
    stages: Vec<EffectStage>,
    /// Pre-stage copy of the frame, restored if a stage panics
    scratch: Vec<Sample>,
    faults: Vec<StageFault>,
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::empty()
    }
}

impl EffectChain {
    /// Chain without stages (identity transform)
    pub fn empty() -> Self {
        Self {
            stages: Vec::new(),
            scratch: Vec::new(),
            faults: Vec::new(),
        }
    }

    /// Build a chain, rejecting duplicate stage ids
    pub fn new(stages: Vec<EffectStage>) -> Result<Self, EffectError> {
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(&stage.id) {
                return Err(EffectError::DuplicateStage(stage.id.clone()));
            }
        }
        Ok(Self {
            faults: Vec::with_capacity(stages.len()),
            stages,
            scratch: Vec::new(),
        })
    }

    /// Size the scratch buffer for frames of `frame_len` samples
    pub fn prepare(&mut self, frame_len: usize) {
        if self.scratch.len() != frame_len {
            self.scratch = vec![0.0; frame_len];
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[EffectStage] {
        &self.stages
    }

    /// Look up a stage by id
    pub fn stage(&self, id: &StageId) -> Option<&EffectStage> {
        self.stages.iter().find(|s| &s.id == id)
    }

    /// Run a frame through every enabled stage in order
    ///
    /// A stage that panics has its partial output discarded, is disabled,
    /// and is reported through [`drain_faults`](Self::drain_faults).
    pub fn apply(&mut self, mut frame: AudioFrame) -> AudioFrame {
        let channels = frame.channels();

        for stage in self.stages.iter_mut().filter(|s| s.enabled) {
            // Only reallocates when the frame length changed
            if self.scratch.len() != frame.len() {
                self.scratch.resize(frame.len(), 0.0);
            }
            self.scratch.copy_from_slice(frame.samples());

            let effect = &mut stage.effect;
            let samples = frame.samples_mut();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                effect.process(samples, channels);
            }));

            if let Err(payload) = result {
                frame.samples_mut().copy_from_slice(&self.scratch);
                stage.enabled = false;
                self.faults.push(StageFault {
                    stage: stage.id.clone(),
                    message: panic_message(payload.as_ref()),
                });
            }
        }

        frame
    }

    /// Take the faults recorded since the last call
    pub fn drain_faults(&mut self) -> std::vec::Drain<'_, StageFault> {
        self.faults.drain(..)
    }

    /// Set a parameter by name, clamping to its range
    ///
    /// Returns the applied value. `ParameterOutOfRange` means the clamped
    /// value was applied anyway.
    pub fn update_parameter(
        &mut self,
        stage: &StageId,
        name: &str,
        value: f32,
    ) -> Result<f32, EffectError> {
        let slot = self.slot_of(stage)?;
        let effect = &mut self.stages[slot].effect;
        let index = effect
            .info()
            .param_index(name)
            .ok_or_else(|| EffectError::UnknownParameter {
                stage: stage.clone(),
                param: name.to_string(),
            })?;

        let (applied, clamped) = clamp_param(stage, &effect.info().params[index], value);
        effect.set_param(index, applied);
        match clamped {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    /// Enable or disable a stage by id
    pub fn set_stage_enabled(&mut self, stage: &StageId, enabled: bool) -> Result<(), EffectError> {
        let slot = self.slot_of(stage)?;
        self.set_enabled_at(slot, enabled);
        Ok(())
    }

    /// Set a parameter by position (already validated and clamped)
    pub fn set_param_at(&mut self, slot: usize, param: usize, value: f32) {
        if let Some(stage) = self.stages.get_mut(slot) {
            stage.effect.set_param(param, value);
        }
    }

    /// Enable or disable a stage by position
    pub fn set_enabled_at(&mut self, slot: usize, enabled: bool) {
        if let Some(stage) = self.stages.get_mut(slot) {
            if enabled && !stage.enabled {
                stage.effect.reset();
            }
            stage.enabled = enabled;
        }
    }

    /// Clear the DSP state of every stage
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.effect.reset();
        }
    }

    /// Snapshot of stage ids, kinds, flags and parameter values
    pub fn layout(&self) -> ChainLayout {
        ChainLayout {
            stages: self
                .stages
                .iter()
                .map(|stage| StageLayout {
                    id: stage.id.clone(),
                    kind: stage.kind().to_string(),
                    enabled: stage.enabled,
                    params: stage
                        .effect
                        .info()
                        .params
                        .iter()
                        .zip(stage.effect.params())
                        .map(|(info, value)| ParamLayout {
                            info: info.clone(),
                            value: *value,
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    fn slot_of(&self, stage: &StageId) -> Result<usize, EffectError> {
        self.stages
            .iter()
            .position(|s| &s.id == stage)
            .ok_or_else(|| EffectError::UnknownStage(stage.clone()))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "effect panicked".to_string()
    }
}

/// A parameter and its last known value
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    pub info: ParamInfo,
    pub value: f32,
}

/// A stage as seen from the control side
#[derive(Debug, Clone, PartialEq)]
pub struct StageLayout {
    pub id: StageId,
    pub kind: String,
    pub enabled: bool,
    pub params: Vec<ParamLayout>,
}

impl StageLayout {
    /// Last known value of a named parameter
    pub fn param(&self, name: &str) -> Option<f32> {
        self.params
            .iter()
            .find(|p| p.info.name == name)
            .map(|p| p.value)
    }
}

/// Control-side mirror of a running chain
///
/// Resolves names to positions so the processing side only ever sees
/// validated indices and clamped values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainLayout {
    stages: Vec<StageLayout>,
}

/// A validated parameter change
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamChange {
    pub slot: usize,
    pub param: usize,
    pub value: f32,
}

impl ChainLayout {
    pub fn stages(&self) -> &[StageLayout] {
        &self.stages
    }

    pub fn stage(&self, id: &StageId) -> Option<&StageLayout> {
        self.stages.iter().find(|s| &s.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Validate and clamp a parameter change
    ///
    /// On success returns the change to send plus the non-fatal clamp error,
    /// if any.
    pub fn resolve_param(
        &self,
        stage: &StageId,
        name: &str,
        value: f32,
    ) -> Result<(ParamChange, Option<EffectError>), EffectError> {
        let slot = self.slot_of(stage)?;
        let param = self.stages[slot]
            .params
            .iter()
            .position(|p| p.info.name == name)
            .ok_or_else(|| EffectError::UnknownParameter {
                stage: stage.clone(),
                param: name.to_string(),
            })?;

        let (applied, clamped) = clamp_param(stage, &self.stages[slot].params[param].info, value);
        Ok((
            ParamChange {
                slot,
                param,
                value: applied,
            },
            clamped,
        ))
    }

    /// Record a change that was handed to the processing side
    pub fn record_param(&mut self, change: ParamChange) {
        if let Some(p) = self
            .stages
            .get_mut(change.slot)
            .and_then(|s| s.params.get_mut(change.param))
        {
            p.value = change.value;
        }
    }

    /// Position of a stage
    pub fn slot_of(&self, stage: &StageId) -> Result<usize, EffectError> {
        self.stages
            .iter()
            .position(|s| &s.id == stage)
            .ok_or_else(|| EffectError::UnknownStage(stage.clone()))
    }

    /// Record an enabled flag change
    pub fn set_enabled(&mut self, slot: usize, enabled: bool) {
        if let Some(stage) = self.stages.get_mut(slot) {
            stage.enabled = enabled;
        }
    }

    /// Record that a stage was disabled after a fault
    pub fn mark_faulted(&mut self, stage: &StageId) {
        if let Ok(slot) = self.slot_of(stage) {
            self.stages[slot].enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::native::GainEffect;
    use crate::effect::{Effect, EffectBase, EffectInfo};

    struct Exploding {
        base: EffectBase,
    }

    impl Exploding {
        fn new() -> Self {
            Self {
                base: EffectBase::new(EffectInfo::new("Exploding", "Test")),
            }
        }
    }

    impl Effect for Exploding {
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
            // Partial output must not leak downstream
            samples[0] = 99.0;
            panic!("boom");
        }

        fn reset(&mut self) {}
    }

    fn ones(len: usize) -> AudioFrame {
        AudioFrame::from_samples(vec![1.0; len], 2, 0)
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let mut chain = EffectChain::empty();
        let input = AudioFrame::from_samples(vec![0.1, -0.7, 0.3, 1.5e-8], 2, 4);
        let output = chain.apply(input.clone());

        assert_eq!(output, input);
    }

    #[test]
    fn test_gain_applied_twice() {
        let mut chain =
            EffectChain::new(vec![EffectStage::new("gain", GainEffect::with_factor(0.5))]).unwrap();
        chain.prepare(4);

        let once = chain.apply(ones(4));
        assert_eq!(once.samples(), &[0.5; 4]);

        let twice = chain.apply(once);
        assert_eq!(twice.samples(), &[0.25; 4]);
    }

    #[test]
    fn test_disabled_stage_is_skipped() {
        let mut chain = EffectChain::new(vec![
            EffectStage::new("mute", GainEffect::with_factor(0.0)).disabled(),
            EffectStage::new("half", GainEffect::with_factor(0.5)),
        ])
        .unwrap();

        assert_eq!(chain.apply(ones(2)).samples(), &[0.5, 0.5]);
        assert_eq!(chain.len(), 2);

        chain.set_stage_enabled(&StageId::from("mute"), true).unwrap();
        assert_eq!(chain.apply(ones(2)).samples(), &[0.0, 0.0]);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = EffectChain::new(vec![
            EffectStage::new("gain", GainEffect::new()),
            EffectStage::new("gain", GainEffect::new()),
        ])
        .err();
        assert_eq!(err, Some(EffectError::DuplicateStage(StageId::from("gain"))));
    }

    #[test]
    fn test_out_of_range_parameter_is_clamped_and_used() {
        let mut chain =
            EffectChain::new(vec![EffectStage::new("gain", GainEffect::new())]).unwrap();
        let stage = StageId::from("gain");

        let err = chain
            .update_parameter(&stage, GainEffect::FACTOR, 10.0)
            .unwrap_err();
        assert!(err.is_applied());
        assert_eq!(chain.stage(&stage).unwrap().param(GainEffect::FACTOR), Some(4.0));
        assert_eq!(chain.apply(ones(2)).samples(), &[4.0, 4.0]);
    }

    #[test]
    fn test_unknown_stage_and_parameter() {
        let mut chain =
            EffectChain::new(vec![EffectStage::new("gain", GainEffect::new())]).unwrap();

        assert_eq!(
            chain.update_parameter(&StageId::from("eq"), "freq", 1.0),
            Err(EffectError::UnknownStage(StageId::from("eq")))
        );
        assert!(matches!(
            chain.update_parameter(&StageId::from("gain"), "drive", 1.0),
            Err(EffectError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_panicking_stage_is_contained() {
        let mut chain = EffectChain::new(vec![
            EffectStage::new("bad", Exploding::new()),
            EffectStage::new("half", GainEffect::with_factor(0.5)),
        ])
        .unwrap();
        chain.prepare(4);

        let output = chain.apply(ones(4));

        // Bad stage's partial write discarded, later stages still ran
        assert_eq!(output.samples(), &[0.5; 4]);
        let faults: Vec<StageFault> = chain.drain_faults().collect();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].stage, StageId::from("bad"));
        assert_eq!(faults[0].message, "boom");
        assert!(!chain.stage(&StageId::from("bad")).unwrap().enabled);

        // Stays disabled on the next frame
        assert_eq!(chain.apply(ones(4)).samples(), &[0.5; 4]);
        assert_eq!(chain.drain_faults().count(), 0);
    }

    #[test]
    fn test_layout_resolves_and_clamps() {
        let chain = EffectChain::new(vec![
            EffectStage::new("pre", GainEffect::new()),
            EffectStage::new("post", GainEffect::new()),
        ])
        .unwrap();
        let mut layout = chain.layout();

        let (change, clamped) = layout
            .resolve_param(&StageId::from("post"), GainEffect::FACTOR, -3.0)
            .unwrap();
        assert_eq!(
            change,
            ParamChange {
                slot: 1,
                param: 0,
                value: 0.0
            }
        );
        assert!(clamped.is_some());

        layout.record_param(change);
        assert_eq!(
            layout.stage(&StageId::from("post")).unwrap().param(GainEffect::FACTOR),
            Some(0.0)
        );
        assert!(layout.resolve_param(&StageId::from("x"), "factor", 1.0).is_err());
    }
}
