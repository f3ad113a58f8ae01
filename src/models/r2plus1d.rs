//! R(2+1)D video network (Tran et al., 2018).
//!
//! Factorizes each 3-D convolution into a spatial (1, 3, 3) convolution
//! followed by a temporal (3, 1, 1) convolution, with a batch norm and
//! ReLU between them. The backbone is a stem plus four residual stages;
//! the dreamer reads the activation after each of those five pieces.
//!
//! All parameters are frozen: the backward pass only ever carries the
//! clip gradient.
//!
//! # References
//!
//! - Tran, D., et al. (2018). A closer look at spatiotemporal
//!   convolutions for action recognition. CVPR.

use std::path::Path;

use crate::autograd::Tensor;
use crate::error::Result;
use crate::nn::{BatchNorm3d, Conv3d, Module, ReLU};
use crate::serialization::{load_safetensors, save_safetensors, TensorMap};

/// Hidden width of a factorized (2+1)D convolution.
///
/// Chosen so the factorized pair has roughly the parameter count of the
/// full 3x3x3 convolution it replaces (Tran et al., 2018, eq. 4).
fn midplanes(in_planes: usize, out_planes: usize) -> usize {
    (in_planes * out_planes * 3 * 3 * 3) / (in_planes * 3 * 3 + 3 * out_planes)
}

/// Advance a seed stream so sibling layers don't share init.
fn next_seed(seed: &mut Option<u64>) -> Option<u64> {
    seed.as_mut().map(|s| {
        *s = s.wrapping_add(1);
        *s
    })
}

/// Architecture description for an [`R2Plus1d`] backbone.
///
/// # Example
///
/// ```
/// use ensonar::models::VideoArchSpec;
///
/// let spec = VideoArchSpec::r2plus1d_34();
/// assert_eq!(spec.stage_channels, [64, 128, 256, 512]);
/// ```
#[derive(Debug, Clone)]
pub struct VideoArchSpec {
    /// Hidden width of the factorized stem convolution
    pub stem_mid: usize,
    /// Output channels of the stem
    pub stem_out: usize,
    /// Output channels of the four residual stages
    pub stage_channels: [usize; 4],
    /// Blocks per stage
    pub stage_blocks: [usize; 4],
    /// Seed for the (frozen) random initialization
    pub seed: Option<u64>,
}

impl VideoArchSpec {
    /// The 34-layer R(2+1)D backbone used by IG65-M style checkpoints.
    #[must_use]
    pub fn r2plus1d_34() -> Self {
        Self {
            stem_mid: 45,
            stem_out: 64,
            stage_channels: [64, 128, 256, 512],
            stage_blocks: [3, 4, 6, 3],
            seed: None,
        }
    }

    /// A tiny backbone with the same topology, for tests and the
    /// synthetic dream path.
    #[must_use]
    pub fn nano() -> Self {
        Self {
            stem_mid: 6,
            stem_out: 8,
            stage_channels: [8, 8, 16, 16],
            stage_blocks: [1, 1, 1, 1],
            seed: None,
        }
    }

    /// Fix the initialization seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Factorized (2+1)D convolution: spatial conv, BN, ReLU, temporal conv.
struct Conv2Plus1d {
    spatial: Conv3d,
    bn: BatchNorm3d,
    relu: ReLU,
    temporal: Conv3d,
}

impl Conv2Plus1d {
    fn new(in_planes: usize, out_planes: usize, stride: usize, seed: &mut Option<u64>) -> Self {
        let mid = midplanes(in_planes, out_planes);
        Self {
            spatial: Conv3d::with_options(
                in_planes,
                mid,
                (1, 3, 3),
                (1, stride, stride),
                (0, 1, 1),
                false,
                next_seed(seed),
            ),
            bn: BatchNorm3d::new(mid),
            relu: ReLU::new(),
            temporal: Conv3d::with_options(
                mid,
                out_planes,
                (3, 1, 1),
                (stride, 1, 1),
                (1, 0, 0),
                false,
                next_seed(seed),
            ),
        }
    }

    fn collect_state(&self, prefix: &str, store: &mut TensorMap) {
        self.spatial.collect_state(&format!("{prefix}.spatial"), store);
        self.bn.collect_state(&format!("{prefix}.bn"), store);
        self.temporal.collect_state(&format!("{prefix}.temporal"), store);
    }

    fn load_state(&mut self, prefix: &str, store: &TensorMap) -> Result<()> {
        self.spatial.load_state(&format!("{prefix}.spatial"), store)?;
        self.bn.load_state(&format!("{prefix}.bn"), store)?;
        self.temporal.load_state(&format!("{prefix}.temporal"), store)?;
        Ok(())
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.spatial.parameters();
        params.extend(self.bn.parameters());
        params.extend(self.temporal.parameters());
        params
    }
}

impl Module for Conv2Plus1d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let x = self.spatial.forward(input);
        let x = self.relu.forward(&self.bn.forward(&x));
        self.temporal.forward(&x)
    }
}

/// Residual block of two (2+1)D convolutions.
struct BasicBlock {
    conv1: Conv2Plus1d,
    bn1: BatchNorm3d,
    conv2: Conv2Plus1d,
    bn2: BatchNorm3d,
    relu: ReLU,
    downsample: Option<(Conv3d, BatchNorm3d)>,
}

impl BasicBlock {
    fn new(in_planes: usize, planes: usize, stride: usize, seed: &mut Option<u64>) -> Self {
        let downsample = if stride != 1 || in_planes != planes {
            Some((
                Conv3d::with_options(
                    in_planes,
                    planes,
                    (1, 1, 1),
                    (stride, stride, stride),
                    (0, 0, 0),
                    false,
                    next_seed(seed),
                ),
                BatchNorm3d::new(planes),
            ))
        } else {
            None
        };

        Self {
            conv1: Conv2Plus1d::new(in_planes, planes, stride, seed),
            bn1: BatchNorm3d::new(planes),
            conv2: Conv2Plus1d::new(planes, planes, 1, seed),
            bn2: BatchNorm3d::new(planes),
            relu: ReLU::new(),
            downsample,
        }
    }

    fn collect_state(&self, prefix: &str, store: &mut TensorMap) {
        self.conv1.collect_state(&format!("{prefix}.conv1"), store);
        self.bn1.collect_state(&format!("{prefix}.bn1"), store);
        self.conv2.collect_state(&format!("{prefix}.conv2"), store);
        self.bn2.collect_state(&format!("{prefix}.bn2"), store);
        if let Some((conv, bn)) = &self.downsample {
            conv.collect_state(&format!("{prefix}.downsample.conv"), store);
            bn.collect_state(&format!("{prefix}.downsample.bn"), store);
        }
    }

    fn load_state(&mut self, prefix: &str, store: &TensorMap) -> Result<()> {
        self.conv1.load_state(&format!("{prefix}.conv1"), store)?;
        self.bn1.load_state(&format!("{prefix}.bn1"), store)?;
        self.conv2.load_state(&format!("{prefix}.conv2"), store)?;
        self.bn2.load_state(&format!("{prefix}.bn2"), store)?;
        if let Some((conv, bn)) = &mut self.downsample {
            conv.load_state(&format!("{prefix}.downsample.conv"), store)?;
            bn.load_state(&format!("{prefix}.downsample.bn"), store)?;
        }
        Ok(())
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.conv1.parameters();
        params.extend(self.bn1.parameters());
        params.extend(self.conv2.parameters());
        params.extend(self.bn2.parameters());
        if let Some((conv, bn)) = &self.downsample {
            params.extend(conv.parameters());
            params.extend(bn.parameters());
        }
        params
    }
}

impl Module for BasicBlock {
    fn forward(&self, input: &Tensor) -> Tensor {
        let out = self.relu.forward(&self.bn1.forward(&self.conv1.forward(input)));
        let out = self.bn2.forward(&self.conv2.forward(&out));

        let identity = match &self.downsample {
            Some((conv, bn)) => bn.forward(&conv.forward(input)),
            None => input.clone(),
        };

        self.relu.forward(&out.add(&identity))
    }
}

/// Factorized stem: (1, 7, 7) spatial then (3, 1, 1) temporal.
struct Stem {
    conv_s: Conv3d,
    bn_s: BatchNorm3d,
    conv_t: Conv3d,
    bn_t: BatchNorm3d,
    relu: ReLU,
}

impl Stem {
    fn new(mid: usize, out: usize, seed: &mut Option<u64>) -> Self {
        Self {
            conv_s: Conv3d::with_options(
                3,
                mid,
                (1, 7, 7),
                (1, 2, 2),
                (0, 3, 3),
                false,
                next_seed(seed),
            ),
            bn_s: BatchNorm3d::new(mid),
            conv_t: Conv3d::with_options(
                mid,
                out,
                (3, 1, 1),
                (1, 1, 1),
                (1, 0, 0),
                false,
                next_seed(seed),
            ),
            bn_t: BatchNorm3d::new(out),
            relu: ReLU::new(),
        }
    }

    fn collect_state(&self, prefix: &str, store: &mut TensorMap) {
        self.conv_s.collect_state(&format!("{prefix}.conv_s"), store);
        self.bn_s.collect_state(&format!("{prefix}.bn_s"), store);
        self.conv_t.collect_state(&format!("{prefix}.conv_t"), store);
        self.bn_t.collect_state(&format!("{prefix}.bn_t"), store);
    }

    fn load_state(&mut self, prefix: &str, store: &TensorMap) -> Result<()> {
        self.conv_s.load_state(&format!("{prefix}.conv_s"), store)?;
        self.bn_s.load_state(&format!("{prefix}.bn_s"), store)?;
        self.conv_t.load_state(&format!("{prefix}.conv_t"), store)?;
        self.bn_t.load_state(&format!("{prefix}.bn_t"), store)?;
        Ok(())
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.conv_s.parameters();
        params.extend(self.bn_s.parameters());
        params.extend(self.conv_t.parameters());
        params.extend(self.bn_t.parameters());
        params
    }
}

impl Module for Stem {
    fn forward(&self, input: &Tensor) -> Tensor {
        let x = self.relu.forward(&self.bn_s.forward(&self.conv_s.forward(input)));
        self.relu.forward(&self.bn_t.forward(&self.conv_t.forward(&x)))
    }
}

/// The R(2+1)D backbone: stem plus four residual stages.
pub struct R2Plus1d {
    stem: Stem,
    stages: Vec<Vec<BasicBlock>>,
    spec: VideoArchSpec,
}

impl R2Plus1d {
    /// Build a backbone from an architecture spec, Kaiming-initialized.
    #[must_use]
    pub fn new(spec: VideoArchSpec) -> Self {
        let mut seed = spec.seed;
        let stem = Stem::new(spec.stem_mid, spec.stem_out, &mut seed);

        let mut stages = Vec::with_capacity(4);
        let mut in_planes = spec.stem_out;
        for (stage_idx, (&planes, &blocks)) in spec
            .stage_channels
            .iter()
            .zip(spec.stage_blocks.iter())
            .enumerate()
        {
            let mut stage = Vec::with_capacity(blocks);
            for block_idx in 0..blocks {
                let stride = if stage_idx > 0 && block_idx == 0 { 2 } else { 1 };
                stage.push(BasicBlock::new(in_planes, planes, stride, &mut seed));
                in_planes = planes;
            }
            stages.push(stage);
        }

        Self { stem, stages, spec }
    }

    /// The architecture this backbone was built from.
    #[must_use]
    pub fn spec(&self) -> &VideoArchSpec {
        &self.spec
    }

    /// Run the clip through the backbone, returning the activation
    /// after the stem and after each of the four stages, in order.
    ///
    /// # Panics
    ///
    /// Panics if the input is not a 5-D (N, 3, T, H, W) tensor.
    #[must_use]
    pub fn forward_stages(&self, clip: &Tensor) -> [Tensor; 5] {
        assert_eq!(
            clip.ndim(),
            5,
            "expected a 5-D (N, C, T, H, W) clip batch, got {}D",
            clip.ndim()
        );
        assert_eq!(clip.shape()[1], 3, "expected a 3-channel RGB clip");

        let l0 = self.stem.forward(clip);
        let l1 = forward_blocks(&self.stages[0], &l0);
        let l2 = forward_blocks(&self.stages[1], &l1);
        let l3 = forward_blocks(&self.stages[2], &l2);
        let l4 = forward_blocks(&self.stages[3], &l3);
        [l0, l1, l2, l3, l4]
    }

    /// Copy every parameter and statistic into a tensor store.
    #[must_use]
    pub fn state(&self) -> TensorMap {
        let mut store = TensorMap::new();
        self.stem.collect_state("stem", &mut store);
        for (i, stage) in self.stages.iter().enumerate() {
            for (b, block) in stage.iter().enumerate() {
                block.collect_state(&format!("layer{}.{b}", i + 1), &mut store);
            }
        }
        store
    }

    /// Load every parameter and statistic from a tensor store.
    ///
    /// Extra tensors in the store (a classifier head, for example) are
    /// ignored; missing or mis-shaped ones are errors.
    pub fn load_state(&mut self, store: &TensorMap) -> Result<()> {
        self.stem.load_state("stem", store)?;
        for (i, stage) in self.stages.iter_mut().enumerate() {
            for (b, block) in stage.iter_mut().enumerate() {
                block.load_state(&format!("layer{}.{b}", i + 1), store)?;
            }
        }
        Ok(())
    }
}

impl Module for R2Plus1d {
    fn forward(&self, input: &Tensor) -> Tensor {
        let [_, _, _, _, l4] = self.forward_stages(input);
        l4
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = self.stem.parameters();
        for stage in &self.stages {
            for block in stage {
                params.extend(block.parameters());
            }
        }
        params
    }
}

fn forward_blocks(blocks: &[BasicBlock], input: &Tensor) -> Tensor {
    let mut x = input.clone();
    for block in blocks {
        x = block.forward(&x);
    }
    x
}

/// The frozen video model the dreamer maximizes activations of.
///
/// Wraps an [`R2Plus1d`] backbone and exposes the ordered list of five
/// intermediate activations. Parameters never require gradients; the
/// backward pass reaches the clip alone.
pub struct VideoModel {
    net: R2Plus1d,
}

impl VideoModel {
    /// Wrap a freshly initialized backbone.
    #[must_use]
    pub fn new(spec: VideoArchSpec) -> Self {
        Self {
            net: R2Plus1d::new(spec),
        }
    }

    /// Build a backbone and populate it from a SafeTensors checkpoint.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, malformed checkpoints, or missing /
    /// mis-shaped tensors.
    pub fn from_safetensors<P: AsRef<Path>>(spec: VideoArchSpec, path: P) -> Result<Self> {
        let mut model = Self::new(spec);
        model.load_safetensors(path)?;
        Ok(model)
    }

    /// Load weights from a SafeTensors checkpoint.
    pub fn load_safetensors<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let store = load_safetensors(path)?;
        self.net.load_state(&store)
    }

    /// Save weights to a SafeTensors checkpoint.
    pub fn save_safetensors<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_safetensors(path, &self.net.state())
    }

    /// The five stage activations for a clip batch, in network order.
    #[must_use]
    pub fn forward_stages(&self, clip: &Tensor) -> [Tensor; 5] {
        self.net.forward_stages(clip)
    }

    /// Channel width of each of the five reported activations.
    #[must_use]
    pub fn stage_channels(&self) -> [usize; 5] {
        let spec = self.net.spec();
        [
            spec.stem_out,
            spec.stage_channels[0],
            spec.stage_channels[1],
            spec.stage_channels[2],
            spec.stage_channels[3],
        ]
    }

    /// Total number of frozen parameters.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.net.num_parameters()
    }
}

impl std::fmt::Debug for VideoModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoModel")
            .field("spec", self.net.spec())
            .field("parameters", &self.num_parameters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_midplanes_matches_paper() {
        // For 64 -> 64 with 3x3x3 kernels the factorized width is 144.
        assert_eq!(midplanes(64, 64), 144);
        assert_eq!(midplanes(128, 256), 460);
    }

    #[test]
    fn test_nano_stage_shapes() {
        let model = VideoModel::new(VideoArchSpec::nano().with_seed(0));
        let clip = Tensor::zeros(&[1, 3, 8, 32, 32]);
        let [l0, l1, l2, l3, l4] = model.forward_stages(&clip);

        assert_eq!(l0.shape(), &[1, 8, 8, 16, 16]);
        assert_eq!(l1.shape(), &[1, 8, 8, 16, 16]);
        assert_eq!(l2.shape(), &[1, 8, 4, 8, 8]);
        assert_eq!(l3.shape(), &[1, 16, 2, 4, 4]);
        assert_eq!(l4.shape(), &[1, 16, 1, 2, 2]);
    }

    #[test]
    fn test_stage_channels_reporting() {
        let model = VideoModel::new(VideoArchSpec::nano().with_seed(0));
        assert_eq!(model.stage_channels(), [8, 8, 8, 16, 16]);
    }

    #[test]
    fn test_parameters_are_frozen() {
        let model = VideoModel::new(VideoArchSpec::nano().with_seed(0));
        assert!(model
            .net
            .parameters()
            .iter()
            .all(|p| !p.requires_grad_enabled()));
    }

    #[test]
    fn test_state_roundtrip_through_safetensors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nano.safetensors");

        let model = VideoModel::new(VideoArchSpec::nano().with_seed(1));
        model.save_safetensors(&path).unwrap();

        let loaded = VideoModel::from_safetensors(VideoArchSpec::nano().with_seed(2), &path)
            .unwrap();

        // Same weights produce the same activations.
        let clip = Tensor::ones(&[1, 3, 4, 16, 16]);
        let a = model.forward_stages(&clip);
        let b = loaded.forward_stages(&clip);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.data(), y.data());
        }
    }

    #[test]
    fn test_load_ignores_extra_head_tensors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("with_head.safetensors");

        let model = VideoModel::new(VideoArchSpec::nano().with_seed(1));
        let mut store = model.net.state();
        store.insert("fc.weight".to_string(), (vec![0.0; 16], vec![1, 16]));
        crate::serialization::save_safetensors(&path, &store).unwrap();

        assert!(
            VideoModel::from_safetensors(VideoArchSpec::nano().with_seed(3), &path).is_ok()
        );
    }

    #[test]
    fn test_load_missing_tensor_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.safetensors");

        let model = VideoModel::new(VideoArchSpec::nano().with_seed(1));
        let mut store = model.net.state();
        store.remove("stem.conv_s.weight");
        crate::serialization::save_safetensors(&path, &store).unwrap();

        let err = VideoModel::from_safetensors(VideoArchSpec::nano().with_seed(3), &path)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::EnsonarError::MissingTensor { .. }
        ));
    }

    #[test]
    #[should_panic(expected = "3-channel")]
    fn test_forward_rejects_non_rgb_clip() {
        let model = VideoModel::new(VideoArchSpec::nano().with_seed(0));
        let clip = Tensor::zeros(&[1, 1, 4, 16, 16]);
        let _ = model.forward_stages(&clip);
    }
}
