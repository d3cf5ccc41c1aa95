//! Node data model.
//!
//! Nodes are a shared header (shape, format, placement, hints) plus a kind
//! tag; the planner classifies nodes by matching on the tag. Hints are the
//! only fields the planner ever writes back into the graph.

use serde::{Deserialize, Serialize};

use crate::command_stream::PleOperation;
use crate::pass::MceAlgorithm;
use crate::utils::{ShapeMultiplier, TensorShape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataFormat {
    Nhwc,
    Nhwcb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferLocation {
    /// Not yet assigned by any committed pass.
    None,
    Dram,
    Sram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionHint {
    #[default]
    PreferCompressed,
    RequiredUncompressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LocationHint {
    #[default]
    PreferSram,
    RequireDram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AlgorithmHint {
    #[default]
    AllowWinograd,
    RequireDirect,
}

/// A pending graph re-shape request installed by the pass builder. The
/// compile driver consumes it (see [`Graph::fix_graph`]) before the next
/// planning attempt.
///
/// [`Graph::fix_graph`]: crate::graph::Graph::fix_graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FixGraphHint {
    #[default]
    None,
    ConvertOutputTo(DataFormat),
    ForceLocationDram,
    ForceUncompressed,
    AlgorithmDirect,
}

impl FixGraphHint {
    /// How much the hint narrows the next attempt's search space. A hint is
    /// only ever replaced by a strictly stronger one.
    pub(crate) fn strength(self) -> u8 {
        match self {
            FixGraphHint::None => 0,
            FixGraphHint::ConvertOutputTo(_) => 1,
            FixGraphHint::ForceUncompressed => 2,
            FixGraphHint::AlgorithmDirect => 3,
            FixGraphHint::ForceLocationDram => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationInfo {
    pub zero_point: i32,
    pub scale: f32,
}

impl QuantizationInfo {
    pub fn new(zero_point: i32, scale: f32) -> Self {
        QuantizationInfo { zero_point, scale }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stride {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MceOperation {
    Convolution,
    DepthwiseConvolution,
    FullyConnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightFormat {
    /// `[H, W, I, O]` weights for convolution and fully connected.
    Hwio,
    /// `[H, W, I, M]` weights for depthwise convolution.
    Hwim,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsInfo {
    pub dimensions: TensorShape,
    pub format: WeightFormat,
    pub quant_info: QuantizationInfo,
}

#[derive(Debug, Clone)]
pub struct MceOperationData {
    pub operation: MceOperation,
    pub weights: WeightsInfo,
    pub stride: Stride,
    pub upscale_factor: u32,
    pub algorithm_hint: AlgorithmHint,
    /// Input shape before any striding interleave was applied.
    pub uninterleaved_input_shape: TensorShape,
    pub shape_multiplier: ShapeMultiplier,
}

/// Bias/activation/requantisation folded into the MCE output stage.
#[derive(Debug, Clone, Copy)]
pub struct McePostProcessData {
    pub activation_min: u8,
    pub activation_max: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct FuseOnlyPleData {
    pub operation: PleOperation,
    /// Whether the kernel produces the same result under any quantisation,
    /// which lets a requantize conceptually move ahead of it.
    pub agnostic_to_requantisation: bool,
    pub shape_multiplier: ShapeMultiplier,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A graph input resident in DRAM (or left in SRAM by an earlier pass).
    Input,
    /// Changes the data format only.
    FormatConversion,
    /// Carves a sub-region out of a supertensor.
    ExtractSubtensor { supertensor_offset: TensorShape },
    MceOperation(Box<MceOperationData>),
    McePostProcess(McePostProcessData),
    FuseOnlyPle(FuseOnlyPleData),
    /// Scale / zero-point change.
    Requantize,
}

#[derive(Debug, Clone, Copy)]
pub struct InputEdge {
    pub source: NodeId,
    pub output_index: u32,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) shape: TensorShape,
    pub(crate) format: DataFormat,
    pub(crate) quant_info: QuantizationInfo,
    pub(crate) inputs: Vec<InputEdge>,
    pub(crate) location: BufferLocation,
    pub(crate) compressed: bool,
    pub(crate) compression_hint: CompressionHint,
    pub(crate) location_hint: LocationHint,
    pub(crate) fix_graph_hint: FixGraphHint,
    /// Algorithm the owning pass committed to, for MCE nodes.
    pub(crate) algorithm: Option<MceAlgorithm>,
    pub(crate) output_sram_offset: Option<u32>,
    pub(crate) buffer_id: Option<u32>,
    pub(crate) pass: Option<PassId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn format(&self) -> DataFormat {
        self.format
    }

    pub fn quant_info(&self) -> QuantizationInfo {
        self.quant_info
    }

    pub fn inputs(&self) -> &[InputEdge] {
        &self.inputs
    }

    pub fn location(&self) -> BufferLocation {
        self.location
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn compression_hint(&self) -> CompressionHint {
        self.compression_hint
    }

    pub fn location_hint(&self) -> LocationHint {
        self.location_hint
    }

    pub fn fix_graph_hint(&self) -> FixGraphHint {
        self.fix_graph_hint
    }

    pub fn algorithm(&self) -> Option<MceAlgorithm> {
        self.algorithm
    }

    pub fn output_sram_offset(&self) -> Option<u32> {
        self.output_sram_offset
    }

    pub fn buffer_id(&self) -> Option<u32> {
        self.buffer_id
    }

    pub fn pass(&self) -> Option<PassId> {
        self.pass
    }

    pub(crate) fn mce_operation_data(&self) -> Option<&MceOperationData> {
        match &self.kind {
            NodeKind::MceOperation(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn fuse_only_ple_data(&self) -> Option<&FuseOnlyPleData> {
        match &self.kind {
            NodeKind::FuseOnlyPle(data) => Some(data),
            _ => None,
        }
    }
}
