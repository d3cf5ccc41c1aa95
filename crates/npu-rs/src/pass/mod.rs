//! Pass formation: fusing linear chains of nodes into hardware passes and
//! planning their SRAM residency.

mod algorithm;
mod block_config;
mod builder;
mod fuser;
pub mod strategies;
mod strategy;

pub use algorithm::{
    choose_conv_algorithm, select_mce_algorithm, winograd_weights_shape, MceAlgorithm,
};
pub use block_config::{default_block_configs, filter_and_sort_block_configs, BlockConfig};
pub use builder::{CompileOptions, HintDelta, PassPlanner, PlanOutcome};
pub use strategy::{
    choose_and_setup_strategy, valid_strategies, SramAllocation, SramStrategy, StrategyKind,
    StrategyRequest, TensorConfig,
};

use anyhow::{ensure, Result};
use smallvec::SmallVec;

use crate::capabilities::HardwareCapabilities;
use crate::command_stream::{
    BufferManager, BufferType, CommandDataFormat, CommandSink, DataLocation, DataType, McePle,
    MceData, PleData, PleOperation, SramAllocationStrategy, SramConfig, TensorBufferInfo,
    UpsampleMode,
};
use crate::error::CompileError;
use crate::graph::{
    BufferLocation, DataFormat, Graph, MceOperationData, NodeId, NodeKind, PassId,
    QuantizationInfo, WeightFormat,
};
use crate::utils::{
    calculate_rescale_multiplier_and_shift, round_up_to_multiple, shape_element_count,
    TensorShape,
};
use crate::weights::{weight_stripe_size_and_depth, WeightEncoder};

use fuser::FusedChain;

/// An immutable record of one committed pass: the fused nodes, the chosen
/// layout, and where the output lives.
#[derive(Debug, Clone)]
pub struct McePlePass {
    id: usize,
    nodes: SmallVec<[NodeId; 8]>,
    pre_conversion_nodes: Vec<NodeId>,
    extract_subtensor_node: Option<NodeId>,
    mce_operation: NodeId,
    mce_post_process_nodes: Vec<NodeId>,
    ple_operation: Option<NodeId>,
    post_conversion_nodes: Vec<NodeId>,
    requantize_nodes: Vec<NodeId>,
    tensor_config: TensorConfig,
    output_location: BufferLocation,
    intermediate_compression: bool,
    algorithm: MceAlgorithm,
    sram_offset: u32,
}

impl McePlePass {
    pub(crate) fn new(
        graph: &mut Graph,
        id: usize,
        chain: &FusedChain,
        intermediate_compression: bool,
        algorithm: MceAlgorithm,
        sram_offset: u32,
    ) -> Self {
        let mut pre_conversion_nodes = Vec::new();
        let mut extract_subtensor_node = None;
        let mut mce_operation = None;
        let mut mce_post_process_nodes = Vec::new();
        let mut ple_operation = None;
        let mut post_conversion_nodes = Vec::new();
        let mut requantize_nodes = Vec::new();

        for &node_id in &chain.working_nodes {
            match graph.node(node_id).kind() {
                NodeKind::FormatConversion if mce_operation.is_none() => {
                    pre_conversion_nodes.push(node_id);
                }
                NodeKind::FormatConversion => post_conversion_nodes.push(node_id),
                NodeKind::ExtractSubtensor { .. } => {
                    extract_subtensor_node.get_or_insert(node_id);
                }
                NodeKind::MceOperation(_) => {
                    mce_operation.get_or_insert(node_id);
                }
                NodeKind::McePostProcess(_) => mce_post_process_nodes.push(node_id),
                NodeKind::FuseOnlyPle(_) => {
                    ple_operation.get_or_insert(node_id);
                }
                NodeKind::Requantize => requantize_nodes.push(node_id),
                NodeKind::Input => debug_assert!(false, "input node admitted into a pass"),
            }
        }

        let mce_operation = mce_operation.expect("fused pass must contain an MCE operation");
        let tail = chain.tail();
        for &node_id in &chain.working_nodes {
            graph.assign_pass(node_id, PassId(id));
        }
        graph.set_output_sram_offset(tail, sram_offset);
        graph.set_location(tail, chain.output_location);
        // Compression is only usable for NHWCB tensors in DRAM whose output
        // stripes cover the full width and depth.
        graph.set_compressed(tail, intermediate_compression);
        graph.set_mce_algorithm(mce_operation, algorithm);

        McePlePass {
            id,
            nodes: chain.working_nodes.clone(),
            pre_conversion_nodes,
            extract_subtensor_node,
            mce_operation,
            mce_post_process_nodes,
            ple_operation,
            post_conversion_nodes,
            requantize_nodes,
            tensor_config: chain.tensor_config,
            output_location: chain.output_location,
            intermediate_compression,
            algorithm,
            sram_offset,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn mce_operation(&self) -> NodeId {
        self.mce_operation
    }

    pub fn tensor_config(&self) -> &TensorConfig {
        &self.tensor_config
    }

    pub fn output_location(&self) -> BufferLocation {
        self.output_location
    }

    pub fn intermediate_compression(&self) -> bool {
        self.intermediate_compression
    }

    pub fn algorithm(&self) -> MceAlgorithm {
        self.algorithm
    }

    pub fn output_sram_offset(&self) -> u32 {
        self.sram_offset
    }

    pub fn pre_conversion_nodes(&self) -> &[NodeId] {
        &self.pre_conversion_nodes
    }

    pub fn post_conversion_nodes(&self) -> &[NodeId] {
        &self.post_conversion_nodes
    }

    pub fn requantize_nodes(&self) -> &[NodeId] {
        &self.requantize_nodes
    }

    /// PLE code bound to the pass: passthrough unless a kernel was fused.
    pub fn ple_operation(&self, graph: &Graph) -> PleOperation {
        self.ple_operation
            .and_then(|id| graph.node(id).fuse_only_ple_data())
            .map(|data| data.operation)
            .unwrap_or(PleOperation::Passthrough)
    }

    /// Label for graphviz dumps of the compiled network.
    pub fn dot_label(&self) -> String {
        let mut label = format!("McePlePass\nPass {}", self.id);
        let strategy = match self.tensor_config.strategy {
            StrategyKind::Strategy0 => "\nSTRATEGY_0",
            StrategyKind::Strategy1 => "\nSTRATEGY_1",
            StrategyKind::Strategy3 => "\nSTRATEGY_3",
            StrategyKind::Strategy4 => "\nSTRATEGY_4",
            StrategyKind::Strategy5 => "\nSTRATEGY_5",
            StrategyKind::Strategy6 => "\nSTRATEGY_6",
            StrategyKind::Strategy7 => "\nSTRATEGY_7",
            StrategyKind::StrategyFc => "",
        };
        label.push_str(strategy);
        label
    }

    /// Quantisation the MCE output stage runs under: the last fused
    /// requantize wins over the MCE node's own parameters.
    fn output_quant_info(&self, graph: &Graph) -> QuantizationInfo {
        self.requantize_nodes
            .last()
            .map(|&id| graph.node(id).quant_info())
            .unwrap_or_else(|| graph.node(self.mce_operation).quant_info())
    }

    /// Builds the `McePle` command for this pass, registers the buffers it
    /// references, and pushes the record into `sink`.
    pub fn emit(
        &self,
        graph: &mut Graph,
        caps: &HardwareCapabilities,
        encoder: &dyn WeightEncoder,
        buffers: &mut dyn BufferManager,
        sink: &mut dyn CommandSink,
    ) -> Result<()> {
        let head = self.nodes[0];
        let tail = self.nodes[self.nodes.len() - 1];

        let mce: MceOperationData = graph
            .node(self.mce_operation)
            .mce_operation_data()
            .cloned()
            .ok_or(CompileError::MalformedPass(self.id))?;
        let mce_output_shape = graph.node(self.mce_operation).shape();
        let mce_input_shape = graph.input_shape(self.mce_operation, 0);
        let output_shape = graph.node(tail).shape();

        let input_location = graph.input_location(head, 0);
        let input_data_location = match input_location {
            BufferLocation::Dram => DataLocation::Dram,
            BufferLocation::Sram => DataLocation::Sram,
            BufferLocation::None => return Err(CompileError::UnplacedInput.into()),
        };
        let output_data_location = match self.output_location {
            BufferLocation::Dram => DataLocation::Dram,
            BufferLocation::Sram => DataLocation::Sram,
            BufferLocation::None => {
                return Err(CompileError::MissingOutputLocation(self.id).into())
            }
        };

        let allocation_strategy = match self.tensor_config.strategy {
            StrategyKind::Strategy0 => SramAllocationStrategy::Strategy0,
            StrategyKind::Strategy1 => SramAllocationStrategy::Strategy1,
            StrategyKind::Strategy3 => SramAllocationStrategy::Strategy3,
            StrategyKind::Strategy4 => SramAllocationStrategy::Strategy4,
            StrategyKind::Strategy5 => SramAllocationStrategy::Strategy5,
            StrategyKind::Strategy6 => SramAllocationStrategy::Strategy6,
            StrategyKind::Strategy7 => SramAllocationStrategy::Strategy7,
            // The firmware schedules from stripe and tile sizes, so the
            // fully-connected layout rides on the Strategy1 tag.
            StrategyKind::StrategyFc => SramAllocationStrategy::Strategy1,
        };

        let quant_info = self.output_quant_info(graph);

        // Weights.
        let (stripe_size, stripe_depth) = weight_stripe_size_and_depth(
            &mce.weights,
            mce.stride,
            self.tensor_config.weights.stripe_shape,
        );
        let encoded = encoder.encode(&mce, stripe_depth, stripe_size, quant_info)?;
        let weight_buffer_id = buffers.add_dram_constant(BufferType::ConstantDma, encoded.data);
        let weight_metadata_buffer_id =
            buffers.add_dram_constant(BufferType::ConstantControlUnit, encoded.metadata);

        let mut weights_shape = mce.weights.dimensions;
        if self.algorithm == MceAlgorithm::Winograd {
            ensure!(
                mce.weights.format != WeightFormat::Hwim,
                "winograd cannot run a depthwise weight stream"
            );
            weights_shape = winograd_weights_shape(weights_shape);
        }

        // Input.
        let input_source = graph
            .input_source(head, 0)
            .ok_or(CompileError::MalformedPass(self.id))?;
        let input_buffer_id = match input_location {
            BufferLocation::Dram => graph
                .node(input_source)
                .buffer_id()
                .ok_or(CompileError::MissingBufferId(input_source))?,
            _ => graph.node(input_source).buffer_id().unwrap_or(0),
        };
        let input_sram_offset = if input_location == BufferLocation::Sram {
            graph.node(input_source).output_sram_offset().unwrap_or(0)
        } else {
            self.tensor_config.input.offset
        };
        let supertensor_offset = match self.extract_subtensor_node {
            Some(id) => match graph.node(id).kind() {
                NodeKind::ExtractSubtensor { supertensor_offset } => *supertensor_offset,
                _ => [0; 4],
            },
            None => [0; 4],
        };

        let input_info = TensorBufferInfo {
            data_type: DataType::Qasymm8,
            data_format: buffer_format(
                graph.input_format(head, 0),
                graph.input_compressed(head, 0),
            ),
            tensor_shape: mce_input_shape,
            supertensor_shape: graph.input_shape(head, 0),
            supertensor_offset,
            stripe_shape: self.tensor_config.input.stripe_shape,
            tile_size: self.tensor_config.input.tile_size,
            dram_buffer_id: input_buffer_id,
            sram_offset: input_sram_offset,
            zero_point: graph.input_quant_info(head, 0).zero_point as u8,
            data_location: input_data_location,
        };

        let weight_info = TensorBufferInfo {
            data_type: DataType::Qasymm8,
            data_format: CommandDataFormat::WeightStream,
            tensor_shape: weights_shape,
            supertensor_shape: weights_shape,
            supertensor_offset: [0; 4],
            stripe_shape: self.tensor_config.weights.stripe_shape,
            tile_size: self.tensor_config.weights.tile_size,
            dram_buffer_id: weight_buffer_id,
            sram_offset: self.tensor_config.weights.offset,
            zero_point: mce.weights.quant_info.zero_point as u8,
            data_location: DataLocation::Dram,
        };

        // Output. Buffer space is only needed in DRAM; an SRAM output stays
        // where the pass wrote it.
        let tail_format = graph.node(tail).format();
        let output_size = buffer_size_bytes(output_shape, tail_format, caps.brick_group_shape);
        let output_buffer_id = if self.output_location == BufferLocation::Sram {
            buffers.add_sram(output_size, self.sram_offset)
        } else {
            buffers.add_dram(BufferType::Intermediate, output_size)
        };
        graph.set_buffer_id(tail, output_buffer_id);

        let output_info = TensorBufferInfo {
            data_type: DataType::Qasymm8,
            data_format: buffer_format(tail_format, graph.node(tail).compressed()),
            tensor_shape: output_shape,
            supertensor_shape: output_shape,
            supertensor_offset: [0; 4],
            stripe_shape: self.tensor_config.output.stripe_shape,
            tile_size: self.tensor_config.output.tile_size,
            dram_buffer_id: output_buffer_id,
            sram_offset: self.tensor_config.output.offset,
            zero_point: graph.node(tail).quant_info().zero_point as u8,
            data_location: output_data_location,
        };

        let ple_operation = self.ple_operation(graph);

        // The MCE output stripe follows the input stripe scaled into output
        // space; interleave packs four channels into one.
        let input_stripe = self.tensor_config.input.stripe_shape;
        let output_stripe_depth = if ple_operation == PleOperation::Interleave2x2Stride2 {
            self.tensor_config.output.stripe_shape[3] / 4
        } else {
            self.tensor_config.output.stripe_shape[3]
        };
        let mce_output_stripe = [
            input_stripe[0],
            round_up_to_multiple(
                input_stripe[1] * mce_output_shape[1] / mce_input_shape[1].max(1),
                caps.brick_group_shape[1],
            ),
            round_up_to_multiple(
                input_stripe[2] * mce_output_shape[2] / mce_input_shape[2].max(1),
                caps.brick_group_shape[2],
            ),
            output_stripe_depth,
        ];

        ensure!(
            mce.upscale_factor <= 2,
            CompileError::UnsupportedUpscaleFactor(mce.upscale_factor)
        );
        let mut mce_data = MceData {
            operation: mce.operation,
            algorithm: self.algorithm,
            stride: mce.stride,
            activation_min: 0,
            activation_max: 255,
            upsample_mode: if mce.upscale_factor == 2 {
                UpsampleMode::Transpose
            } else {
                UpsampleMode::Off
            },
            uninterleaved_input_shape: mce.uninterleaved_input_shape,
            output_shape: mce_output_shape,
            output_stripe_shape: mce_output_stripe,
            output_zero_point: quant_info.zero_point as i16,
            output_rescale_multiplier: 0,
            output_rescale_shift: 0,
        };

        let mut pre_requant_info = graph.node(self.mce_operation).quant_info();
        for &post_process in &self.mce_post_process_nodes {
            if let NodeKind::McePostProcess(data) = graph.node(post_process).kind() {
                mce_data.activation_min = mce_data.activation_min.max(data.activation_min);
                mce_data.activation_max = mce_data.activation_max.min(data.activation_max);
            }
            pre_requant_info = graph.node(post_process).quant_info();
        }

        for &requantize in &self.requantize_nodes {
            apply_requantize(&mut mce_data, graph.node(requantize).quant_info(), pre_requant_info);
        }

        if ple_operation == PleOperation::Sigmoid {
            apply_sigmoid_rescale(&mut mce_data, quant_info);
        }

        sink.push_mce_ple(McePle {
            sram_config: SramConfig {
                allocation_strategy,
            },
            input_info,
            weight_info,
            output_info,
            block_config: BlockConfig::new(
                self.tensor_config.block_width,
                self.tensor_config.block_height,
            ),
            weight_metadata_buffer_id,
            mce_data,
            ple_data: PleData {
                ce_sram: self.tensor_config.ple_code.offset,
                ple_sram: 0,
                operation: ple_operation,
            },
        });
        Ok(())
    }
}

fn buffer_format(format: DataFormat, compressed: bool) -> CommandDataFormat {
    match (format, compressed) {
        (DataFormat::Nhwc, _) => CommandDataFormat::Nhwc,
        (DataFormat::Nhwcb, false) => CommandDataFormat::Nhwcb,
        (DataFormat::Nhwcb, true) => CommandDataFormat::NhwcbCompressed,
    }
}

fn buffer_size_bytes(shape: TensorShape, format: DataFormat, brick_group: TensorShape) -> u32 {
    match format {
        DataFormat::Nhwc => shape_element_count(shape),
        DataFormat::Nhwcb => shape_element_count([
            shape[0],
            round_up_to_multiple(shape[1], brick_group[1]),
            round_up_to_multiple(shape[2], brick_group[2]),
            round_up_to_multiple(shape[3], brick_group[3]),
        ]),
    }
}

/// Folds a fused requantize into the MCE output stage.
fn apply_requantize(
    mce_data: &mut MceData,
    new_quant: QuantizationInfo,
    pre_requant: QuantizationInfo,
) {
    mce_data.output_zero_point = new_quant.zero_point as i16;
    if new_quant.scale != 0.0 {
        let factor = f64::from(pre_requant.scale) / f64::from(new_quant.scale);
        let (multiplier, shift) = calculate_rescale_multiplier_and_shift(factor);
        mce_data.output_rescale_multiplier = multiplier;
        mce_data.output_rescale_shift = shift;
    }
}

/// Derives the sigmoid input rescale and the activation clamp that keeps the
/// fixed-point exponent in range.
fn apply_sigmoid_rescale(mce_data: &mut MceData, quant_info: QuantizationInfo) {
    const LOG2_E: f64 = 1.4426950408889634;

    let input_zero_point = quant_info.zero_point;
    let rescale_factor = f64::from(quant_info.scale) * (LOG2_E * 256.0);

    let (mut multiplier, mut shift) = calculate_rescale_multiplier_and_shift(rescale_factor);

    let numerator = (1u64 << (15 + u32::from(shift))) as f64;
    let mut abs_max = (numerator / f64::from(multiplier)).ceil() as i32 - 1;

    if abs_max == 0 {
        abs_max = 1;
        multiplier = i16::MAX as u16;
        shift = 0;
    }

    let lower_bound = i32::from(mce_data.activation_min).max(input_zero_point - abs_max);
    let upper_bound = lower_bound
        .max(i32::from(mce_data.activation_max).min(input_zero_point + abs_max));

    mce_data.activation_min = lower_bound as u8;
    mce_data.activation_max = upper_bound as u8;
    mce_data.output_rescale_multiplier = multiplier;
    mce_data.output_rescale_shift = shift;
}
