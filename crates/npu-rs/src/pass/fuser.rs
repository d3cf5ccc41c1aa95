//! Linear chain fusion.
//!
//! Walks forward from a seed node along single-consumer chains, admitting
//! nodes into the working set under the typed rules below, and re-runs
//! algorithm choice, block-config filtering, and strategy selection after
//! every admission. The running best is the **longest** prefix for which a
//! strategy existed; a longer prefix that fails to place never clears an
//! earlier success.

use smallvec::SmallVec;
use std::sync::Arc;

use crate::capabilities::HardwareCapabilities;
use crate::graph::{
    BufferLocation, DataFormat, FuseOnlyPleData, Graph, LocationHint, MceOperation, NodeId,
    NodeKind,
};
use crate::pass::algorithm::{select_mce_algorithm, winograd_weights_shape};
use crate::pass::block_config::filter_and_sort_block_configs;
use crate::pass::strategy::{
    choose_and_setup_strategy, valid_strategies, SramStrategy, StrategyRequest, TensorConfig,
};
use crate::pass::{BlockConfig, MceAlgorithm, StrategyKind};
use crate::profiling;
use crate::sram::SramAllocator;
use crate::utils::ShapeMultiplier;

/// Snapshot of the longest prefix that strategy selection accepted.
#[derive(Debug, Clone)]
pub(crate) struct FusedChain {
    pub working_nodes: SmallVec<[NodeId; 8]>,
    pub allocator: SramAllocator,
    pub tensor_config: TensorConfig,
    pub valid_block_configs: Vec<BlockConfig>,
    pub required_output_format: Option<DataFormat>,
    pub output_location: BufferLocation,
}

impl FusedChain {
    pub(crate) fn head(&self) -> NodeId {
        self.working_nodes[0]
    }

    pub(crate) fn tail(&self) -> NodeId {
        self.working_nodes[self.working_nodes.len() - 1]
    }
}

#[derive(Debug)]
pub(crate) struct LinearChainResult {
    pub mce_operation: Option<NodeId>,
    /// Algorithm computed by the most recent admission attempt.
    pub algorithm: MceAlgorithm,
    pub best: Option<FusedChain>,
}

pub(crate) fn find_linear_working_nodes(
    graph: &Graph,
    first_node: NodeId,
    base_allocator: &SramAllocator,
    caps: &HardwareCapabilities,
    allowed_strategies: &[Arc<dyn SramStrategy>],
    allowed_block_configs: &[BlockConfig],
    enable_winograd: bool,
) -> LinearChainResult {
    let mut working_set: SmallVec<[NodeId; 8]> = SmallVec::new();
    let mut extract_subtensor: Option<NodeId> = None;
    let mut mce_operation: Option<NodeId> = None;
    let mut fuse_only_ple: Option<NodeId> = None;
    let mut found_post_conversions = false;
    let mut found_requantizes = false;
    // Live output-format requirement from the most recent analysis; gates
    // admission of post-MCE conversions.
    let mut required_output_format: Option<DataFormat> = None;

    let mut result = LinearChainResult {
        mce_operation: None,
        algorithm: MceAlgorithm::Direct,
        best: None,
    };

    let mut current = Some(first_node);
    while let Some(id) = current {
        let node = graph.node(id);
        let admitted = match node.kind() {
            NodeKind::FormatConversion if mce_operation.is_none() => true,
            NodeKind::ExtractSubtensor { .. }
                if mce_operation.is_none() && extract_subtensor.is_none() =>
            {
                extract_subtensor = Some(id);
                true
            }
            NodeKind::MceOperation(_) if mce_operation.is_none() => {
                mce_operation = Some(id);
                true
            }
            NodeKind::McePostProcess(_)
                if mce_operation.is_some()
                    && fuse_only_ple.is_none()
                    && !found_post_conversions
                    && !found_requantizes =>
            {
                true
            }
            NodeKind::FuseOnlyPle(_)
                if mce_operation.is_some()
                    && fuse_only_ple.is_none()
                    && !found_post_conversions =>
            {
                fuse_only_ple = Some(id);
                true
            }
            NodeKind::Requantize if mce_operation.is_some() => {
                // The requantize folds into the MCE stage, which runs before
                // the PLE; it can only cross a PLE kernel whose result is
                // unaffected by quantisation.
                let admissible = match fuse_only_ple {
                    None => true,
                    Some(ple) => graph
                        .node(ple)
                        .fuse_only_ple_data()
                        .is_some_and(|data| data.agnostic_to_requantisation),
                };
                if admissible {
                    found_requantizes = true;
                }
                admissible
            }
            NodeKind::FormatConversion if mce_operation.is_some() => {
                // Only merge a post-MCE conversion that keeps the output in
                // the format the chosen strategy requires.
                let compatible = required_output_format
                    .map_or(true, |required| node.format() == required);
                if compatible {
                    found_post_conversions = true;
                }
                compatible
            }
            _ => false,
        };
        if !admitted {
            break;
        }
        working_set.push(id);

        required_output_format = None;
        if let Some(mce_id) = mce_operation {
            result.mce_operation = Some(mce_id);
            let Some(mce_data) = graph.node(mce_id).mce_operation_data() else {
                break;
            };
            let ple_data: Option<FuseOnlyPleData> =
                fuse_only_ple.and_then(|ple| graph.node(ple).fuse_only_ple_data().copied());

            let head = working_set[0];
            let tail = working_set[working_set.len() - 1];
            let input_in_sram = graph.input_location(head, 0) == BufferLocation::Sram;
            let input_sram_offset = graph
                .input_source(head, 0)
                .and_then(|source| graph.node(source).output_sram_offset())
                .unwrap_or(0);

            let shape_multiplier = mce_data.shape_multiplier
                * ple_data
                    .map(|data| data.shape_multiplier)
                    .unwrap_or(ShapeMultiplier::IDENTITY);

            let algorithm = select_mce_algorithm(mce_data, caps, enable_winograd);
            result.algorithm = algorithm;
            let weights_shape = if algorithm == MceAlgorithm::Winograd {
                winograd_weights_shape(mce_data.weights.dimensions)
            } else {
                mce_data.weights.dimensions
            };

            // MaxPool 3x3 s2 buffers rows from the neighbouring stripe in
            // the PLE, which bounds how deep a stripe may be.
            let depth_max = match ple_data {
                Some(data)
                    if data.operation
                        == crate::command_stream::PleOperation::MaxPool3x3Stride2 =>
                {
                    if mce_data.operation == MceOperation::DepthwiseConvolution {
                        caps.number_of_srams
                    } else {
                        caps.number_of_ofm
                    }
                }
                _ => u32::MAX,
            };

            let strategies = valid_strategies(mce_data, allowed_strategies);
            let tail_shape = graph.node(tail).shape();
            let valid_block_configs = filter_and_sort_block_configs(
                mce_data,
                ple_data.as_ref(),
                allowed_block_configs,
                caps,
                tail_shape,
                algorithm,
            );
            if valid_block_configs.is_empty() {
                profiling::planner_event("block_configs_empty");
            }

            let mut tensor_config = TensorConfig::default();
            // Strategies are probed against the base occupancy, not against
            // whatever an earlier (shorter) prefix reserved.
            let mut probe_allocator = base_allocator.clone();
            let request = StrategyRequest {
                caps,
                input_shape: graph.input_shape(mce_id, 0),
                output_shape: tail_shape,
                weights_format: mce_data.weights.format,
                weights_shape,
                block_config: BlockConfig::new(0, 0),
                shape_multiplier,
                input_in_sram,
                input_sram_offset,
                algorithm,
                depth_max,
            };
            let strategy_selected = choose_and_setup_strategy(
                &strategies,
                &valid_block_configs,
                request,
                &mut tensor_config,
                &mut probe_allocator,
            );

            if strategy_selected {
                profiling::planner_event("strategy_selected");
                let fully_connected = mce_data.operation == MceOperation::FullyConnected;
                if (tensor_config.output.stripe_shape[3] < tail_shape[3]
                    || tensor_config.output.stripe_shape[2] < tail_shape[2])
                    && !fully_connected
                {
                    // The firmware cannot emit NHWC when the OFM stripes are
                    // not contiguous in DRAM.
                    required_output_format = Some(DataFormat::Nhwcb);
                } else if fully_connected {
                    // Fully connected output is only written as NHWC.
                    required_output_format = Some(DataFormat::Nhwc);
                }

                let mut output_location = BufferLocation::Dram;
                if tensor_config.strategy == StrategyKind::Strategy3
                    && graph.node(tail).format() == DataFormat::Nhwcb
                    && graph.node(tail).location_hint() != LocationHint::RequireDram
                {
                    // The whole output is resident anyway; keep it there.
                    required_output_format = Some(DataFormat::Nhwcb);
                    output_location = BufferLocation::Sram;
                }

                result.best = Some(FusedChain {
                    working_nodes: working_set.clone(),
                    allocator: probe_allocator,
                    tensor_config,
                    valid_block_configs,
                    required_output_format,
                    output_location,
                });
            }
        }

        current = graph.next_linear_node(id);
    }

    result
}
