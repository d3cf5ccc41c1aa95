//! Pass construction and the hint protocol.
//!
//! Planning either commits a pass or installs exactly one fix-graph hint and
//! reports "no pass". Every hint strictly narrows the next attempt's search
//! space (forces a format, forces DRAM, forces the direct algorithm, forces
//! uncompression), so the plan/fix-graph loop driven by the caller always
//! reaches a steady state.

use std::sync::Arc;

use crate::capabilities::HardwareCapabilities;
use crate::env;
use crate::graph::{BufferLocation, DataFormat, FixGraphHint, Graph, NodeId};
use crate::pass::block_config::{default_block_configs, BlockConfig};
use crate::pass::fuser::find_linear_working_nodes;
use crate::pass::strategies::default_strategies;
use crate::pass::strategy::SramStrategy;
use crate::pass::{McePlePass, MceAlgorithm};
use crate::profiling;
use crate::sram::SramAllocator;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub enable_winograd: bool,
    pub enable_intermediate_compression: bool,
    pub allowed_block_configs: Vec<BlockConfig>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            enable_winograd: true,
            enable_intermediate_compression: true,
            allowed_block_configs: default_block_configs(),
        }
    }
}

/// The single hint a failed attempt installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HintDelta {
    pub node: NodeId,
    pub hint: FixGraphHint,
}

/// Result of one planning attempt. `NoPass` never raises; the optional delta
/// tells the driver whether re-running fusion can make progress.
#[derive(Debug)]
pub enum PlanOutcome {
    Pass(Box<McePlePass>),
    NoPass(Option<HintDelta>),
}

impl PlanOutcome {
    pub fn hint(&self) -> Option<HintDelta> {
        match self {
            PlanOutcome::Pass(_) => None,
            PlanOutcome::NoPass(hint) => *hint,
        }
    }
}

pub struct PassPlanner<'a> {
    capabilities: &'a HardwareCapabilities,
    options: &'a CompileOptions,
    strategies: Vec<Arc<dyn SramStrategy>>,
}

impl<'a> PassPlanner<'a> {
    pub fn new(capabilities: &'a HardwareCapabilities, options: &'a CompileOptions) -> Self {
        PassPlanner {
            capabilities,
            options,
            strategies: default_strategies(),
        }
    }

    /// Replaces the built-in strategy family. Probe order is the list order.
    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn SramStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Greedily forms one pass starting at `first_node`.
    ///
    /// On success the winning allocator snapshot replaces `allocator` (with
    /// transient reservations already released) and the graph is stamped
    /// with the committed placement. On failure `allocator` is untouched and
    /// at most one node's fix-graph hint has been set.
    pub fn plan_pass(
        &self,
        graph: &mut Graph,
        first_node: NodeId,
        allocator: &mut SramAllocator,
        id: usize,
    ) -> PlanOutcome {
        let enable_winograd = self.options.enable_winograd && !env::winograd_disabled();
        let chain = find_linear_working_nodes(
            graph,
            first_node,
            allocator,
            self.capabilities,
            &self.strategies,
            &self.options.allowed_block_configs,
            enable_winograd,
        );

        let Some(mce_id) = chain.mce_operation else {
            // Nothing to build a pass around; the caller moves on.
            profiling::planner_event("plan_no_mce");
            return PlanOutcome::NoPass(None);
        };

        let Some(best) = chain.best else {
            if chain.algorithm == MceAlgorithm::Winograd {
                // Winograd's larger working set may be what starved the
                // search; retry in direct mode.
                profiling::planner_event("hint_algorithm_direct");
                return install_hint(graph, mce_id, FixGraphHint::AlgorithmDirect);
            }
            // SRAM pressure is the remaining suspect: evict something from
            // the dependency cone.
            let in_sram = graph.search_dependencies(mce_id, |node| {
                node.location() == BufferLocation::Sram
            });
            return match in_sram {
                Some(node) => {
                    profiling::planner_event("hint_force_location_dram");
                    install_hint(graph, node, FixGraphHint::ForceLocationDram)
                }
                None => PlanOutcome::NoPass(None),
            };
        };

        let tail = best.tail();
        if let Some(required) = best.required_output_format {
            if graph.node(tail).format() != required {
                profiling::planner_event("hint_convert_output_format");
                return install_hint(graph, tail, FixGraphHint::ConvertOutputTo(required));
            }
        }

        let head = best.head();
        let input_shape = graph.input_shape(head, 0);
        if best.tensor_config.input.stripe_shape[3] < input_shape[3]
            && graph.input_format(head, 0) == DataFormat::Nhwc
        {
            // The firmware cannot read NHWC when the IFM stripes are not
            // contiguous in DRAM.
            if let Some(producer) = graph.input_source(head, 0) {
                profiling::planner_event("hint_convert_input_format");
                return install_hint(
                    graph,
                    producer,
                    FixGraphHint::ConvertOutputTo(DataFormat::Nhwcb),
                );
            }
        }

        if graph.input_compressed(head, 0)
            && (best.tensor_config.input.stripe_shape[2] < input_shape[2]
                || best.tensor_config.input.stripe_shape[3] < input_shape[3])
        {
            // IFM compression needs full-width, full-depth stripes.
            if let Some(producer) = graph.input_source(head, 0) {
                profiling::planner_event("hint_force_input_uncompressed");
                return install_hint(graph, producer, FixGraphHint::ForceUncompressed);
            }
        }

        debug_assert!(best.output_location != BufferLocation::None);

        // Commit: the winning snapshot becomes the master, then everything
        // that does not survive the pass is released. The output region is
        // kept only when the next pass will read it from SRAM.
        *allocator = best.allocator.clone();
        allocator.free(best.tensor_config.weights.offset);
        allocator.free(best.tensor_config.ple_code.offset);
        if graph.input_location(head, 0) != BufferLocation::Sram {
            allocator.free(best.tensor_config.input.offset);
        }
        if best.output_location == BufferLocation::Dram {
            allocator.free(best.tensor_config.output.offset);
        }

        let tail_node = graph.node(tail);
        let use_intermediate_compression = self.options.enable_intermediate_compression
            && tail_node.compression_hint() == crate::graph::CompressionHint::PreferCompressed
            && tail_node.format() == DataFormat::Nhwcb
            && best.output_location == BufferLocation::Dram
            && best.tensor_config.output.stripe_shape[2] >= tail_node.shape()[2]
            && best.tensor_config.output.stripe_shape[3] >= tail_node.shape()[3];

        let sram_offset = best.tensor_config.output.offset;
        let pass = McePlePass::new(
            graph,
            id,
            &best,
            use_intermediate_compression,
            chain.algorithm,
            sram_offset,
        );

        profiling::planner_event("pass_committed");
        if env::plan_stats_enabled() {
            eprintln!(
                "npu-rs: pass {} committed {:?} {}x{} over {} nodes ({} block configs were legal)",
                id,
                pass.tensor_config().strategy,
                pass.tensor_config().block_width,
                pass.tensor_config().block_height,
                pass.nodes().len(),
                best.valid_block_configs.len(),
            );
        }
        PlanOutcome::Pass(Box::new(pass))
    }
}

fn install_hint(graph: &mut Graph, node: NodeId, hint: FixGraphHint) -> PlanOutcome {
    graph.set_fix_graph_hint(node, hint);
    PlanOutcome::NoPass(Some(HintDelta { node, hint }))
}
