//! Id-indexed store for the operation graph the planner walks.
//!
//! The graph is a DAG of tensor-producing nodes built once by the front end.
//! The planner never rewires edges; it only writes hint fields. Graph
//! re-shaping in response to those hints happens in [`Graph::fix_graph`],
//! which the compile driver runs between planning attempts.

mod node;

pub use node::{
    AlgorithmHint, BufferLocation, CompressionHint, DataFormat, FixGraphHint, FuseOnlyPleData,
    InputEdge, LocationHint, MceOperation, MceOperationData, McePostProcessData, Node, NodeId,
    NodeKind, PassId, QuantizationInfo, Stride, WeightFormat, WeightsInfo,
};

use crate::pass::MceAlgorithm;
use crate::profiling;
use crate::utils::TensorShape;

#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add_node(
        &mut self,
        kind: NodeKind,
        shape: TensorShape,
        format: DataFormat,
        quant_info: QuantizationInfo,
        inputs: &[NodeId],
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            kind,
            shape,
            format,
            quant_info,
            inputs: inputs
                .iter()
                .map(|&source| InputEdge {
                    source,
                    output_index: 0,
                })
                .collect(),
            location: BufferLocation::None,
            compressed: false,
            compression_hint: CompressionHint::default(),
            location_hint: LocationHint::default(),
            fix_graph_hint: FixGraphHint::default(),
            algorithm: None,
            output_sram_offset: None,
            buffer_id: None,
            pass: None,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|node| node.id)
    }

    pub fn input_source(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.node(id).inputs.get(index).map(|edge| edge.source)
    }

    pub fn input_shape(&self, id: NodeId, index: usize) -> TensorShape {
        self.input_source(id, index)
            .map(|source| self.node(source).shape)
            .unwrap_or([0; 4])
    }

    pub fn input_format(&self, id: NodeId, index: usize) -> DataFormat {
        self.input_source(id, index)
            .map(|source| self.node(source).format)
            .unwrap_or(DataFormat::Nhwc)
    }

    pub fn input_location(&self, id: NodeId, index: usize) -> BufferLocation {
        self.input_source(id, index)
            .map(|source| self.node(source).location)
            .unwrap_or(BufferLocation::None)
    }

    pub fn input_compressed(&self, id: NodeId, index: usize) -> bool {
        self.input_source(id, index)
            .map(|source| self.node(source).compressed)
            .unwrap_or(false)
    }

    pub fn input_quant_info(&self, id: NodeId, index: usize) -> QuantizationInfo {
        self.input_source(id, index)
            .map(|source| self.node(source).quant_info)
            .unwrap_or(QuantizationInfo::new(0, 1.0))
    }

    /// Nodes that consume `id`'s output, in graph order.
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| node.inputs.iter().any(|edge| edge.source == id))
            .map(|node| node.id)
            .collect()
    }

    /// The next node of a single-consumer chain: `id`'s unique consumer,
    /// provided that consumer takes no other input.
    pub fn next_linear_node(&self, id: NodeId) -> Option<NodeId> {
        let consumers = self.consumers(id);
        match consumers.as_slice() {
            [single] if self.node(*single).inputs.len() == 1 => Some(*single),
            _ => None,
        }
    }

    /// Breadth-first search through `start`'s dependency cone for the first
    /// node satisfying `predicate`. Visit order is deterministic: input edges
    /// in declaration order, nearest dependencies first.
    pub fn search_dependencies(
        &self,
        start: NodeId,
        predicate: impl Fn(&Node) -> bool,
    ) -> Option<NodeId> {
        let mut queue: Vec<NodeId> = self
            .node(start)
            .inputs
            .iter()
            .map(|edge| edge.source)
            .collect();
        let mut visited = vec![false; self.nodes.len()];
        let mut cursor = 0;
        while cursor < queue.len() {
            let id = queue[cursor];
            cursor += 1;
            if std::mem::replace(&mut visited[id.0 as usize], true) {
                continue;
            }
            let node = self.node(id);
            if predicate(node) {
                return Some(id);
            }
            queue.extend(node.inputs.iter().map(|edge| edge.source));
        }
        None
    }

    /// Installs a re-shape request on `id`. An existing hint is only replaced
    /// by a strictly stronger one; weaker or equal requests are dropped.
    /// Returns whether the field changed.
    pub fn set_fix_graph_hint(&mut self, id: NodeId, hint: FixGraphHint) -> bool {
        let node = self.node_mut(id);
        if hint.strength() > node.fix_graph_hint.strength() {
            node.fix_graph_hint = hint;
            return true;
        }
        false
    }

    /// `RequiredUncompressed` sticks once installed.
    pub fn set_compression_hint(&mut self, id: NodeId, hint: CompressionHint) {
        let node = self.node_mut(id);
        if node.compression_hint != CompressionHint::RequiredUncompressed {
            node.compression_hint = hint;
        }
    }

    /// `RequireDram` sticks once installed.
    pub fn set_location_hint(&mut self, id: NodeId, hint: LocationHint) {
        let node = self.node_mut(id);
        if node.location_hint != LocationHint::RequireDram {
            node.location_hint = hint;
        }
    }

    pub fn set_location(&mut self, id: NodeId, location: BufferLocation) {
        self.node_mut(id).location = location;
    }

    pub fn set_compressed(&mut self, id: NodeId, compressed: bool) {
        self.node_mut(id).compressed = compressed;
    }

    pub fn set_output_sram_offset(&mut self, id: NodeId, offset: u32) {
        self.node_mut(id).output_sram_offset = Some(offset);
    }

    pub fn set_buffer_id(&mut self, id: NodeId, buffer_id: u32) {
        self.node_mut(id).buffer_id = Some(buffer_id);
    }

    pub(crate) fn assign_pass(&mut self, id: NodeId, pass: PassId) {
        self.node_mut(id).pass = Some(pass);
    }

    pub(crate) fn set_mce_algorithm(&mut self, id: NodeId, algorithm: MceAlgorithm) {
        self.node_mut(id).algorithm = Some(algorithm);
    }

    /// Applies and clears every pending fix-graph hint. Returns whether the
    /// graph changed. Run by the compile driver between planning attempts;
    /// each application strictly narrows the next attempt's search space, so
    /// the plan/fix loop cannot cycle.
    pub fn fix_graph(&mut self) -> bool {
        let pending: Vec<(NodeId, FixGraphHint)> = self
            .nodes
            .iter()
            .filter(|node| node.fix_graph_hint != FixGraphHint::None)
            .map(|node| (node.id, node.fix_graph_hint))
            .collect();

        for &(id, hint) in &pending {
            match hint {
                FixGraphHint::None => {}
                FixGraphHint::ConvertOutputTo(format) => {
                    self.insert_conversion_after(id, format);
                    profiling::planner_event("fix_graph_insert_conversion");
                }
                FixGraphHint::ForceLocationDram => {
                    self.set_location_hint(id, LocationHint::RequireDram);
                    profiling::planner_event("fix_graph_require_dram");
                }
                FixGraphHint::ForceUncompressed => {
                    self.set_compression_hint(id, CompressionHint::RequiredUncompressed);
                    profiling::planner_event("fix_graph_require_uncompressed");
                }
                FixGraphHint::AlgorithmDirect => {
                    if let NodeKind::MceOperation(data) = &mut self.node_mut(id).kind {
                        data.algorithm_hint = AlgorithmHint::RequireDirect;
                    }
                    profiling::planner_event("fix_graph_require_direct");
                }
            }
            self.node_mut(id).fix_graph_hint = FixGraphHint::None;
        }
        !pending.is_empty()
    }

    fn insert_conversion_after(&mut self, id: NodeId, format: DataFormat) {
        let consumers = self.consumers(id);
        let (shape, quant_info, location) = {
            let node = self.node(id);
            (node.shape, node.quant_info, node.location)
        };
        let conversion = self.add_node(NodeKind::FormatConversion, shape, format, quant_info, &[id]);
        self.node_mut(conversion).location = location;
        for consumer in consumers {
            for edge in &mut self.node_mut(consumer).inputs {
                if edge.source == id {
                    edge.source = conversion;
                }
            }
        }
    }
}
