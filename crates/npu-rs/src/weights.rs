//! Weight encoder seam.
//!
//! Bit-encoding of the weight stream belongs to the encoder implementation;
//! the planner only derives the stripe geometry the encoder needs and hands
//! the encoded blobs to the buffer table at emission.

use anyhow::Result;

use crate::graph::{MceOperationData, QuantizationInfo, Stride, WeightFormat, WeightsInfo};
use crate::utils::{shape_element_count, TensorShape};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedWeights {
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
}

pub trait WeightEncoder {
    fn encode(
        &self,
        mce: &MceOperationData,
        stripe_depth: u32,
        stripe_size: u32,
        quant_info: QuantizationInfo,
    ) -> Result<EncodedWeights>;
}

/// Derives the stripe size and depth the encoder splits the weight stream
/// by. Depthwise weights are interleaved by the striding, which folds the
/// stride product back out of the stripe depth.
pub fn weight_stripe_size_and_depth(
    weights: &WeightsInfo,
    stride: Stride,
    stripe_shape: TensorShape,
) -> (u32, u32) {
    let stripe_size = stripe_shape[2];
    let stripe_depth = match weights.format {
        WeightFormat::Hwio => stripe_shape[3],
        WeightFormat::Hwim => {
            stripe_shape[2] * stripe_shape[3] / (stride.x * stride.y).max(1)
        }
    };
    (stripe_size, stripe_depth)
}

/// Encoder that emits the raw (zero-filled) weight stream with a fixed-size
/// stripe-table header. Stands in wherever the production bit-packing
/// encoder is not linked.
#[derive(Debug, Default)]
pub struct UncompressedWeightEncoder;

impl WeightEncoder for UncompressedWeightEncoder {
    fn encode(
        &self,
        mce: &MceOperationData,
        stripe_depth: u32,
        stripe_size: u32,
        _quant_info: QuantizationInfo,
    ) -> Result<EncodedWeights> {
        let total = shape_element_count(mce.weights.dimensions);
        let mut metadata = Vec::with_capacity(12);
        metadata.extend_from_slice(&stripe_depth.to_le_bytes());
        metadata.extend_from_slice(&stripe_size.to_le_bytes());
        metadata.extend_from_slice(&total.to_le_bytes());
        Ok(EncodedWeights {
            data: vec![0; total as usize],
            metadata,
        })
    }
}
