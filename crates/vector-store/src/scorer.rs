use crate::config::Metric;
use crate::device::ComputeDevice;
use candle_core::{Device, Tensor};
use ndarray::{ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Failure of one batch on one device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScoreError {
    #[error("device out of memory: {0}")]
    OutOfMemory(String),
    #[error("{0}")]
    Failed(String),
}

/// Scores one contiguous batch of row-major vectors against a query.
///
/// `batch.len() == rows * dimension`. The result holds one raw score per row in input order:
/// dot product for [`Metric::Ip`], squared Euclidean distance for [`Metric::L2`].
pub trait BatchScorer: Send + Sync {
    fn score(
        &self,
        device: ComputeDevice,
        batch: &[f32],
        rows: usize,
        dimension: usize,
        query: &[f32],
        metric: Metric,
    ) -> Result<Vec<f32>, ScoreError>;
}

/// Production scorer: candle tensors on CUDA/Metal, ndarray on CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct TensorScorer;

impl BatchScorer for TensorScorer {
    fn score(
        &self,
        device: ComputeDevice,
        batch: &[f32],
        rows: usize,
        dimension: usize,
        query: &[f32],
        metric: Metric,
    ) -> Result<Vec<f32>, ScoreError> {
        match device {
            ComputeDevice::Cpu => score_cpu(batch, rows, dimension, query, metric),
            ComputeDevice::Cuda => {
                let device = Device::new_cuda(0).map_err(|e| classify(&e))?;
                score_tensor(&device, batch, rows, dimension, query, metric)
                    .map_err(|e| classify(&e))
            }
            ComputeDevice::Mps => {
                let device = Device::new_metal(0).map_err(|e| classify(&e))?;
                score_tensor(&device, batch, rows, dimension, query, metric)
                    .map_err(|e| classify(&e))
            }
        }
    }
}

fn score_cpu(
    batch: &[f32],
    rows: usize,
    dimension: usize,
    query: &[f32],
    metric: Metric,
) -> Result<Vec<f32>, ScoreError> {
    let matrix = ArrayView2::from_shape((rows, dimension), batch)
        .map_err(|e| ScoreError::Failed(format!("bad batch shape: {e}")))?;
    let query = ArrayView1::from(query);
    let scores = match metric {
        Metric::Ip => matrix.dot(&query),
        Metric::L2 => (&matrix - &query).mapv(|v| v * v).sum_axis(Axis(1)),
    };
    Ok(scores.to_vec())
}

fn score_tensor(
    device: &Device,
    batch: &[f32],
    rows: usize,
    dimension: usize,
    query: &[f32],
    metric: Metric,
) -> candle_core::Result<Vec<f32>> {
    let matrix = Tensor::from_slice(batch, (rows, dimension), device)?;
    let scores = match metric {
        Metric::Ip => {
            let query = Tensor::from_slice(query, (dimension, 1), device)?;
            matrix.matmul(&query)?
        }
        Metric::L2 => {
            let query = Tensor::from_slice(query, (1, dimension), device)?;
            matrix.broadcast_sub(&query)?.sqr()?.sum_keepdim(1)?
        }
    };
    scores.flatten_all()?.to_vec1::<f32>()
}

// candle reports allocation failures as driver strings, not a typed variant.
fn classify(err: &candle_core::Error) -> ScoreError {
    let message = err.to_string();
    if is_out_of_memory(&message) {
        ScoreError::OutOfMemory(message)
    } else {
        ScoreError::Failed(message)
    }
}

fn is_out_of_memory(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["out of memory", "out_of_memory", "outofmemory", "failed to allocate"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BATCH: [f32; 6] = [1.0, 0.0, 0.0, 1.0, 0.5, 0.5];

    #[test]
    fn cpu_inner_product() {
        let scores = TensorScorer
            .score(ComputeDevice::Cpu, &BATCH, 3, 2, &[2.0, 1.0], Metric::Ip)
            .unwrap();
        assert_eq!(scores, vec![2.0, 1.0, 1.5]);
    }

    #[test]
    fn cpu_squared_l2() {
        let scores = TensorScorer
            .score(ComputeDevice::Cpu, &BATCH, 3, 2, &[1.0, 1.0], Metric::L2)
            .unwrap();
        assert_eq!(scores, vec![1.0, 1.0, 0.5]);
    }

    #[test]
    fn cpu_rejects_inconsistent_shape() {
        let err = TensorScorer
            .score(ComputeDevice::Cpu, &BATCH, 4, 2, &[1.0, 1.0], Metric::Ip)
            .unwrap_err();
        assert!(matches!(err, ScoreError::Failed(_)));
    }

    #[test]
    fn candle_cpu_device_matches_ndarray() {
        let ip = score_tensor(&Device::Cpu, &BATCH, 3, 2, &[2.0, 1.0], Metric::Ip).unwrap();
        assert_eq!(ip, vec![2.0, 1.0, 1.5]);
        let l2 = score_tensor(&Device::Cpu, &BATCH, 3, 2, &[1.0, 1.0], Metric::L2).unwrap();
        assert_eq!(l2, vec![1.0, 1.0, 0.5]);
    }

    #[test]
    fn out_of_memory_messages_are_recognised() {
        assert!(is_out_of_memory("CUDA_ERROR_OUT_OF_MEMORY"));
        assert!(is_out_of_memory("Metal: failed to allocate buffer"));
        assert!(!is_out_of_memory("shape mismatch in matmul"));
    }
}
