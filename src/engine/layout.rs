//! Partitioning a sequence into layers
//!
//! A sequence that splits channels or positions is stored as one session per
//! split index instead of one session with that axis. Positions split
//! outermost, then channels, so partition `p * channels + c` holds position
//! `p` and channel `c`. Frames are routed by their split indices and written
//! with those axes removed from the coordinate.

use crate::channel::SequenceDescriptor;
use crate::error::{BridgeError, IndexError, Result};
use crate::types::{axis, AcquisitionShape, Coordinate, Dimension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SplitAxis {
    name: &'static str,
    length: usize,
}

/// One layer of a sequence and the shape its session is created with
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Layer label, `None` when the sequence is not split
    pub label: Option<String>,
    pub shape: AcquisitionShape,
}

/// How a sequence's coordinates map onto its sessions
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceLayout {
    splits: Vec<SplitAxis>,
    partitions: Vec<Partition>,
}

impl SequenceLayout {
    /// Plan the layers for `shape`; a split flag whose axis the shape lacks is ignored
    pub fn plan(shape: &AcquisitionShape, descriptor: &SequenceDescriptor) -> Result<Self> {
        let mut splits = Vec::new();
        for (enabled, name) in [
            (descriptor.split_positions, axis::POSITION),
            (descriptor.split_channels, axis::CHANNEL),
        ] {
            let Some(dim) = shape.dimension(name).filter(|_| enabled) else {
                continue;
            };
            let length = dim.length.bound().ok_or_else(|| {
                BridgeError::InvalidShape(format!("cannot split unbounded dimension '{}'", name))
            })?;
            splits.push(SplitAxis { name, length });
        }

        if splits.is_empty() {
            return Ok(Self {
                splits,
                partitions: vec![Partition {
                    label: None,
                    shape: shape.clone(),
                }],
            });
        }

        let count = splits
            .iter()
            .try_fold(1usize, |acc, s| acc.checked_mul(s.length))
            .ok_or_else(|| BridgeError::InvalidShape("too many layers".to_string()))?;
        let local: Vec<Dimension> = shape
            .dims()
            .iter()
            .filter(|d| !splits.iter().any(|s| s.name == d.name))
            .cloned()
            .collect();

        let mut partitions = Vec::with_capacity(count);
        for partition in 0..count {
            let mut labels = Vec::with_capacity(splits.len());
            let mut dims = local.clone();
            for (split, index) in splits.iter().zip(split_indices(&splits, partition)) {
                if split.name == axis::POSITION {
                    let plan = descriptor.positions.get(index);
                    labels.push(
                        plan.and_then(|p| p.name.clone())
                            .unwrap_or_else(|| format!("Pos{:03}", index)),
                    );
                    if let Some(size) = plan.and_then(|p| p.grid_size) {
                        for dim in dims.iter_mut().filter(|d| d.name == axis::GRID) {
                            *dim = Dimension::bounded(axis::GRID, size);
                        }
                    }
                } else {
                    labels.push(match descriptor.channel_names.get(index) {
                        Some(config) => format!("{}_{:03}", config, index),
                        None => format!("Ch{:03}", index),
                    });
                }
            }
            partitions.push(Partition {
                label: Some(labels.join("_")),
                shape: AcquisitionShape::new(dims)?,
            });
        }

        Ok(Self { splits, partitions })
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn is_split(&self) -> bool {
        !self.splits.is_empty()
    }

    /// Partition index for a coordinate and its coordinate within that partition
    ///
    /// Missing split indices default to 0, as missing dimensions do everywhere else.
    pub fn route(&self, coord: &Coordinate) -> std::result::Result<(usize, Coordinate), IndexError> {
        if self.splits.is_empty() {
            return Ok((0, coord.clone()));
        }

        let mut partition = 0;
        for split in &self.splits {
            let index = coord.get(split.name).unwrap_or(0);
            if index >= split.length {
                return Err(IndexError::OutOfRange {
                    dimension: split.name.to_string(),
                    index,
                    length: split.length,
                });
            }
            partition = partition * split.length + index;
        }

        let local = coord
            .iter()
            .filter(|(name, _)| !self.splits.iter().any(|s| s.name == *name))
            .fold(Coordinate::new(), |local, (name, index)| local.with(name, index));
        Ok((partition, local))
    }
}

/// Row-major split indices of a partition
fn split_indices(splits: &[SplitAxis], mut partition: usize) -> Vec<usize> {
    let mut indices = vec![0; splits.len()];
    for (slot, split) in indices.iter_mut().zip(splits).rev() {
        *slot = partition % split.length;
        partition /= split.length;
    }
    indices
}
