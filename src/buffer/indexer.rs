//! Coordinate resolution
//!
//! Maps a named [`Coordinate`] onto a dense position tuple and a row-major
//! linear offset, given an [`AcquisitionShape`] and the buffer's current
//! extents. Resolution is a pure function of its inputs.
//!
//! Bounded dimensions reject indices at or beyond their declared length.
//! Unbounded dimensions accept any index; when it does not fit the current
//! extent the result is [`Resolution::Grow`], carrying the minimum extents
//! the buffer must reach before the coordinate can be stored.

use crate::error::IndexError;
use crate::types::{AcquisitionShape, Coordinate, DimLength};

/// Outcome of resolving a coordinate against a shape and its current extents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The coordinate fits; `linear` is its row-major slot offset
    Slot { position: Vec<usize>, linear: usize },
    /// The coordinate lies beyond the current extent of an unbounded dimension
    Grow {
        position: Vec<usize>,
        required: Vec<usize>,
    },
}

impl Resolution {
    /// Dense position tuple in shape order
    pub fn position(&self) -> &[usize] {
        match self {
            Resolution::Slot { position, .. } | Resolution::Grow { position, .. } => position,
        }
    }

    /// Linear offset, if the coordinate fits the current extents
    pub fn linear(&self) -> Option<usize> {
        match self {
            Resolution::Slot { linear, .. } => Some(*linear),
            Resolution::Grow { .. } => None,
        }
    }
}

/// Starting extents for a shape: declared length for bounded dimensions, 1 otherwise
pub fn canonical_extents(shape: &AcquisitionShape) -> Vec<usize> {
    shape
        .dims()
        .iter()
        .map(|d| d.length.bound().unwrap_or(1))
        .collect()
}

/// Dense position tuple for a coordinate. Missing dimensions default to 0.
pub fn position_of(shape: &AcquisitionShape, coord: &Coordinate) -> Result<Vec<usize>, IndexError> {
    for (name, _) in coord.iter() {
        if shape.axis_of(name).is_none() {
            return Err(IndexError::UnknownDimension {
                name: name.to_string(),
            });
        }
    }

    shape
        .dims()
        .iter()
        .map(|dim| {
            let index = coord.get(&dim.name).unwrap_or(0);
            match dim.length {
                DimLength::Bounded(length) if index >= length => Err(IndexError::OutOfRange {
                    dimension: dim.name.clone(),
                    index,
                    length,
                }),
                _ => Ok(index),
            }
        })
        .collect()
}

/// Row-major offset of a position within extents, or `None` if it does not fit
pub fn linear_offset(position: &[usize], extents: &[usize]) -> Option<usize> {
    if position.len() != extents.len() {
        return None;
    }
    let mut offset = 0usize;
    for (&p, &e) in position.iter().zip(extents) {
        if p >= e {
            return None;
        }
        offset = offset.checked_mul(e)?.checked_add(p)?;
    }
    Some(offset)
}

/// Total slot count for extents, `None` on overflow
pub fn slot_count(extents: &[usize]) -> Option<usize> {
    extents.iter().try_fold(1usize, |acc, &e| acc.checked_mul(e))
}

/// Resolve a coordinate against a shape and the buffer's current extents
pub fn resolve(
    shape: &AcquisitionShape,
    extents: &[usize],
    coord: &Coordinate,
) -> Result<Resolution, IndexError> {
    let position = position_of(shape, coord)?;

    match linear_offset(&position, extents) {
        Some(linear) => Ok(Resolution::Slot { position, linear }),
        None => {
            let required = position
                .iter()
                .zip(extents)
                .zip(shape.dims())
                .map(|((&p, &e), dim)| {
                    p.checked_add(1)
                        .map(|needed| e.max(needed))
                        .ok_or_else(|| IndexError::ExtentOverflow {
                            dimension: dim.name.clone(),
                            index: p,
                        })
                })
                .collect::<Result<Vec<usize>, IndexError>>()?;
            Ok(Resolution::Grow { position, required })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::axis;
    use std::collections::HashSet;

    fn tc_shape() -> AcquisitionShape {
        AcquisitionShape::from_pairs([(axis::TIME, Some(3)), (axis::CHANNEL, Some(2))]).unwrap()
    }

    #[test]
    fn test_row_major_layout() {
        let shape = tc_shape();
        let extents = canonical_extents(&shape);
        let r = resolve(&shape, &extents, &Coordinate::from_pairs([("t", 1), ("c", 1)])).unwrap();
        assert_eq!(r.linear(), Some(3));
        assert_eq!(r.position(), &[1, 1]);
    }

    #[test]
    fn test_missing_dimension_defaults_to_zero() {
        let shape = tc_shape();
        let extents = canonical_extents(&shape);
        let r = resolve(&shape, &extents, &Coordinate::new().with("c", 1)).unwrap();
        assert_eq!(r.position(), &[0, 1]);
        assert_eq!(r.linear(), Some(1));
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let shape = tc_shape();
        let err = resolve(&shape, &[3, 2], &Coordinate::new().with("z", 0)).unwrap_err();
        assert_eq!(
            err,
            IndexError::UnknownDimension {
                name: "z".to_string()
            }
        );
    }

    #[test]
    fn test_bounded_out_of_range_rejected() {
        let shape = tc_shape();
        let err = resolve(&shape, &[3, 2], &Coordinate::new().with("c", 2)).unwrap_err();
        assert!(matches!(err, IndexError::OutOfRange { index: 2, length: 2, .. }));
    }

    #[test]
    fn test_unbounded_reports_growth() {
        let shape = AcquisitionShape::from_pairs([("t", None), ("c", Some(2))]).unwrap();
        let extents = canonical_extents(&shape);
        assert_eq!(extents, vec![1, 2]);

        let r = resolve(&shape, &extents, &Coordinate::new().with("t", 5)).unwrap();
        assert_eq!(
            r,
            Resolution::Grow {
                position: vec![5, 0],
                required: vec![6, 2],
            }
        );
    }

    #[test]
    fn test_unaddressable_index_rejected() {
        let shape = AcquisitionShape::from_pairs([("t", None)]).unwrap();
        let err = resolve(&shape, &[8], &Coordinate::new().with("t", usize::MAX)).unwrap_err();
        assert_eq!(
            err,
            IndexError::ExtentOverflow {
                dimension: "t".to_string(),
                index: usize::MAX,
            }
        );
    }

    #[test]
    fn test_slot_count_overflow() {
        assert_eq!(slot_count(&[2, 3, 4]), Some(24));
        assert_eq!(slot_count(&[usize::MAX, 2]), None);
    }

    #[test]
    fn test_injective_over_full_grid() {
        let shape = AcquisitionShape::from_pairs([("t", Some(4)), ("c", Some(3)), ("z", Some(5))])
            .unwrap();
        let extents = canonical_extents(&shape);
        let mut seen = HashSet::new();
        for t in 0..4 {
            for c in 0..3 {
                for z in 0..5 {
                    let coord = Coordinate::from_pairs([("t", t), ("c", c), ("z", z)]);
                    let linear = resolve(&shape, &extents, &coord).unwrap().linear().unwrap();
                    assert!(linear < 60);
                    assert!(seen.insert(linear));
                }
            }
        }
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_resolve_is_deterministic(
            t in 0usize..8, c in 0usize..4, z in 0usize..6
        ) {
            let shape = AcquisitionShape::from_pairs([("t", None), ("c", Some(4)), ("z", Some(6))]).unwrap();
            let extents = vec![8, 4, 6];
            let coord = Coordinate::from_pairs([("t", t), ("c", c), ("z", z)]);
            let a = resolve(&shape, &extents, &coord).unwrap();
            let b = resolve(&shape, &extents, &coord).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn test_distinct_coordinates_distinct_offsets(
            a in (0usize..8, 0usize..4, 0usize..6),
            b in (0usize..8, 0usize..4, 0usize..6)
        ) {
            let shape = AcquisitionShape::from_pairs([("t", None), ("c", Some(4)), ("z", Some(6))]).unwrap();
            let extents = vec![8, 4, 6];
            let ca = Coordinate::from_pairs([("t", a.0), ("c", a.1), ("z", a.2)]);
            let cb = Coordinate::from_pairs([("t", b.0), ("c", b.1), ("z", b.2)]);
            let la = resolve(&shape, &extents, &ca).unwrap().linear().unwrap();
            let lb = resolve(&shape, &extents, &cb).unwrap().linear().unwrap();
            prop_assert_eq!(a == b, la == lb);
        }

        #[test]
        fn test_growth_requirement_covers_position(
            t in 0usize..1000, current in 1usize..64
        ) {
            let shape = AcquisitionShape::from_pairs([("t", None)]).unwrap();
            let r = resolve(&shape, &[current], &Coordinate::new().with("t", t)).unwrap();
            match r {
                Resolution::Slot { linear, .. } => prop_assert!(t < current && linear == t),
                Resolution::Grow { required, .. } => {
                    prop_assert!(t >= current);
                    prop_assert_eq!(required, vec![t + 1]);
                }
            }
        }
    }
}
