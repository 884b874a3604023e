//! Core data types for the acquisition bridge
//!
//! This module contains the fundamental data structures shared by the
//! indexer, the frame buffer, the event channel and the engine.
//!
//! # Main Types
//!
//! - [`AcquisitionShape`] - Ordered, uniquely-named dimensions of a sequence
//! - [`Coordinate`] - A point in acquisition space (dimension name → index)
//! - [`FramePlane`] - One captured image with its per-frame metadata
//! - [`PropertyValue`] - A hardware-reported scalar value
//!
//! # Axis Names
//!
//! Dimension names are free-form, but the usual microscope axes are provided
//! as constants in [`axis`]: time (`t`), stage position (`p`), grid (`g`),
//! channel (`c`) and focus (`z`).

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Conventional dimension names
pub mod axis {
    pub const TIME: &str = "t";
    pub const POSITION: &str = "p";
    pub const GRID: &str = "g";
    pub const CHANNEL: &str = "c";
    pub const Z: &str = "z";
    /// Image row axis, appended after the acquisition dimensions
    pub const Y: &str = "y";
    /// Image column axis, appended after the acquisition dimensions
    pub const X: &str = "x";
}

/// Declared length of one acquisition dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimLength {
    /// Final size known at sequence start
    Bounded(usize),
    /// Final size unknown until the sequence ends (open-ended time series)
    Unbounded,
}

impl DimLength {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, DimLength::Unbounded)
    }

    /// The declared length, if bounded
    pub fn bound(&self) -> Option<usize> {
        match self {
            DimLength::Bounded(n) => Some(*n),
            DimLength::Unbounded => None,
        }
    }
}

impl fmt::Display for DimLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimLength::Bounded(n) => write!(f, "{}", n),
            DimLength::Unbounded => write!(f, "∞"),
        }
    }
}

/// A named dimension of an acquisition sequence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub length: DimLength,
}

impl Dimension {
    /// A dimension with a known length. A length of 0 is stored as 1.
    pub fn bounded(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length: DimLength::Bounded(length.max(1)),
        }
    }

    /// A dimension whose length grows as frames arrive
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: DimLength::Unbounded,
        }
    }
}

/// Ordered sequence of uniquely-named dimensions declared at sequence start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Dimension>", into = "Vec<Dimension>")]
pub struct AcquisitionShape {
    dims: Vec<Dimension>,
}

impl AcquisitionShape {
    /// Build a shape, rejecting duplicate or empty dimension names
    pub fn new(dims: Vec<Dimension>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(dims.len());
        for dim in &dims {
            if dim.name.is_empty() {
                return Err(BridgeError::InvalidShape(
                    "dimension names must not be empty".to_string(),
                ));
            }
            if !seen.insert(dim.name.as_str()) {
                return Err(BridgeError::InvalidShape(format!(
                    "duplicate dimension '{}'",
                    dim.name
                )));
            }
        }
        let dims = dims
            .into_iter()
            .map(|d| match d.length {
                DimLength::Bounded(0) => Dimension::bounded(d.name, 1),
                _ => d,
            })
            .collect();
        Ok(Self { dims })
    }

    /// Convenience constructor from `(name, length)` pairs, `None` meaning unbounded
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Option<usize>)>) -> Result<Self> {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, len)| match len {
                    Some(n) => Dimension::bounded(name, n),
                    None => Dimension::unbounded(name),
                })
                .collect(),
        )
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Position of a dimension in the shape order
    pub fn axis_of(&self, name: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dims.iter().find(|d| d.name == name)
    }

    /// Whether any dimension is unbounded
    pub fn is_growable(&self) -> bool {
        self.dims.iter().any(|d| d.length.is_unbounded())
    }

    /// Dimension names in order
    pub fn names(&self) -> Vec<&str> {
        self.dims.iter().map(|d| d.name.as_str()).collect()
    }

    /// Rebuild a coordinate from a dense position tuple in shape order
    pub fn coordinate_at(&self, position: &[usize]) -> Coordinate {
        self.dims
            .iter()
            .zip(position)
            .fold(Coordinate::new(), |c, (d, &i)| c.with(d.name.clone(), i))
    }
}

impl TryFrom<Vec<Dimension>> for AcquisitionShape {
    type Error = BridgeError;

    fn try_from(dims: Vec<Dimension>) -> Result<Self> {
        Self::new(dims)
    }
}

impl From<AcquisitionShape> for Vec<Dimension> {
    fn from(shape: AcquisitionShape) -> Self {
        shape.dims
    }
}

impl fmt::Display for AcquisitionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .dims
            .iter()
            .map(|d| format!("{}:{}", d.name, d.length))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// A point in acquisition space: dimension name → index
///
/// Dimensions the coordinate does not mention resolve to index 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coordinate(BTreeMap<String, usize>);

impl Coordinate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion
    pub fn with(mut self, name: impl Into<String>, index: usize) -> Self {
        self.0.insert(name.into(), index);
        self
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, usize)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    pub fn set(&mut self, name: impl Into<String>, index: usize) {
        self.0.insert(name.into(), index);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Stage position reported with a frame, in micrometers
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl StagePosition {
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }
}

/// Pixel samples of a plane, stored row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PixelData {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl PixelData {
    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bits per sample
    pub fn bit_depth(&self) -> u8 {
        match self {
            PixelData::U8(_) => 8,
            PixelData::U16(_) => 16,
            PixelData::U32(_) => 32,
        }
    }

    /// Zero-filled samples for the given bit depth (rounded up to 8/16/32)
    pub fn zeroed(bit_depth: u8, len: usize) -> Self {
        match bit_depth {
            0..=8 => PixelData::U8(vec![0; len]),
            9..=16 => PixelData::U16(vec![0; len]),
            _ => PixelData::U32(vec![0; len]),
        }
    }

    /// Sample at a flat index as u32
    pub fn sample(&self, index: usize) -> Option<u32> {
        match self {
            PixelData::U8(v) => v.get(index).map(|&s| s as u32),
            PixelData::U16(v) => v.get(index).map(|&s| s as u32),
            PixelData::U32(v) => v.get(index).copied(),
        }
    }
}

/// Per-frame metadata captured alongside the pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneMetadata {
    pub captured_at: DateTime<Utc>,
    /// Exposure used for this frame in milliseconds
    pub exposure_ms: f64,
    #[serde(default)]
    pub stage: Option<StagePosition>,
    /// Free-form hardware metadata (camera, binning, ...)
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Default for PlaneMetadata {
    fn default() -> Self {
        Self {
            captured_at: Utc::now(),
            exposure_ms: 0.0,
            stage: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One captured image. Immutable once built; slots hold it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePlane {
    pub width: u32,
    pub height: u32,
    pub pixels: PixelData,
    pub metadata: PlaneMetadata,
}

impl FramePlane {
    /// Build a plane, checking the sample count against the geometry
    pub fn new(width: u32, height: u32, pixels: PixelData) -> Result<Self> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(BridgeError::Serialization(format!(
                "plane {}x{} needs {} samples, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            metadata: PlaneMetadata::default(),
        })
    }

    pub fn with_metadata(mut self, metadata: PlaneMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_exposure(mut self, exposure_ms: f64) -> Self {
        self.metadata.exposure_ms = exposure_ms;
        self
    }

    pub fn with_stage(mut self, stage: StagePosition) -> Self {
        self.metadata.stage = Some(stage);
        self
    }

    /// Number of bytes occupied by the samples
    pub fn payload_bytes(&self) -> usize {
        self.pixels.len() * (self.pixels.bit_depth() as usize / 8)
    }
}

/// Value of a hardware-reported property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    /// Stage position in micrometers
    Position { x: f64, y: f64, z: Option<f64> },
}

impl PropertyValue {
    /// Numeric view of the value, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            PropertyValue::Text(s) => s.trim().parse().ok(),
            PropertyValue::Position { .. } => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::Text(v) => write!(f, "{}", v),
            PropertyValue::Position { x, y, z: Some(z) } => write!(f, "({}, {}, {})", x, y, z),
            PropertyValue::Position { x, y, z: None } => write!(f, "({}, {})", x, y),
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_rejects_duplicates() {
        let err = AcquisitionShape::from_pairs([("t", Some(3)), ("t", Some(2))]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidShape(_)));
    }

    #[test]
    fn test_shape_normalizes_zero_length() {
        let shape = AcquisitionShape::from_pairs([("t", Some(0)), ("c", Some(2))]).unwrap();
        assert_eq!(shape.dims()[0].length, DimLength::Bounded(1));
    }

    #[test]
    fn test_shape_serde_validates() {
        let json = r#"[{"name":"t","length":"Unbounded"},{"name":"t","length":{"Bounded":2}}]"#;
        assert!(serde_json::from_str::<AcquisitionShape>(json).is_err());
    }

    #[test]
    fn test_shape_display() {
        let shape = AcquisitionShape::from_pairs([("t", None), ("c", Some(2))]).unwrap();
        assert_eq!(shape.to_string(), "{t:∞, c:2}");
    }

    #[test]
    fn test_coordinate_at_round_trip() {
        let shape = AcquisitionShape::from_pairs([("t", Some(3)), ("c", Some(2))]).unwrap();
        let coord = shape.coordinate_at(&[2, 1]);
        assert_eq!(coord, Coordinate::from_pairs([("t", 2), ("c", 1)]));
    }

    #[test]
    fn test_plane_sample_count_checked() {
        assert!(FramePlane::new(2, 2, PixelData::U16(vec![0; 3])).is_err());
        let plane = FramePlane::new(2, 2, PixelData::U16(vec![1; 4])).unwrap();
        assert_eq!(plane.payload_bytes(), 8);
    }

    #[test]
    fn test_property_value_numeric() {
        assert_eq!(PropertyValue::Text(" 12.5".into()).as_f64(), Some(12.5));
        assert_eq!(PropertyValue::Int(50).as_f64(), Some(50.0));
        assert_eq!(
            PropertyValue::Position {
                x: 1.0,
                y: 2.0,
                z: None
            }
            .as_f64(),
            None
        );
    }
}
