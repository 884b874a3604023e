//! Test data builders for creating test objects

use mda_bridge::types::{AcquisitionShape, Dimension, FramePlane, PixelData, StagePosition};

/// Builder for creating test acquisition shapes
pub struct ShapeBuilder {
    dims: Vec<Dimension>,
}

impl ShapeBuilder {
    pub fn new() -> Self {
        Self { dims: Vec::new() }
    }

    pub fn bounded(mut self, name: &str, length: usize) -> Self {
        self.dims.push(Dimension::bounded(name, length));
        self
    }

    pub fn unbounded(mut self, name: &str) -> Self {
        self.dims.push(Dimension::unbounded(name));
        self
    }

    pub fn build(self) -> AcquisitionShape {
        AcquisitionShape::new(self.dims).expect("valid test shape")
    }
}

/// Builder for creating test planes
pub struct PlaneBuilder {
    width: u32,
    height: u32,
    value: u16,
    stage: Option<StagePosition>,
}

impl PlaneBuilder {
    pub fn new() -> Self {
        Self {
            width: 4,
            height: 4,
            value: 0,
            stage: None,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Fill every sample with `value`
    pub fn value(mut self, value: u16) -> Self {
        self.value = value;
        self
    }

    pub fn stage(mut self, x: f64, y: f64, z: f64) -> Self {
        self.stage = Some(StagePosition::xyz(x, y, z));
        self
    }

    pub fn build(self) -> FramePlane {
        let len = (self.width * self.height) as usize;
        let plane = FramePlane::new(self.width, self.height, PixelData::U16(vec![self.value; len]))
            .expect("valid test plane");
        match self.stage {
            Some(stage) => plane.with_stage(stage),
            None => plane,
        }
    }
}

/// Plane whose samples all equal `value`
pub fn plane(value: u16) -> FramePlane {
    PlaneBuilder::new().value(value).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_builder() {
        let shape = ShapeBuilder::new().unbounded("t").bounded("c", 2).build();
        assert_eq!(shape.ndim(), 2);
        assert!(shape.is_growable());
    }

    #[test]
    fn test_plane_builder() {
        let plane = PlaneBuilder::new().size(2, 3).value(9).stage(1.0, 2.0, 3.0).build();
        assert_eq!(plane.pixels.len(), 6);
        assert_eq!(plane.pixels.sample(5), Some(9));
        assert!(plane.metadata.stage.is_some());
    }
}
