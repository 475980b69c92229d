use serde::{Deserialize, Serialize};

/// One color sample with four independent float channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Position of a pixel within its source image.
///
/// Coordinates are non-negative and bounded by the image dimensions; that
/// invariant belongs to the producer, not to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One element of the transform stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    pub color: Color,
    pub point: Point,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_roundtrip() {
        let pixel = Pixel {
            color: Color {
                r: 0.25,
                g: 0.5,
                b: 0.75,
                a: 1.0,
            },
            point: Point { x: 3, y: 7 },
        };
        let bytes = postcard::to_allocvec(&pixel).unwrap();
        let back: Pixel = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, pixel);
    }
}
