//! Planar geometry used by greedy and recovery forwarding

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A position on the plane, in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Create a new position
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Build a position from the unsigned coordinates carried on the wire
    pub fn from_wire(x: u64, y: u64) -> Self {
        Self {
            x: x as f64,
            y: y as f64,
        }
    }

    /// Coordinates as carried on the wire
    ///
    /// Fractional parts are truncated and negative values clamp to zero.
    pub fn to_wire(&self) -> (u64, u64) {
        (self.x as u64, self.y as u64)
    }

    /// Euclidean distance to another position
    pub fn distance(&self, other: &Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Counterclockwise angle in degrees, in `[0, 360)`, swept from the edge
    /// `self -> reference` to the edge `self -> node`.
    ///
    /// Both edges are normalised to unit vectors and the angle is the
    /// negated argument of their complex quotient `AC / AB`. Returns `NaN`
    /// when either edge has zero length.
    pub fn angle_between(&self, reference: &Position, node: &Position) -> f64 {
        let ab = unit(node.x - self.x, node.y - self.y);
        let ac = unit(reference.x - self.x, reference.y - self.y);

        let (Some(ab), Some(ac)) = (ab, ac) else {
            return f64::NAN;
        };

        // arg(AC / AB) for unit vectors is atan2(cross(AB, AC), dot(AB, AC))
        let re = ac.0 * ab.0 + ac.1 * ab.1;
        let im = ac.1 * ab.0 - ac.0 * ab.1;
        let angle = -im.atan2(re).to_degrees();

        if angle < 0.0 { angle + 360.0 } else { angle }
    }
}

fn unit(x: f64, y: f64) -> Option<(f64, f64)> {
    let len = x.hypot(y);
    if len == 0.0 || !len.is_finite() {
        None
    } else {
        Some((x / len, y / len))
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_angle(centre: Position, degrees: f64, radius: f64) -> Position {
        let rad = degrees.to_radians();
        Position::new(centre.x + radius * rad.cos(), centre.y + radius * rad.sin())
    }

    #[test]
    fn test_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
    }

    #[test]
    fn test_angle_counterclockwise() {
        let centre = Position::new(100.0, 100.0);
        let reference = at_angle(centre, 0.0, 10.0);

        for expected in [10.0, 45.0, 90.0, 180.0, 270.0, 350.0] {
            let node = at_angle(centre, expected, 25.0);
            let angle = centre.angle_between(&reference, &node);
            assert!(
                (angle - expected).abs() < 1e-9,
                "expected {expected}, got {angle}"
            );
        }
    }

    #[test]
    fn test_angle_relative_to_rotated_reference() {
        let centre = Position::new(0.0, 0.0);
        let reference = at_angle(centre, 90.0, 1.0);
        let node = at_angle(centre, 60.0, 1.0);

        // 60 degrees is 330 degrees counterclockwise from 90
        let angle = centre.angle_between(&reference, &node);
        assert!((angle - 330.0).abs() < 1e-9);
    }

    #[test]
    fn test_angle_to_reference_is_zero() {
        let centre = Position::new(0.0, 0.0);
        let reference = Position::new(5.0, 5.0);
        assert_eq!(centre.angle_between(&reference, &reference), 0.0);
    }

    #[test]
    fn test_angle_degenerate_edge() {
        let centre = Position::new(1.0, 1.0);
        let reference = Position::new(2.0, 1.0);
        assert!(centre.angle_between(&reference, &centre).is_nan());
    }

    #[test]
    fn test_wire_coordinates() {
        let p = Position::new(12.9, 3.2);
        assert_eq!(p.to_wire(), (12, 3));
        assert_eq!(Position::from_wire(12, 3), Position::new(12.0, 3.0));

        let negative = Position::new(-4.0, 7.0);
        assert_eq!(negative.to_wire(), (0, 7));
    }
}
