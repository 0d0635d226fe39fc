//! Exact integer geometry on pixel rings.
//!
//! Pixels map to the plane as `x = col`, `y = row`. All tests use `i128`
//! arithmetic, so results do not depend on floating-point rounding and are
//! identical for any rotation or reversal of a ring.

use crate::data::Pixel;
use crate::error::GeometryError;

/// Minimum vertex count of a valid polygon.
pub const MIN_POLYGON_VERTICES: usize = 3;

type Xy = (i128, i128);

fn xy(p: Pixel) -> Xy {
    (i128::from(p.col), i128::from(p.row))
}

/// Orientation of `c` relative to the directed line `a -> b`.
fn orientation(a: Xy, b: Xy, c: Xy) -> i128 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

/// Whether `p` lies on the closed segment `a-b`.
fn on_segment(a: Xy, b: Xy, p: Xy) -> bool {
    orientation(a, b, p) == 0
        && p.0 >= a.0.min(b.0)
        && p.0 <= a.0.max(b.0)
        && p.1 >= a.1.min(b.1)
        && p.1 <= a.1.max(b.1)
}

/// Whether closed segments `a-b` and `c-d` share any point.
fn segments_intersect(a: Xy, b: Xy, c: Xy, d: Xy) -> bool {
    let o1 = orientation(a, b, c).signum();
    let o2 = orientation(a, b, d).signum();
    let o3 = orientation(c, d, a).signum();
    let o4 = orientation(c, d, b).signum();

    if o1 != o2 && o3 != o4 && o1 != 0 && o2 != 0 && o3 != 0 && o4 != 0 {
        return true;
    }
    on_segment(a, b, c) || on_segment(a, b, d) || on_segment(c, d, a) || on_segment(c, d, b)
}

/// Even-odd point-in-polygon test with an inclusive boundary.
///
/// Pixels on an edge or vertex are inside. Rings with fewer than three
/// vertices contain nothing.
pub fn contains(ring: &[Pixel], pixel: Pixel) -> bool {
    let n = ring.len();
    if n < MIN_POLYGON_VERTICES {
        return false;
    }
    let p = xy(pixel);

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = xy(ring[i]);
        let b = xy(ring[j]);
        if on_segment(a, b, p) {
            return true;
        }
        if (a.1 > p.1) != (b.1 > p.1) {
            // p.x < a.x + (b.x - a.x) * (p.y - a.y) / (b.y - a.y), without division
            let dy = b.1 - a.1;
            let cross = (b.0 - a.0) * (p.1 - a.1) - (p.0 - a.0) * dy;
            if cross * dy.signum() > 0 {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Twice the signed area of the ring (shoelace sum).
fn doubled_area(ring: &[Pixel]) -> i128 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (a, b) = (xy(ring[i]), xy(ring[(i + 1) % n]));
            a.0 * b.1 - b.0 * a.1
        })
        .sum()
}

/// Check vertex count, repeated vertices, area and that no two non-adjacent
/// edges touch.
pub fn validate_ring(ring: &[Pixel]) -> Result<(), GeometryError> {
    let n = ring.len();
    if n < MIN_POLYGON_VERTICES {
        return Err(GeometryError::TooFewVertices { count: n });
    }
    if let Some(index) = (0..n).find(|&i| ring[i] == ring[(i + 1) % n]) {
        return Err(GeometryError::RepeatedVertex { index });
    }
    if doubled_area(ring) == 0 {
        return Err(GeometryError::ZeroArea);
    }

    let edge = |i: usize| (xy(ring[i]), xy(ring[(i + 1) % n]));
    for i in 0..n {
        for j in (i + 2)..n {
            // First and last edges share vertex 0
            if i == 0 && j == n - 1 {
                continue;
            }
            let (a, b) = edge(i);
            let (c, d) = edge(j);
            if segments_intersect(a, b, c, d) {
                return Err(GeometryError::SelfIntersecting {
                    first: i,
                    second: j,
                });
            }
        }
    }
    Ok(())
}

/// All pixels of a `rows x cols` image inside or on the ring.
///
/// Only the ring's bounding box is scanned. Pixels come out in row-major
/// order.
pub fn ring_pixels(ring: &[Pixel], rows: usize, cols: usize) -> Vec<Pixel> {
    if ring.len() < MIN_POLYGON_VERTICES || rows == 0 || cols == 0 {
        return Vec::new();
    }
    let max_row = u32::try_from(rows - 1).unwrap_or(u32::MAX);
    let max_col = u32::try_from(cols - 1).unwrap_or(u32::MAX);

    let row_lo = ring.iter().map(|p| p.row).min().unwrap_or(0);
    let row_hi = ring.iter().map(|p| p.row).max().unwrap_or(0).min(max_row);
    let col_lo = ring.iter().map(|p| p.col).min().unwrap_or(0);
    let col_hi = ring.iter().map(|p| p.col).max().unwrap_or(0).min(max_col);
    if row_lo > row_hi || col_lo > col_hi {
        return Vec::new();
    }

    (row_lo..=row_hi)
        .flat_map(|row| (col_lo..=col_hi).map(move |col| Pixel::new(row, col)))
        .filter(|&p| contains(ring, p))
        .collect()
}

/// Canonical form of a ring: the smallest vertex sequence over all rotations
/// of the ring and of its reversal.
///
/// Two rings describing the same polygon have the same canonical form.
pub fn canonical_ring(ring: &[Pixel]) -> Vec<Pixel> {
    let n = ring.len();
    let reversed: Vec<Pixel> = ring.iter().rev().copied().collect();
    let mut best: Option<Vec<Pixel>> = None;
    for candidate in [ring, reversed.as_slice()] {
        for shift in 0..n {
            let rotated: Vec<Pixel> = candidate[shift..]
                .iter()
                .chain(&candidate[..shift])
                .copied()
                .collect();
            if best.as_ref().is_none_or(|b| rotated < *b) {
                best = Some(rotated);
            }
        }
    }
    best.unwrap_or_default()
}

/// Euclidean distance from a pixel to the nearest edge of the ring.
pub fn distance_to_ring(ring: &[Pixel], pixel: Pixel) -> f64 {
    let n = ring.len();
    match n {
        0 => f64::INFINITY,
        1 => ring[0].distance_to(&pixel),
        _ => (0..n)
            .map(|i| segment_distance(ring[i], ring[(i + 1) % n], pixel))
            .fold(f64::INFINITY, f64::min),
    }
}

fn segment_distance(a: Pixel, b: Pixel, p: Pixel) -> f64 {
    let (ax, ay) = (f64::from(a.col), f64::from(a.row));
    let (bx, by) = (f64::from(b.col), f64::from(b.row));
    let (px, py) = (f64::from(p.col), f64::from(p.row));
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    ((px - cx).powi(2) + (py - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(points: &[(u32, u32)]) -> Vec<Pixel> {
        points.iter().map(|&p| Pixel::from(p)).collect()
    }

    #[test]
    fn test_triangle_pixels_inclusive() {
        let tri = ring(&[(0, 0), (0, 2), (2, 0)]);
        let pixels = ring_pixels(&tri, 5, 5);
        let expected = ring(&[(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (2, 0)]);
        assert_eq!(pixels, expected);
    }

    #[test]
    fn test_square_interior_and_outside() {
        let square = ring(&[(1, 1), (1, 4), (4, 4), (4, 1)]);
        assert!(contains(&square, Pixel::new(2, 3)));
        assert!(contains(&square, Pixel::new(1, 2))); // edge
        assert!(contains(&square, Pixel::new(4, 4))); // vertex
        assert!(!contains(&square, Pixel::new(0, 2)));
        assert!(!contains(&square, Pixel::new(5, 5)));
        assert_eq!(ring_pixels(&square, 10, 10).len(), 16);
    }

    #[test]
    fn test_concave_even_odd() {
        // U shape opening upwards (towards row 0)
        let u = ring(&[(0, 0), (4, 0), (4, 4), (0, 4), (0, 3), (3, 3), (3, 1), (0, 1)]);
        assert!(contains(&u, Pixel::new(4, 2)));
        assert!(!contains(&u, Pixel::new(1, 2)));
        assert!(contains(&u, Pixel::new(1, 0)));
    }

    #[test]
    fn test_invariant_under_rotation_and_reversal() {
        let base = ring(&[(0, 0), (1, 6), (5, 7), (7, 2), (3, 3)]);
        let expected = ring_pixels(&base, 10, 10);

        for shift in 0..base.len() {
            let mut rotated = base.clone();
            rotated.rotate_left(shift);
            assert_eq!(ring_pixels(&rotated, 10, 10), expected);
            rotated.reverse();
            assert_eq!(ring_pixels(&rotated, 10, 10), expected);
        }
    }

    #[test]
    fn test_ring_pixels_clipped_to_image() {
        let big = ring(&[(0, 0), (0, 100), (100, 100), (100, 0)]);
        assert_eq!(ring_pixels(&big, 3, 4).len(), 12);
    }

    #[test]
    fn test_validate_ring() {
        assert_eq!(
            validate_ring(&ring(&[(0, 0), (1, 1)])),
            Err(GeometryError::TooFewVertices { count: 2 })
        );
        assert!(validate_ring(&ring(&[(0, 0), (0, 2), (2, 0)])).is_ok());
        assert!(validate_ring(&ring(&[(0, 0), (0, 4), (4, 4), (4, 0)])).is_ok());

        // Bow tie: edges 0 and 2 cross
        let bow_tie = ring(&[(0, 0), (4, 4), (0, 4), (4, 0)]);
        assert_eq!(
            validate_ring(&bow_tie),
            Err(GeometryError::SelfIntersecting {
                first: 0,
                second: 2
            })
        );
    }

    #[test]
    fn test_validate_ring_rejects_degenerate() {
        assert_eq!(
            validate_ring(&ring(&[(0, 0), (0, 3), (0, 3), (3, 3)])),
            Err(GeometryError::RepeatedVertex { index: 1 })
        );
        // Closing edge back onto the first vertex
        assert_eq!(
            validate_ring(&ring(&[(0, 0), (0, 3), (3, 3), (0, 0)])),
            Err(GeometryError::RepeatedVertex { index: 3 })
        );
        assert_eq!(
            validate_ring(&ring(&[(0, 0), (0, 1), (0, 2)])),
            Err(GeometryError::ZeroArea)
        );
        assert_eq!(
            validate_ring(&ring(&[(0, 0), (2, 2), (5, 5), (1, 1)])),
            Err(GeometryError::ZeroArea)
        );
    }

    #[test]
    fn test_far_coordinates_do_not_overflow() {
        let max = u32::MAX;
        let huge = ring(&[(0, 0), (0, max), (max, max)]);
        assert!(validate_ring(&huge).is_ok());
        assert!(contains(&huge, Pixel::new(max - 1, max)));
        assert!(!contains(&huge, Pixel::new(max, 0)));
    }

    #[test]
    fn test_canonical_ring() {
        let a = ring(&[(2, 2), (0, 0), (0, 5)]);
        let b = ring(&[(0, 5), (0, 0), (2, 2)]);
        let c = ring(&[(0, 0), (0, 5), (2, 2)]);
        assert_eq!(canonical_ring(&a), canonical_ring(&b));
        assert_eq!(canonical_ring(&a), canonical_ring(&c));
        assert_eq!(canonical_ring(&a)[0], Pixel::new(0, 0));
        assert_ne!(
            canonical_ring(&a),
            canonical_ring(&ring(&[(0, 0), (0, 5), (3, 3)]))
        );
    }

    #[test]
    fn test_distance_to_ring() {
        let square = ring(&[(0, 0), (0, 4), (4, 4), (4, 0)]);
        assert_eq!(distance_to_ring(&square, Pixel::new(2, 6)), 2.0);
        assert_eq!(distance_to_ring(&square, Pixel::new(0, 2)), 0.0);
    }
}
