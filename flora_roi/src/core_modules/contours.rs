// THEORY:
// Contours serve three purposes. Their number is the complexity signal of the
// segmentation policy: a clean foreground/background split yields a few
// borders, a cluttered photograph yields many. Their shape is used by the leaf
// path, which keeps only the outline enclosing the largest area. And the edge
// path fills every large closed outline of an edge map to make it solid.
//
// Both outer borders and hole borders are returned, so a ring counts twice.

use crate::core_modules::mask::FOREGROUND;
use image::{GrayImage, Luma};
use imageproc::contours::{Contour, find_contours};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

pub fn contours(binary: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(binary)
}

pub fn count_contours(binary: &GrayImage) -> usize {
    contours(binary).len()
}

/// Area enclosed by a closed polygon, by the shoelace formula.
pub fn shoelace_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    twice.abs() as f64 / 2.0
}

/// Points of the contour with the largest enclosed area. Ties keep the first found.
pub fn largest_contour(binary: &GrayImage) -> Option<Vec<Point<i32>>> {
    let mut best: Option<(f64, Vec<Point<i32>>)> = None;
    for contour in contours(binary) {
        let area = shoelace_area(&contour.points);
        if best.as_ref().is_none_or(|(best_area, _)| area > *best_area) {
            best = Some((area, contour.points));
        }
    }
    best.map(|(_, points)| points)
}

/// Paints onto `canvas` the interior of every contour of `binary` enclosing more
/// than `min_area`. Returns how many outlines were filled.
pub fn fill_large_outlines(canvas: &mut GrayImage, binary: &GrayImage, min_area: f64) -> usize {
    let mut filled = 0;
    for contour in contours(binary) {
        let mut points = contour.points;
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 || shoelace_area(&points) <= min_area {
            continue;
        }
        draw_polygon_mut(canvas, &points, Luma([FOREGROUND]));
        filled += 1;
    }
    filled
}
