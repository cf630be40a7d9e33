use crate::models::{CropRegion, OrientedBox};
use imageproc::point::Point;

/// Absolute polygon area by the shoelace formula.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0f64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice_area += p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
    }
    twice_area.abs() / 2.0
}

pub fn convex_hull(points: &[Point<i32>]) -> Vec<Point<i32>> {
    if points.len() < 3 {
        return points.to_vec();
    }
    imageproc::geometry::convex_hull(points)
}

/// Minimum-area enclosing rectangle, found by testing every hull edge as a
/// candidate rectangle side.
pub fn min_area_rect(points: &[Point<i32>]) -> OrientedBox {
    let hull = convex_hull(points);
    let Some(first) = hull.first() else {
        return OrientedBox {
            center: (0.0, 0.0),
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        };
    };
    let to_f = |p: &Point<i32>| (p.x as f64, p.y as f64);

    if hull.len() == 1 {
        return OrientedBox {
            center: to_f(first),
            width: 0.0,
            height: 0.0,
            angle: 0.0,
        };
    }

    let mut best: Option<(f64, OrientedBox)> = None;
    for i in 0..hull.len() {
        let (ax, ay) = to_f(&hull[i]);
        let (bx, by) = to_f(&hull[(i + 1) % hull.len()]);
        let len = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = ((bx - ax) / len, (by - ay) / len);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_v, mut max_v) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &hull {
            let (px, py) = (p.x as f64 - ax, p.y as f64 - ay);
            let pu = px * ux + py * uy;
            let pv = px * vx + py * vy;
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }
        let width = max_u - min_u;
        let height = max_v - min_v;
        let area = width * height;
        let mid_u = (min_u + max_u) / 2.0;
        let mid_v = (min_v + max_v) / 2.0;
        let rect = OrientedBox {
            center: (ax + ux * mid_u + vx * mid_v, ay + uy * mid_u + vy * mid_v),
            width,
            height,
            angle: uy.atan2(ux).to_degrees(),
        };
        let better = match &best {
            Some((best_area, best_rect)) => {
                let long_side = rect.width.max(rect.height);
                let best_long_side = best_rect.width.max(best_rect.height);
                area < *best_area || (area == *best_area && long_side > best_long_side)
            }
            None => true,
        };
        if better {
            best = Some((area, rect));
        }
    }

    best.map(|(_, rect)| rect).unwrap_or(OrientedBox {
        center: to_f(first),
        width: 0.0,
        height: 0.0,
        angle: 0.0,
    })
}

pub fn box_corners(rect: &OrientedBox) -> [(f64, f64); 4] {
    let theta = rect.angle.to_radians();
    let (ux, uy) = (theta.cos(), theta.sin());
    let (vx, vy) = (-uy, ux);
    let (hw, hh) = (rect.width / 2.0, rect.height / 2.0);
    let (cx, cy) = rect.center;
    [
        (cx - ux * hw - vx * hh, cy - uy * hw - vy * hh),
        (cx + ux * hw - vx * hh, cy + uy * hw - vy * hh),
        (cx + ux * hw + vx * hh, cy + uy * hw + vy * hh),
        (cx - ux * hw + vx * hh, cy - uy * hw + vy * hh),
    ]
}

/// Integer axis-aligned bounds of the rotated box, as `(x, y, width, height)`.
/// Corners are truncated toward zero and the extent is inclusive.
pub fn bounding_rect(rect: &OrientedBox) -> (i64, i64, i64, i64) {
    // snap away trig noise so 9.9999999 does not truncate to 9
    let snap = |v: f64| ((v * 1e6).round() / 1e6).trunc() as i64;
    let corners = box_corners(rect);
    let xs = corners.iter().map(|c| snap(c.0));
    let ys = corners.iter().map(|c| snap(c.1));
    let (min_x, max_x) = xs.fold((i64::MAX, i64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let (min_y, max_y) = ys.fold((i64::MAX, i64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
}

/// Expands `(x, y, w, h)` by `ratio` of each side on both ends and clips to
/// the image. Returns `None` if nothing of the box lies inside the image.
pub fn pad_and_clip(
    bounds: (i64, i64, i64, i64),
    ratio: f64,
    image_width: u32,
    image_height: u32,
) -> Option<CropRegion> {
    let (x, y, w, h) = bounds;
    let pad_x = (w as f64 * ratio) as i64;
    let pad_y = (h as f64 * ratio) as i64;

    let x0 = (x - pad_x).max(0);
    let y0 = (y - pad_y).max(0);
    let w = (w + 2 * pad_x).min(image_width as i64 - x0);
    let h = (h + 2 * pad_y).min(image_height as i64 - y0);
    if w <= 0 || h <= 0 || x0 >= image_width as i64 || y0 >= image_height as i64 {
        return None;
    }
    Some(CropRegion {
        x: x0 as u32,
        y: y0 as u32,
        width: w as u32,
        height: h as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_points(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<Point<i32>> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn area_of_square() {
        assert_eq!(polygon_area(&rect_points(0, 0, 10, 10)), 100.0);
        assert_eq!(polygon_area(&[Point::new(0, 0), Point::new(5, 5)]), 0.0);
    }

    #[test]
    fn hull_of_l_shape_covers_notch() {
        let l_shape = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 4),
            Point::new(4, 4),
            Point::new(4, 10),
            Point::new(0, 10),
        ];
        let hull = convex_hull(&l_shape);
        assert!(polygon_area(&hull) > polygon_area(&l_shape));
        assert_eq!(polygon_area(&l_shape), 64.0);
    }

    #[test]
    fn axis_aligned_rect_is_recovered() {
        let rect = min_area_rect(&rect_points(10, 20, 70, 60));
        let (long, short) = (rect.width.max(rect.height), rect.width.min(rect.height));
        assert!((long - 60.0).abs() < 1e-9);
        assert!((short - 40.0).abs() < 1e-9);
        assert!((rect.center.0 - 40.0).abs() < 1e-9);
        assert!((rect.center.1 - 40.0).abs() < 1e-9);
    }

    #[test]
    fn rotated_square_keeps_side_length() {
        let diamond = vec![
            Point::new(10, 0),
            Point::new(20, 10),
            Point::new(10, 20),
            Point::new(0, 10),
        ];
        let rect = min_area_rect(&diamond);
        let side = (200.0f64).sqrt();
        assert!((rect.width - side).abs() < 1e-9);
        assert!((rect.height - side).abs() < 1e-9);
        assert!((rect.angle.abs() % 90.0 - 45.0).abs() < 1e-9);
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let line = vec![Point::new(0, 0), Point::new(5, 0), Point::new(10, 0)];
        let rect = min_area_rect(&line);
        assert_eq!(rect.width.min(rect.height), 0.0);
        assert_eq!(min_area_rect(&[]).width, 0.0);
    }

    #[test]
    fn bounding_rect_is_inclusive() {
        let rect = min_area_rect(&rect_points(10, 20, 70, 60));
        assert_eq!(bounding_rect(&rect), (10, 20, 61, 41));
    }

    #[test]
    fn bounding_rect_of_rotated_box() {
        let rect = OrientedBox {
            center: (50.0, 50.0),
            width: 20.0,
            height: 20.0,
            angle: 45.0,
        };
        let half_diag = 200.0f64.sqrt();
        let corners = box_corners(&rect);
        for (x, y) in corners {
            let on_axis = ((x - 50.0).abs() < 1e-9 && ((y - 50.0).abs() - half_diag).abs() < 1e-9)
                || ((y - 50.0).abs() < 1e-9 && ((x - 50.0).abs() - half_diag).abs() < 1e-9);
            assert!(on_axis, "corner ({x}, {y}) should lie on an axis through the centre");
        }
        // corners at 50 +/- 14.142..., truncated to 35 and 64
        assert_eq!(bounding_rect(&rect), (35, 35, 30, 30));
    }

    #[test]
    fn bounding_rect_of_recovered_diamond() {
        let diamond = vec![
            Point::new(10, 0),
            Point::new(20, 10),
            Point::new(10, 20),
            Point::new(0, 10),
        ];
        assert_eq!(bounding_rect(&min_area_rect(&diamond)), (0, 0, 21, 21));
    }

    #[test]
    fn padding_clips_to_image() {
        let region = pad_and_clip((10, 10, 100, 50), 0.08, 640, 480).unwrap();
        assert_eq!(region, CropRegion { x: 2, y: 6, width: 116, height: 58 });

        let clipped = pad_and_clip((0, 0, 640, 480), 0.08, 640, 480).unwrap();
        assert_eq!(clipped, CropRegion { x: 0, y: 0, width: 640, height: 480 });

        assert!(pad_and_clip((700, 10, 20, 20), 0.08, 640, 480).is_none());
    }
}
