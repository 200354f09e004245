//! Static k-d tree over `D`-dimensional points.
//!
//! The tree is stored implicitly: `order` is a permutation of point indices in
//! which every subtree occupies a contiguous range whose middle element is the
//! splitting node. Points with a non-finite coordinate are not indexed.

#[derive(Debug, Clone)]
pub struct KdTree<const D: usize> {
    points: Vec<[f64; D]>,
    order: Vec<usize>,
}

impl<const D: usize> KdTree<D> {
    pub fn build(points: Vec<[f64; D]>) -> Self {
        let mut order: Vec<usize> = (0..points.len())
            .filter(|&i| points[i].iter().all(|c| c.is_finite()))
            .collect();
        build_range(&points, &mut order, 0);
        Self { points, order }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<&[f64; D]> {
        self.points.get(index)
    }

    /// Index of and distance to the closest indexed point. Equidistant
    /// candidates resolve to the lowest index.
    pub fn nearest(&self, query: &[f64; D]) -> Option<(usize, f64)> {
        if self.order.is_empty() || !query.iter().all(|c| c.is_finite()) {
            return None;
        }
        let mut best: Option<(usize, f64)> = None;
        self.nearest_in(0, self.order.len(), 0, query, &mut best);
        best.map(|(index, d2)| (index, d2.sqrt()))
    }

    /// Indices of all points within `radius` (inclusive), ascending.
    pub fn within_radius(&self, query: &[f64; D], radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        if self.order.is_empty() || !query.iter().all(|c| c.is_finite()) || radius < 0.0 {
            return found;
        }
        self.radius_in(0, self.order.len(), 0, query, radius, &mut found);
        found.sort_unstable();
        found
    }

    fn nearest_in(
        &self,
        lo: usize,
        hi: usize,
        depth: usize,
        query: &[f64; D],
        best: &mut Option<(usize, f64)>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let index = self.order[mid];
        let point = &self.points[index];

        let d2 = distance_squared(point, query);
        let better = match *best {
            None => true,
            Some((best_index, best_d2)) => d2 < best_d2 || (d2 == best_d2 && index < best_index),
        };
        if better {
            *best = Some((index, d2));
        }

        let axis = depth % D;
        let diff = query[axis] - point[axis];
        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.nearest_in(near.0, near.1, depth + 1, query, best);
        // Equal distance still needs the far side for the lowest-index rule.
        if best.map_or(true, |(_, best_d2)| diff * diff <= best_d2) {
            self.nearest_in(far.0, far.1, depth + 1, query, best);
        }
    }

    fn radius_in(
        &self,
        lo: usize,
        hi: usize,
        depth: usize,
        query: &[f64; D],
        radius: f64,
        found: &mut Vec<usize>,
    ) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        let index = self.order[mid];
        let point = &self.points[index];

        if distance_squared(point, query) <= radius * radius {
            found.push(index);
        }

        let axis = depth % D;
        if query[axis] - radius <= point[axis] {
            self.radius_in(lo, mid, depth + 1, query, radius, found);
        }
        if query[axis] + radius >= point[axis] {
            self.radius_in(mid + 1, hi, depth + 1, query, radius, found);
        }
    }
}

fn build_range<const D: usize>(points: &[[f64; D]], order: &mut [usize], depth: usize) {
    if order.len() <= 1 {
        return;
    }
    let axis = depth % D;
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| points[a][axis].total_cmp(&points[b][axis]));

    let (left, right) = order.split_at_mut(mid);
    build_range(points, left, depth + 1);
    build_range(points, &mut right[1..], depth + 1);
}

fn distance_squared<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_nearest(points: &[[f64; 2]], query: &[f64; 2]) -> (usize, f64) {
        let mut best = (usize::MAX, f64::INFINITY);
        for (i, p) in points.iter().enumerate() {
            let d = distance_squared(p, query).sqrt();
            if d < best.1 {
                best = (i, d);
            }
        }
        best
    }

    fn grid() -> Vec<[f64; 2]> {
        let mut points = Vec::new();
        for i in 0..17 {
            for j in 0..13 {
                let x = i as f64 * 0.7 + (j as f64 * 0.13).sin();
                let y = j as f64 * 1.1 + (i as f64 * 0.29).cos();
                points.push([x, y]);
            }
        }
        points
    }

    #[test]
    fn nearest_agrees_with_brute_force() {
        let points = grid();
        let tree = KdTree::build(points.clone());
        assert_eq!(tree.len(), points.len());

        for k in 0..50 {
            let query = [k as f64 * 0.23 - 1.0, 14.0 - k as f64 * 0.31];
            let (index, distance) = tree.nearest(&query).unwrap();
            let (expected_index, expected_distance) = brute_nearest(&points, &query);
            assert!((distance - expected_distance).abs() < 1e-12);
            assert_eq!(index, expected_index);
        }
    }

    #[test]
    fn within_radius_agrees_with_brute_force() {
        let points = grid();
        let tree = KdTree::build(points.clone());
        for k in 0..30 {
            let query = [k as f64 * 0.4, k as f64 * 0.5];
            let radius = 0.5 + k as f64 * 0.1;
            let expected: Vec<usize> = (0..points.len())
                .filter(|&i| distance_squared(&points[i], &query) <= radius * radius)
                .collect();
            assert_eq!(tree.within_radius(&query, radius), expected);
        }
    }

    #[test]
    fn ties_resolve_to_lowest_index() {
        let points = vec![[1.0, 0.0], [-1.0, 0.0], [0.0, 1.0], [0.0, -1.0]];
        let tree = KdTree::build(points);
        let (index, distance) = tree.nearest(&[0.0, 0.0]).unwrap();
        assert_eq!(index, 0);
        assert_eq!(distance, 1.0);

        let duplicates = vec![[2.0, 2.0], [5.0, 5.0], [2.0, 2.0], [2.0, 2.0]];
        let tree = KdTree::build(duplicates);
        assert_eq!(tree.nearest(&[2.0, 2.0]).unwrap().0, 0);
    }

    #[test]
    fn radius_is_inclusive() {
        let tree = KdTree::build(vec![[0.0, 0.0], [0.0, 0.5]]);
        assert_eq!(tree.within_radius(&[0.0, 0.0], 0.5), vec![0, 1]);
        assert_eq!(tree.within_radius(&[0.0, 0.0], 0.49), vec![0]);
    }

    #[test]
    fn non_finite_points_are_skipped() {
        let tree = KdTree::build(vec![[f64::NAN, 0.0], [1.0, 1.0], [0.0, f64::INFINITY]]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.nearest(&[0.0, 0.0]).unwrap().0, 1);
        assert!(tree.nearest(&[f64::NAN, 0.0]).is_none());
        assert!(tree.within_radius(&[0.0, 0.0], 100.0) == vec![1]);
    }

    #[test]
    fn empty_tree() {
        let tree: KdTree<2> = KdTree::build(Vec::new());
        assert!(tree.is_empty());
        assert!(tree.nearest(&[0.0, 0.0]).is_none());
        assert!(tree.within_radius(&[0.0, 0.0], 1.0).is_empty());
    }
}
