//! KD-tree over a point set for exact k-nearest neighbor queries in euclidean distance.
//!
//! Results are ordered by `(squared distance, point index)`, the same total order a
//! brute-force scan gives, so ties are resolved towards the lower index whatever the
//! tree layout.

use crate::utils::squared_distance;
use linfa::Float;
use ndarray::{ArrayView1, ArrayView2};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const LEAF_SIZE: usize = 16;

#[derive(Debug, Clone)]
enum Node<F> {
    /// Range of `KdTree::ids` held by the leaf
    Leaf { start: usize, end: usize },
    /// Points of `left` have `x[dim] <= value`, points of `right` have `x[dim] >= value`
    Split {
        dim: usize,
        value: F,
        left: usize,
        right: usize,
    },
}

/// Candidate neighbor ordered by `(distance, id)`
#[derive(Debug, Clone, Copy)]
struct Candidate<F> {
    dist: F,
    id: usize,
}

impl<F: Float> Ord for Candidate<F> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then(self.id.cmp(&other.id))
    }
}

impl<F: Float> PartialOrd for Candidate<F> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<F: Float> PartialEq for Candidate<F> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<F: Float> Eq for Candidate<F> {}

/// Static KD-tree borrowing the rows of a point set, built by median splits along
/// the dimension of largest spread.
#[derive(Debug, Clone)]
pub(crate) struct KdTree<'a, F: Float> {
    points: ArrayView2<'a, F>,
    ids: Vec<usize>,
    nodes: Vec<Node<F>>,
    root: usize,
}

impl<'a, F: Float> KdTree<'a, F> {
    pub fn new(points: ArrayView2<'a, F>) -> Self {
        let mut tree = KdTree {
            points,
            ids: (0..points.nrows()).collect(),
            nodes: Vec::new(),
            root: 0,
        };
        tree.root = tree.build(0, points.nrows());
        tree
    }

    fn build(&mut self, start: usize, end: usize) -> usize {
        if end - start <= LEAF_SIZE || self.points.ncols() == 0 {
            self.nodes.push(Node::Leaf { start, end });
            return self.nodes.len() - 1;
        }
        let dim = self.widest_dim(start, end);
        let points = self.points;
        let mid = (end - start) / 2;
        self.ids[start..end].select_nth_unstable_by(mid, |&a, &b| {
            points[[a, dim]]
                .partial_cmp(&points[[b, dim]])
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        let value = points[[self.ids[start + mid], dim]];
        let left = self.build(start, start + mid);
        let right = self.build(start + mid, end);
        self.nodes.push(Node::Split {
            dim,
            value,
            left,
            right,
        });
        self.nodes.len() - 1
    }

    fn widest_dim(&self, start: usize, end: usize) -> usize {
        (0..self.points.ncols())
            .map(|d| {
                let (lo, hi) = self.ids[start..end].iter().fold(
                    (F::infinity(), F::neg_infinity()),
                    |(lo, hi), &i| {
                        let v = self.points[[i, d]];
                        (lo.min(v), hi.max(v))
                    },
                );
                (d, hi - lo)
            })
            .fold((0, F::neg_infinity()), |best, (d, spread)| {
                if spread > best.1 {
                    (d, spread)
                } else {
                    best
                }
            })
            .0
    }

    /// Indexed point set
    pub fn points(&self) -> ArrayView2<'a, F> {
        self.points
    }

    /// Indices of the `count` nearest points from `point` among those `accept` keeps,
    /// nearest first
    pub fn nearest(
        &self,
        point: &ArrayView1<F>,
        count: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Vec<usize> {
        if count == 0 || self.ids.is_empty() {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(count + 1);
        self.search(self.root, point, count, &accept, &mut heap);
        heap.into_sorted_vec().into_iter().map(|c| c.id).collect()
    }

    fn search(
        &self,
        node: usize,
        point: &ArrayView1<F>,
        count: usize,
        accept: &impl Fn(usize) -> bool,
        heap: &mut BinaryHeap<Candidate<F>>,
    ) {
        match &self.nodes[node] {
            Node::Leaf { start, end } => {
                for &id in self.ids[*start..*end].iter().filter(|&&id| accept(id)) {
                    let dist = squared_distance(point, &self.points.row(id));
                    let dist = if dist.is_nan() { F::infinity() } else { dist };
                    let candidate = Candidate { dist, id };
                    if heap.len() < count {
                        heap.push(candidate);
                    } else if heap.peek().map_or(false, |worst| candidate < *worst) {
                        heap.pop();
                        heap.push(candidate);
                    }
                }
            }
            Node::Split {
                dim,
                value,
                left,
                right,
            } => {
                let diff = point[*dim] - *value;
                let (near, far) = if diff < F::zero() {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                self.search(near, point, count, accept, heap);
                // ties at the bound may still win on the index
                let bound = diff * diff;
                let visit = heap.len() < count
                    || bound.is_nan()
                    || heap.peek().map_or(true, |worst| bound <= worst.dist);
                if visit {
                    self.search(far, point, count, accept, heap);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array, Array2};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn brute_force(
        points: &Array2<f64>,
        point: &ArrayView1<f64>,
        count: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Vec<usize> {
        let mut ranked: Vec<(f64, usize)> = (0..points.nrows())
            .filter(|&i| accept(i))
            .map(|i| (squared_distance(point, &points.row(i)), i))
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
        ranked.into_iter().take(count).map(|(_, i)| i).collect()
    }

    #[test]
    fn test_kdtree_matches_brute_force() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let points = Array::random_using((300, 3), Uniform::new(-1., 1.), &mut rng);
        let queries = Array::random_using((20, 3), Uniform::new(-1.2, 1.2), &mut rng);
        let tree = KdTree::new(points.view());
        for q in queries.rows() {
            for count in [1, 5, 17, 300, 400] {
                assert_eq!(
                    brute_force(&points, &q, count, |_| true),
                    tree.nearest(&q, count, |_| true)
                );
                assert_eq!(
                    brute_force(&points, &q, count, |i| i % 3 != 0),
                    tree.nearest(&q, count, |i| i % 3 != 0)
                );
            }
        }
    }

    #[test]
    fn test_kdtree_ties_on_grid() {
        // integer grid with many equidistant points and duplicates
        let points = Array2::from_shape_fn((200, 2), |(i, j)| ((i * (j + 3)) % 7) as f64);
        let tree = KdTree::new(points.view());
        for i in 0..points.nrows() {
            let q = points.row(i);
            for count in [1, 4, 9, 25] {
                assert_eq!(
                    brute_force(&points, &q, count, |j| j != i),
                    tree.nearest(&q, count, |j| j != i)
                );
                assert_eq!(
                    brute_force(&points, &q, count, |j| j < i),
                    tree.nearest(&q, count, |j| j < i)
                );
            }
        }
    }

    #[test]
    fn test_kdtree_degenerate_sets() {
        let empty = Array2::<f64>::zeros((0, 2));
        let tree = KdTree::new(empty.view());
        assert!(tree.nearest(&array![0., 0.].view(), 3, |_| true).is_empty());

        let points = array![[1.], [0.], [2.]];
        let tree = KdTree::new(points.view());
        assert!(tree.nearest(&array![0.].view(), 0, |_| true).is_empty());
        assert!(tree.nearest(&array![0.].view(), 2, |_| false).is_empty());
        assert_eq!(vec![1, 0, 2], tree.nearest(&array![0.4].view(), 5, |_| true));
    }
}
