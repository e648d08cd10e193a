use kiddo::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Slack added to the kd-tree query radius; membership is decided on exact distances.
const QUERY_EPSILON: f64 = 1e-9;

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }

    /// Groups indices by root. Groups are ordered by their lowest member; members ascend.
    fn into_groups(mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut group_of_root = vec![usize::MAX; n];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = self.find(i);
            if group_of_root[root] == usize::MAX {
                group_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[group_of_root[root]].push(i);
        }
        groups
    }
}

fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

/// Flat single-linkage clustering with a distance cutoff.
///
/// Two points share a cluster when they are connected by a chain of points each no more than
/// `cutoff` apart. Returns clusters as lists of input indices; clusters are ordered by their
/// lowest index, so the result is deterministic for a fixed input order.
pub fn single_linkage(points: &[[f64; 3]], cutoff: f64) -> Vec<Vec<usize>> {
    if points.is_empty() {
        return Vec::new();
    }

    let kdtree: ImmutableKdTree<f64, u64, 3, 32> = ImmutableKdTree::new_from_slice(points);

    let cutoff_sq = cutoff * cutoff;
    let mut sets = DisjointSet::new(points.len());
    for (i, p) in points.iter().enumerate() {
        let neighbours = kdtree.within_unsorted::<SquaredEuclidean>(p, cutoff_sq + QUERY_EPSILON);
        for neighbour in neighbours {
            let j = neighbour.item as usize;
            if j != i && squared_distance(p, &points[j]) <= cutoff_sq {
                sets.union(i, j);
            }
        }
    }
    sets.into_groups()
}

/// Candidate merge between two points, ordered by distance and then by point indices.
#[derive(Debug, Clone, Copy)]
struct Edge {
    distance_sq: f64,
    low: usize,
    high: usize,
    source: usize,
}

impl Edge {
    fn new(distance_sq: f64, source: usize, target: usize) -> Self {
        Self {
            distance_sq,
            low: source.min(target),
            high: source.max(target),
            source,
        }
    }

    fn key(&self) -> (f64, usize, usize) {
        (self.distance_sq, self.low, self.high)
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.key(), other.key());
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
            .then(self.source.cmp(&other.source))
    }
}

/// One point's neighbours in ascending `(distance, index)` order, pulled from the kd-tree in
/// spherical shells of doubling radius.
struct NeighbourShells {
    radius: f64,
    pending: Vec<(f64, usize)>,
    exhausted: bool,
}

impl NeighbourShells {
    fn new() -> Self {
        Self {
            radius: 0.0,
            pending: Vec::new(),
            exhausted: false,
        }
    }

    fn next(
        &mut self,
        index: usize,
        points: &[[f64; 3]],
        kdtree: &ImmutableKdTree<f64, u64, 3, 32>,
        initial_radius: f64,
    ) -> Option<(f64, usize)> {
        loop {
            if let Some(next) = self.pending.pop() {
                return Some(next);
            }
            if self.exhausted {
                return None;
            }

            let inner_sq = if self.radius > 0.0 {
                self.radius * self.radius
            } else {
                -1.0
            };
            self.radius = if self.radius > 0.0 {
                self.radius * 2.0
            } else {
                initial_radius
            };
            let outer_sq = self.radius * self.radius;

            let p = &points[index];
            let found = kdtree.within_unsorted::<SquaredEuclidean>(p, outer_sq + QUERY_EPSILON);
            if found.len() >= points.len() || !outer_sq.is_finite() {
                self.exhausted = true;
            }
            self.pending = found
                .into_iter()
                .map(|neighbour| neighbour.item as usize)
                .filter(|&j| j != index)
                .map(|j| (squared_distance(p, &points[j]), j))
                .filter(|&(d, _)| d > inner_sq && d <= outer_sq)
                .collect();
            // Descending, so `pop` yields the nearest first.
            self.pending.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));
        }
    }
}

/// Starting shell radius: the spacing points would have if spread evenly over their
/// bounding box.
fn initial_shell_radius(points: &[[f64; 3]]) -> f64 {
    let mut extent: f64 = 0.0;
    for axis in 0..3 {
        let (lo, hi) = points
            .iter()
            .map(|p| p[axis])
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if hi >= lo {
            extent = extent.max(hi - lo);
        }
    }
    let radius = extent / (points.len() as f64).cbrt();
    if radius.is_finite() && radius > 0.0 {
        radius
    } else {
        1.0
    }
}

/// Single-linkage clustering cut at a fixed number of clusters.
///
/// Merges the closest pair of clusters until at most `max_clusters` remain. Ordering follows
/// [`single_linkage`]. Candidate pairs are drawn lazily from the kd-tree in ascending distance,
/// so memory stays linear in the number of points.
pub fn single_linkage_max_clusters(points: &[[f64; 3]], max_clusters: usize) -> Vec<Vec<usize>> {
    let n = points.len();
    let target = max_clusters.max(1);
    let mut sets = DisjointSet::new(n);
    if n <= target {
        return sets.into_groups();
    }

    let kdtree: ImmutableKdTree<f64, u64, 3, 32> = ImmutableKdTree::new_from_slice(points);
    let initial_radius = initial_shell_radius(points);
    let mut shells: Vec<NeighbourShells> = (0..n).map(|_| NeighbourShells::new()).collect();
    let mut queue = BinaryHeap::with_capacity(n);
    for (i, shell) in shells.iter_mut().enumerate() {
        if let Some((d, j)) = shell.next(i, points, &kdtree, initial_radius) {
            queue.push(Reverse(Edge::new(d, i, j)));
        }
    }

    let mut remaining = n;
    while remaining > target {
        let Some(Reverse(edge)) = queue.pop() else {
            break;
        };
        if sets.union(edge.low, edge.high) {
            remaining -= 1;
        }
        let source = edge.source;
        if let Some((d, j)) = shells[source].next(source, points, &kdtree, initial_radius) {
            queue.push(Reverse(Edge::new(d, source, j)));
        }
    }
    sets.into_groups()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_clusters() {
        assert!(single_linkage(&[], 10.0).is_empty());
    }

    #[test]
    fn points_within_cutoff_are_merged() {
        let points = [[100.0, 100.0, 100.0], [102.0, 100.0, 100.0]];
        assert_eq!(single_linkage(&points, 96.0), vec![vec![0, 1]]);
    }

    #[test]
    fn points_beyond_cutoff_stay_apart() {
        let points = [[0.0, 0.0, 0.0], [120.0, 0.0, 0.0]];
        assert_eq!(single_linkage(&points, 96.0), vec![vec![0], vec![1]]);
    }

    #[test]
    fn point_exactly_at_cutoff_is_merged() {
        let points = [[0.0, 0.0, 0.0], [0.0, 0.0, 96.0]];
        assert_eq!(single_linkage(&points, 96.0).len(), 1);
    }

    #[test]
    fn chains_link_points_further_apart_than_cutoff() {
        let points = [
            [0.0, 0.0, 0.0],
            [300.0, 0.0, 0.0],
            [100.0, 0.0, 0.0],
            [200.0, 0.0, 0.0],
        ];
        assert_eq!(single_linkage(&points, 120.0), vec![vec![0, 1, 2, 3]]);
    }

    #[test]
    fn clusters_are_ordered_by_lowest_member() {
        let points = [
            [1000.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [1005.0, 0.0, 0.0],
            [5.0, 0.0, 0.0],
            [5000.0, 0.0, 0.0],
        ];
        assert_eq!(
            single_linkage(&points, 10.0),
            vec![vec![0, 2], vec![1, 3], vec![4]]
        );
    }

    #[test]
    fn coplanar_points_sharing_axis_values_are_supported() {
        let points: Vec<[f64; 3]> = (0..200)
            .map(|i| [(i % 20) as f64 * 120.0, (i / 20) as f64 * 120.0, 50.0])
            .collect();
        let clusters = single_linkage(&points, 96.0);
        assert_eq!(clusters.len(), 200);
        assert_eq!(single_linkage(&points, 130.0).len(), 1);
    }

    #[test]
    fn max_clusters_merges_closest_points_first() {
        let points = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [50.0, 0.0, 0.0],
            [52.0, 0.0, 0.0],
            [500.0, 0.0, 0.0],
        ];
        let clusters = single_linkage_max_clusters(&points, 3);
        assert_eq!(clusters, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn max_clusters_leaves_small_inputs_untouched() {
        let points = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        assert_eq!(
            single_linkage_max_clusters(&points, 5),
            vec![vec![0], vec![1]]
        );
    }

    /// Exhaustive reference: merge the globally closest pairs in order.
    fn max_clusters_by_all_pairs(points: &[[f64; 3]], max_clusters: usize) -> Vec<Vec<usize>> {
        let n = points.len();
        let mut sets = DisjointSet::new(n);
        let mut pairs = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                pairs.push((squared_distance(&points[i], &points[j]), i, j));
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        let mut remaining = n;
        for (_, i, j) in pairs {
            if remaining <= max_clusters {
                break;
            }
            if sets.union(i, j) {
                remaining -= 1;
            }
        }
        sets.into_groups()
    }

    #[test]
    fn max_clusters_matches_exhaustive_merging_on_uneven_layout() {
        // Dense blobs far apart plus scattered points, so shells must grow several times.
        let mut points = Vec::new();
        for blob in 0..4 {
            let origin = blob as f64 * 5000.0;
            for k in 0..15 {
                let jitter = ((k * 37 + blob * 11) % 17) as f64;
                points.push([origin + k as f64 * 3.0, jitter, (k % 4) as f64 * 2.5]);
            }
        }
        for k in 0..10 {
            points.push([k as f64 * 1733.0 + 900.0, 2500.0 + (k * 7 % 5) as f64 * 400.0, 60.0]);
        }

        for max_clusters in [1, 2, 4, 9, 14, 30, 64] {
            assert_eq!(
                single_linkage_max_clusters(&points, max_clusters),
                max_clusters_by_all_pairs(&points, max_clusters),
                "max_clusters = {}",
                max_clusters
            );
        }
    }

    #[test]
    fn max_clusters_handles_coincident_points() {
        let points = [[7.0, 7.0, 7.0]; 6];
        assert_eq!(single_linkage_max_clusters(&points, 2).len(), 2);
        assert_eq!(
            single_linkage_max_clusters(&points, 1),
            vec![vec![0, 1, 2, 3, 4, 5]]
        );
    }
}
