//! # Spatial Index
//!
//! Two trees answer the per-agent "who is near me" questions:
//!
//! - **Agent tree**: array-backed kd-tree over agent positions, rebuilt every
//!   step. Nodes store bounding boxes; children of node `n` with a left
//!   subtree of `k` agents sit at `n + 1` and `n + 2k`.
//! - **Obstacle tree**: binary space partition over obstacle edges, built
//!   once. Each node is an edge; edges crossing the splitting line are cut in
//!   two and the new vertex is appended to the obstacle registry.
//!
//! The obstacle tree also answers line-of-sight queries.

use crate::agent::{Agent, Neighbors};
use crate::structs::{dist_sq_point_line_segment, left_of, sqr, Obstacle, Vector2, EPSILON};

/// Largest number of agents stored in an agent-tree leaf.
pub const MAX_LEAF_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
struct AgentTreeNode {
    begin: usize,
    end: usize,
    left: usize,
    right: usize,
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

impl AgentTreeNode {
    fn is_leaf(&self) -> bool {
        self.end - self.begin <= MAX_LEAF_SIZE
    }

    /// Squared distance from `p` to this node's bounding box; zero inside.
    fn dist_sq(&self, p: Vector2) -> f64 {
        sqr((self.min_x - p.x).max(0.0))
            + sqr((p.x - self.max_x).max(0.0))
            + sqr((self.min_y - p.y).max(0.0))
            + sqr((p.y - self.max_y).max(0.0))
    }
}

#[derive(Debug, Clone)]
struct ObstacleTreeNode {
    /// Registry index of the edge's first vertex
    obstacle: usize,
    left: Option<Box<ObstacleTreeNode>>,
    right: Option<Box<ObstacleTreeNode>>,
}

#[derive(Debug, Clone, Default)]
pub struct KdTree {
    /// Permutation of agent registry indices; leaves own contiguous runs
    agent_order: Vec<usize>,
    agent_tree: Vec<AgentTreeNode>,
    obstacle_tree: Option<Box<ObstacleTreeNode>>,
}

impl KdTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the agent tree from current positions.
    ///
    /// The previous permutation is reused while the agent count is unchanged,
    /// which keeps partitioning cheap for slowly moving crowds.
    pub fn build_agent_tree(&mut self, agents: &[Agent]) {
        if self.agent_order.len() != agents.len() {
            self.agent_order = (0..agents.len()).collect();
            self.agent_tree = vec![AgentTreeNode::default(); (2 * agents.len()).saturating_sub(1)];
        }

        if !agents.is_empty() {
            self.build_agent_node(0, agents.len(), 0, agents);
        }
    }

    fn build_agent_node(&mut self, begin: usize, end: usize, node: usize, agents: &[Agent]) {
        let first = agents[self.agent_order[begin]].position;
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
        for &i in &self.agent_order[begin + 1..end] {
            let p = agents[i].position;
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }

        self.agent_tree[node] = AgentTreeNode {
            begin,
            end,
            left: 0,
            right: 0,
            min_x,
            max_x,
            min_y,
            max_y,
        };

        if end - begin <= MAX_LEAF_SIZE {
            return;
        }

        let is_vertical = max_x - min_x > max_y - min_y;
        let split_value = if is_vertical {
            0.5 * (max_x + min_x)
        } else {
            0.5 * (max_y + min_y)
        };
        let coordinate = |i: usize| {
            let p = agents[i].position;
            if is_vertical {
                p.x
            } else {
                p.y
            }
        };

        let mut left = begin;
        let mut right = end;
        while left < right {
            while left < right && coordinate(self.agent_order[left]) < split_value {
                left += 1;
            }
            while right > left && coordinate(self.agent_order[right - 1]) >= split_value {
                right -= 1;
            }
            if left < right {
                self.agent_order.swap(left, right - 1);
                left += 1;
                right -= 1;
            }
        }

        // Coincident agents: force a non-empty left side.
        if left == begin {
            left += 1;
        }

        let left_node = node + 1;
        let right_node = node + 2 * (left - begin);
        self.agent_tree[node].left = left_node;
        self.agent_tree[node].right = right_node;

        self.build_agent_node(begin, left, left_node, agents);
        self.build_agent_node(left, end, right_node, agents);
    }

    /// Collects the agents closest to `agents[index]` within `range_sq`.
    ///
    /// The agent itself is never reported. The search range shrinks as the
    /// bounded neighbor list fills up.
    pub fn compute_agent_neighbors(
        &self,
        index: usize,
        agents: &[Agent],
        range_sq: f64,
        neighbors: &mut Neighbors,
    ) {
        if self.agent_tree.is_empty() {
            return;
        }
        let mut range_sq = range_sq;
        self.query_agent_node(index, agents, &mut range_sq, 0, neighbors);
    }

    fn query_agent_node(
        &self,
        index: usize,
        agents: &[Agent],
        range_sq: &mut f64,
        node: usize,
        neighbors: &mut Neighbors,
    ) {
        let current = &self.agent_tree[node];
        let position = agents[index].position;

        if current.is_leaf() {
            for &other in &self.agent_order[current.begin..current.end] {
                if other == index {
                    continue;
                }
                let dist_sq = (position - agents[other].position).length_sq();
                *range_sq = neighbors.insert_agent(dist_sq, other, *range_sq);
            }
            return;
        }

        let dist_sq_left = self.agent_tree[current.left].dist_sq(position);
        let dist_sq_right = self.agent_tree[current.right].dist_sq(position);

        let (near, near_dist_sq, far, far_dist_sq) = if dist_sq_left < dist_sq_right {
            (current.left, dist_sq_left, current.right, dist_sq_right)
        } else {
            (current.right, dist_sq_right, current.left, dist_sq_left)
        };

        if near_dist_sq < *range_sq {
            self.query_agent_node(index, agents, range_sq, near, neighbors);
            if far_dist_sq < *range_sq {
                self.query_agent_node(index, agents, range_sq, far, neighbors);
            }
        }
    }

    /// Builds the obstacle tree over every edge in the registry.
    ///
    /// Edges straddling a splitting line are cut; the new vertices are
    /// appended to `obstacles` and linked into their polygon's cycle.
    pub fn build_obstacle_tree(&mut self, obstacles: &mut Vec<Obstacle>) {
        let edges: Vec<usize> = (0..obstacles.len()).collect();
        self.obstacle_tree = build_obstacle_node(edges, obstacles);
    }

    pub fn has_obstacle_tree(&self) -> bool {
        self.obstacle_tree.is_some()
    }

    /// Collects obstacle edges that face `position` and lie within `range_sq`.
    pub fn compute_obstacle_neighbors(
        &self,
        position: Vector2,
        range_sq: f64,
        obstacles: &[Obstacle],
        neighbors: &mut Neighbors,
    ) {
        query_obstacle_node(&self.obstacle_tree, position, range_sq, obstacles, neighbors);
    }

    /// Whether a disk of `radius` can sweep from `q1` to `q2` without
    /// touching any obstacle edge.
    pub fn query_visibility(
        &self,
        q1: Vector2,
        q2: Vector2,
        radius: f64,
        obstacles: &[Obstacle],
    ) -> bool {
        query_visibility_node(&self.obstacle_tree, q1, q2, radius, obstacles)
    }
}

/// Orders candidate splits by (larger side, smaller side).
fn split_cost(left_size: usize, right_size: usize) -> (usize, usize) {
    (left_size.max(right_size), left_size.min(right_size))
}

fn build_obstacle_node(
    edges: Vec<usize>,
    obstacles: &mut Vec<Obstacle>,
) -> Option<Box<ObstacleTreeNode>> {
    if edges.is_empty() {
        return None;
    }

    let mut optimal_split = 0;
    let mut min_left = edges.len();
    let mut min_right = edges.len();

    for (i, &i1) in edges.iter().enumerate() {
        let p1 = obstacles[i1].point;
        let p2 = obstacles[obstacles[i1].next].point;
        let mut left_size = 0;
        let mut right_size = 0;

        for (j, &j1) in edges.iter().enumerate() {
            if i == j {
                continue;
            }
            let j1_left = left_of(p1, p2, obstacles[j1].point);
            let j2_left = left_of(p1, p2, obstacles[obstacles[j1].next].point);

            if j1_left >= -EPSILON && j2_left >= -EPSILON {
                left_size += 1;
            } else if j1_left <= EPSILON && j2_left <= EPSILON {
                right_size += 1;
            } else {
                left_size += 1;
                right_size += 1;
            }

            if split_cost(left_size, right_size) >= split_cost(min_left, min_right) {
                break;
            }
        }

        if split_cost(left_size, right_size) < split_cost(min_left, min_right) {
            min_left = left_size;
            min_right = right_size;
            optimal_split = i;
        }
    }

    let i1 = edges[optimal_split];
    let p1 = obstacles[i1].point;
    let p2 = obstacles[obstacles[i1].next].point;

    let mut left_edges = Vec::with_capacity(min_left);
    let mut right_edges = Vec::with_capacity(min_right);

    for (j, &j1) in edges.iter().enumerate() {
        if j == optimal_split {
            continue;
        }
        let j2 = obstacles[j1].next;
        let q1 = obstacles[j1].point;
        let q2 = obstacles[j2].point;

        let j1_left = left_of(p1, p2, q1);
        let j2_left = left_of(p1, p2, q2);

        if j1_left >= -EPSILON && j2_left >= -EPSILON {
            left_edges.push(j1);
        } else if j1_left <= EPSILON && j2_left <= EPSILON {
            right_edges.push(j1);
        } else {
            // Cut j1 -> j2 where it crosses the splitting line.
            let t = (p2 - p1).det(&(q1 - p1)) / (p2 - p1).det(&(q1 - q2));
            let split = obstacles.len();
            obstacles.push(Obstacle {
                id: split,
                point: q1 + (q2 - q1) * t,
                direction: obstacles[j1].direction,
                convex: true,
                next: j2,
                prev: j1,
            });
            obstacles[j1].next = split;
            obstacles[j2].prev = split;

            if j1_left > 0.0 {
                left_edges.push(j1);
                right_edges.push(split);
            } else {
                right_edges.push(j1);
                left_edges.push(split);
            }
        }
    }

    Some(Box::new(ObstacleTreeNode {
        obstacle: i1,
        left: build_obstacle_node(left_edges, obstacles),
        right: build_obstacle_node(right_edges, obstacles),
    }))
}

fn query_obstacle_node(
    node: &Option<Box<ObstacleTreeNode>>,
    position: Vector2,
    range_sq: f64,
    obstacles: &[Obstacle],
    neighbors: &mut Neighbors,
) {
    let Some(node) = node else {
        return;
    };

    let obstacle1 = &obstacles[node.obstacle];
    let obstacle2 = &obstacles[obstacle1.next];

    let agent_left_of_line = left_of(obstacle1.point, obstacle2.point, position);

    let (near, far) = if agent_left_of_line >= 0.0 {
        (&node.left, &node.right)
    } else {
        (&node.right, &node.left)
    };
    query_obstacle_node(near, position, range_sq, obstacles, neighbors);

    let dist_sq_line =
        sqr(agent_left_of_line) / (obstacle2.point - obstacle1.point).length_sq();

    if dist_sq_line < range_sq {
        if agent_left_of_line < 0.0 {
            // Only edges whose outer side faces the agent.
            let dist_sq = dist_sq_point_line_segment(obstacle1.point, obstacle2.point, position);
            neighbors.insert_obstacle(dist_sq, node.obstacle, range_sq);
        }

        query_obstacle_node(far, position, range_sq, obstacles, neighbors);
    }
}

fn query_visibility_node(
    node: &Option<Box<ObstacleTreeNode>>,
    q1: Vector2,
    q2: Vector2,
    radius: f64,
    obstacles: &[Obstacle],
) -> bool {
    let Some(node) = node else {
        return true;
    };

    let obstacle1 = &obstacles[node.obstacle];
    let obstacle2 = &obstacles[obstacle1.next];

    let q1_left_of_i = left_of(obstacle1.point, obstacle2.point, q1);
    let q2_left_of_i = left_of(obstacle1.point, obstacle2.point, q2);
    let inv_length_i = 1.0 / (obstacle2.point - obstacle1.point).length_sq();
    let radius_sq = sqr(radius);

    let clear_of_line = || {
        sqr(q1_left_of_i) * inv_length_i >= radius_sq
            && sqr(q2_left_of_i) * inv_length_i >= radius_sq
    };
    let left = || query_visibility_node(&node.left, q1, q2, radius, obstacles);
    let right = || query_visibility_node(&node.right, q1, q2, radius, obstacles);

    if q1_left_of_i >= 0.0 && q2_left_of_i >= 0.0 {
        left() && (clear_of_line() || right())
    } else if q1_left_of_i <= 0.0 && q2_left_of_i <= 0.0 {
        right() && (clear_of_line() || left())
    } else if q1_left_of_i >= 0.0 && q2_left_of_i <= 0.0 {
        // Crossing from the inner side to the outer side of the edge.
        left() && right()
    } else {
        let point1_left_of_q = left_of(q1, q2, obstacle1.point);
        let point2_left_of_q = left_of(q1, q2, obstacle2.point);
        let inv_length_q = 1.0 / (q2 - q1).length_sq();

        point1_left_of_q * point2_left_of_q >= 0.0
            && sqr(point1_left_of_q) * inv_length_q > radius_sq
            && sqr(point2_left_of_q) * inv_length_q > radius_sq
            && left()
            && right()
    }
}
