//! # Agent
//!
//! Per-agent kinematic state and the ORCA velocity computation.
//!
//! Each step an agent:
//! 1. collects its nearest obstacle edges and agents from the kd-tree
//!    (`compute_neighbors`), nearest first and bounded by `max_neighbors`
//! 2. turns every neighbor into a half-plane (ORCA line) in velocity space,
//!    obstacle lines first, agent lines after
//! 3. asks the linear program for the velocity closest to its preferred
//!    velocity that satisfies every line (`compute_new_velocity`)
//!
//! The result is staged in `new_velocity`; position and velocity only change
//! in `update`, so all agents of a step see the same snapshot.

use crate::kdtree::KdTree;
use crate::linear_program;
use crate::structs::{sqr, Line, Obstacle, Vector2, EPSILON};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Configuration applied to newly created agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentParams {
    /// Maximum center distance at which other agents are considered
    pub neighbor_dist: f64,
    /// Maximum number of agents considered; `0` disables agent avoidance
    pub max_neighbors: usize,
    /// Look-ahead used against other agents
    pub time_horizon: f64,
    /// Look-ahead used against obstacles
    pub time_horizon_obst: f64,
    pub radius: f64,
    pub max_speed: f64,
    /// Initial velocity
    pub velocity: Vector2,
}

impl Default for AgentParams {
    fn default() -> Self {
        AgentParams {
            neighbor_dist: 15.0,
            max_neighbors: 10,
            time_horizon: 10.0,
            time_horizon_obst: 10.0,
            radius: 1.5,
            max_speed: 2.0,
            velocity: Vector2::ZERO,
        }
    }
}

/// Neighbor lists of one agent, each sorted by ascending squared distance.
///
/// Entries are `(squared distance, registry index)`. The agent list never
/// holds more than `max_agents` entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    max_agents: usize,
    agents: Vec<(OrderedFloat<f64>, usize)>,
    obstacles: Vec<(OrderedFloat<f64>, usize)>,
}

impl Neighbors {
    pub fn new(max_agents: usize) -> Self {
        Neighbors {
            max_agents,
            agents: Vec::with_capacity(max_agents),
            obstacles: Vec::new(),
        }
    }

    pub fn agents(&self) -> &[(OrderedFloat<f64>, usize)] {
        &self.agents
    }

    pub fn obstacles(&self) -> &[(OrderedFloat<f64>, usize)] {
        &self.obstacles
    }

    pub fn max_agents(&self) -> usize {
        self.max_agents
    }

    /// Inserts an agent if it is closer than `range_sq`, evicting the farthest
    /// entry when full. Returns the possibly shrunk search range.
    pub fn insert_agent(&mut self, dist_sq: f64, index: usize, range_sq: f64) -> f64 {
        if self.max_agents == 0 || dist_sq >= range_sq {
            return range_sq;
        }

        let key = OrderedFloat(dist_sq);
        if self.agents.len() == self.max_agents {
            self.agents.pop();
        }
        let at = self.agents.partition_point(|&(d, _)| d <= key);
        self.agents.insert(at, (key, index));

        match self.agents.last() {
            Some(&(farthest, _)) if self.agents.len() == self.max_agents => farthest.into_inner(),
            _ => range_sq,
        }
    }

    /// Inserts an obstacle edge if it is closer than `range_sq`. Unbounded.
    pub fn insert_obstacle(&mut self, dist_sq: f64, index: usize, range_sq: f64) {
        if dist_sq >= range_sq {
            return;
        }

        let key = OrderedFloat(dist_sq);
        let at = self.obstacles.partition_point(|&(d, _)| d <= key);
        self.obstacles.insert(at, (key, index));
    }
}

/// Everything one compute phase produces for one agent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VelocityPlan {
    pub neighbors: Neighbors,
    pub orca_lines: Vec<Line>,
    pub new_velocity: Vector2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: usize,
    pub position: Vector2,
    pub velocity: Vector2,
    /// Supplied by the caller's steering before every compute phase
    pub pref_velocity: Vector2,
    pub radius: f64,
    pub max_speed: f64,
    pub neighbor_dist: f64,
    pub max_neighbors: usize,
    pub time_horizon: f64,
    pub time_horizon_obst: f64,
    new_velocity: Vector2,
    neighbors: Neighbors,
    orca_lines: Vec<Line>,
}

impl Agent {
    pub fn new(position: Vector2, params: &AgentParams) -> Self {
        Agent {
            id: 0,
            position,
            velocity: params.velocity,
            pref_velocity: Vector2::ZERO,
            radius: params.radius,
            max_speed: params.max_speed,
            neighbor_dist: params.neighbor_dist,
            max_neighbors: params.max_neighbors,
            time_horizon: params.time_horizon,
            time_horizon_obst: params.time_horizon_obst,
            new_velocity: params.velocity,
            neighbors: Neighbors::new(params.max_neighbors),
            orca_lines: Vec::new(),
        }
    }

    /// Velocity computed by the last compute phase, applied on `update`.
    pub fn new_velocity(&self) -> Vector2 {
        self.new_velocity
    }

    pub fn neighbors(&self) -> &Neighbors {
        &self.neighbors
    }

    /// ORCA lines of the last compute phase, obstacle lines first.
    pub fn orca_lines(&self) -> &[Line] {
        &self.orca_lines
    }

    /// Searches both trees for the neighbors of the agent stored at `index`.
    pub fn compute_neighbors(
        &self,
        index: usize,
        kd_tree: &KdTree,
        agents: &[Agent],
        obstacles: &[Obstacle],
    ) -> Neighbors {
        let mut neighbors = Neighbors::new(self.max_neighbors);

        let range_sq = sqr(self.time_horizon_obst * self.max_speed + self.radius);
        kd_tree.compute_obstacle_neighbors(self.position, range_sq, obstacles, &mut neighbors);

        if self.max_neighbors > 0 {
            kd_tree.compute_agent_neighbors(index, agents, sqr(self.neighbor_dist), &mut neighbors);
        }

        neighbors
    }

    /// Builds the ORCA lines for `neighbors` and solves for the new velocity.
    ///
    /// Returns the lines (obstacle lines first) and the velocity.
    pub fn compute_new_velocity(
        &self,
        neighbors: &Neighbors,
        agents: &[Agent],
        obstacles: &[Obstacle],
        time_step: f64,
    ) -> (Vec<Line>, Vector2) {
        let mut lines = self.obstacle_lines(neighbors, obstacles);
        let num_obstacle_lines = lines.len();

        lines.extend(
            neighbors
                .agents()
                .iter()
                .map(|&(_, other)| self.agent_line(&agents[other], time_step)),
        );

        let velocity =
            linear_program::solve(&lines, num_obstacle_lines, self.max_speed, self.pref_velocity);
        (lines, velocity)
    }

    pub(crate) fn plan(
        &self,
        index: usize,
        kd_tree: &KdTree,
        agents: &[Agent],
        obstacles: &[Obstacle],
        time_step: f64,
    ) -> VelocityPlan {
        let neighbors = self.compute_neighbors(index, kd_tree, agents, obstacles);
        let (orca_lines, new_velocity) =
            self.compute_new_velocity(&neighbors, agents, obstacles, time_step);

        VelocityPlan {
            neighbors,
            orca_lines,
            new_velocity,
        }
    }

    pub(crate) fn stage(&mut self, plan: VelocityPlan) {
        self.neighbors = plan.neighbors;
        self.orca_lines = plan.orca_lines;
        self.new_velocity = plan.new_velocity;
    }

    /// Commits the staged velocity and integrates the position.
    pub fn update(&mut self, time_step: f64) {
        self.velocity = self.new_velocity;
        self.position += self.velocity * time_step;
    }

    fn obstacle_lines(&self, neighbors: &Neighbors, obstacles: &[Obstacle]) -> Vec<Line> {
        let inv_time_horizon_obst = 1.0 / self.time_horizon_obst;
        let radius_sq = sqr(self.radius);
        let scaled_radius = self.radius * inv_time_horizon_obst;
        let mut lines: Vec<Line> = Vec::new();

        for &(_, first) in neighbors.obstacles() {
            let mut obstacle1 = &obstacles[first];
            let mut obstacle2 = &obstacles[obstacle1.next];

            let relative_position1 = obstacle1.point - self.position;
            let relative_position2 = obstacle2.point - self.position;

            // Both endpoints already behind an existing line: nothing new to add.
            let already_covered = lines.iter().any(|line| {
                (relative_position1 * inv_time_horizon_obst - line.point).det(&line.direction)
                    - scaled_radius
                    >= -EPSILON
                    && (relative_position2 * inv_time_horizon_obst - line.point)
                        .det(&line.direction)
                        - scaled_radius
                        >= -EPSILON
            });
            if already_covered {
                continue;
            }

            let dist_sq1 = relative_position1.length_sq();
            let dist_sq2 = relative_position2.length_sq();

            let obstacle_vector = obstacle2.point - obstacle1.point;
            let s = (-relative_position1).dot(&obstacle_vector) / obstacle_vector.length_sq();
            let dist_sq_line = (-relative_position1 - obstacle_vector * s).length_sq();

            if s < 0.0 && dist_sq1 <= radius_sq {
                // Touching the left vertex.
                if obstacle1.convex {
                    lines.push(Line::new(
                        Vector2::ZERO,
                        relative_position1.perpendicular().normalize(),
                    ));
                }
                continue;
            } else if s > 1.0 && dist_sq2 <= radius_sq {
                // Touching the right vertex; the next edge handles it unless the
                // vertex is convex and the agent sits in front of this edge.
                if obstacle2.convex && relative_position2.det(&obstacle2.direction) >= 0.0 {
                    lines.push(Line::new(
                        Vector2::ZERO,
                        relative_position2.perpendicular().normalize(),
                    ));
                }
                continue;
            } else if (0.0..1.0).contains(&s) && dist_sq_line <= radius_sq {
                // Touching the segment.
                lines.push(Line::new(Vector2::ZERO, -obstacle1.direction));
                continue;
            }

            let mut left_leg_direction;
            let mut right_leg_direction;

            if s < 0.0 && dist_sq_line <= radius_sq {
                // Seen obliquely: both legs come from the left vertex.
                if !obstacle1.convex {
                    continue;
                }
                obstacle2 = obstacle1;
                (left_leg_direction, right_leg_direction) =
                    tangent_legs(relative_position1, dist_sq1, radius_sq, self.radius);
            } else if s > 1.0 && dist_sq_line <= radius_sq {
                // Seen obliquely: both legs come from the right vertex.
                if !obstacle2.convex {
                    continue;
                }
                obstacle1 = obstacle2;
                (left_leg_direction, right_leg_direction) =
                    tangent_legs(relative_position2, dist_sq2, radius_sq, self.radius);
            } else {
                left_leg_direction = if obstacle1.convex {
                    tangent_legs(relative_position1, dist_sq1, radius_sq, self.radius).0
                } else {
                    -obstacle1.direction
                };
                right_leg_direction = if obstacle2.convex {
                    tangent_legs(relative_position2, dist_sq2, radius_sq, self.radius).1
                } else {
                    obstacle1.direction
                };
            }

            // A leg pointing into the adjacent edge is replaced by that edge and
            // owned by it.
            let left_neighbor = &obstacles[obstacle1.prev];
            let mut is_left_leg_foreign = false;
            let mut is_right_leg_foreign = false;

            if obstacle1.convex && left_leg_direction.det(&-left_neighbor.direction) >= 0.0 {
                left_leg_direction = -left_neighbor.direction;
                is_left_leg_foreign = true;
            }

            if obstacle2.convex && right_leg_direction.det(&obstacle2.direction) <= 0.0 {
                right_leg_direction = obstacle2.direction;
                is_right_leg_foreign = true;
            }

            let same_vertex = obstacle1.id == obstacle2.id;
            let left_cutoff = (obstacle1.point - self.position) * inv_time_horizon_obst;
            let right_cutoff = (obstacle2.point - self.position) * inv_time_horizon_obst;
            let cutoff_vector = right_cutoff - left_cutoff;

            let t = if same_vertex {
                0.5
            } else {
                (self.velocity - left_cutoff).dot(&cutoff_vector) / cutoff_vector.length_sq()
            };
            let t_left = (self.velocity - left_cutoff).dot(&left_leg_direction);
            let t_right = (self.velocity - right_cutoff).dot(&right_leg_direction);

            if (t < 0.0 && t_left < 0.0) || (same_vertex && t_left < 0.0 && t_right < 0.0) {
                // Closest to the left cut-off circle.
                let unit_w = (self.velocity - left_cutoff).normalize();
                lines.push(Line::new(
                    left_cutoff + unit_w * scaled_radius,
                    Vector2::new(unit_w.y, -unit_w.x),
                ));
                continue;
            } else if t > 1.0 && t_right < 0.0 {
                // Closest to the right cut-off circle.
                let unit_w = (self.velocity - right_cutoff).normalize();
                lines.push(Line::new(
                    right_cutoff + unit_w * scaled_radius,
                    Vector2::new(unit_w.y, -unit_w.x),
                ));
                continue;
            }

            let dist_sq_cutoff = if t < 0.0 || t > 1.0 || same_vertex {
                f64::INFINITY
            } else {
                (self.velocity - (left_cutoff + cutoff_vector * t)).length_sq()
            };
            let dist_sq_left = if t_left < 0.0 {
                f64::INFINITY
            } else {
                (self.velocity - (left_cutoff + left_leg_direction * t_left)).length_sq()
            };
            let dist_sq_right = if t_right < 0.0 {
                f64::INFINITY
            } else {
                (self.velocity - (right_cutoff + right_leg_direction * t_right)).length_sq()
            };

            if dist_sq_cutoff <= dist_sq_left && dist_sq_cutoff <= dist_sq_right {
                let direction = -obstacle1.direction;
                lines.push(Line::new(
                    left_cutoff + direction.perpendicular() * scaled_radius,
                    direction,
                ));
            } else if dist_sq_left <= dist_sq_right {
                if !is_left_leg_foreign {
                    let direction = left_leg_direction;
                    lines.push(Line::new(
                        left_cutoff + direction.perpendicular() * scaled_radius,
                        direction,
                    ));
                }
            } else if !is_right_leg_foreign {
                let direction = -right_leg_direction;
                lines.push(Line::new(
                    right_cutoff + direction.perpendicular() * scaled_radius,
                    direction,
                ));
            }
        }

        lines
    }

    /// Reciprocal ORCA line induced by `other`; this agent takes half the correction.
    fn agent_line(&self, other: &Agent, time_step: f64) -> Line {
        let inv_time_horizon = 1.0 / self.time_horizon;
        let relative_position = other.position - self.position;
        let relative_velocity = self.velocity - other.velocity;
        let dist_sq = relative_position.length_sq();
        let combined_radius = self.radius + other.radius;
        let combined_radius_sq = sqr(combined_radius);

        let (direction, u) = if dist_sq > combined_radius_sq {
            // Vector from cutoff center to relative velocity.
            let w = relative_velocity - relative_position * inv_time_horizon;
            let w_length_sq = w.length_sq();
            let dot_product1 = w.dot(&relative_position);

            if dot_product1 < 0.0 && sqr(dot_product1) > combined_radius_sq * w_length_sq {
                // Project on the cut-off circle.
                let w_length = w_length_sq.sqrt();
                let unit_w = w / w_length;
                (
                    Vector2::new(unit_w.y, -unit_w.x),
                    unit_w * (combined_radius * inv_time_horizon - w_length),
                )
            } else {
                // Project on the nearer leg.
                let leg = (dist_sq - combined_radius_sq).sqrt();
                let rp = relative_position;
                let direction = if rp.det(&w) > 0.0 {
                    Vector2::new(
                        rp.x * leg - rp.y * combined_radius,
                        rp.x * combined_radius + rp.y * leg,
                    ) / dist_sq
                } else {
                    -Vector2::new(
                        rp.x * leg + rp.y * combined_radius,
                        -rp.x * combined_radius + rp.y * leg,
                    ) / dist_sq
                };
                let dot_product2 = relative_velocity.dot(&direction);
                (direction, direction * dot_product2 - relative_velocity)
            }
        } else {
            // Already overlapping: separate within one time step.
            let inv_time_step = 1.0 / time_step;
            let w = relative_velocity - relative_position * inv_time_step;
            let w_length = w.length();
            let unit_w = w.normalize();
            (
                Vector2::new(unit_w.y, -unit_w.x),
                unit_w * (combined_radius * inv_time_step - w_length),
            )
        };

        Line::new(self.velocity + u * 0.5, direction)
    }
}

/// Left and right tangent directions from the agent to the disk of `radius`
/// around a vertex at `relative_position`.
fn tangent_legs(
    relative_position: Vector2,
    dist_sq: f64,
    radius_sq: f64,
    radius: f64,
) -> (Vector2, Vector2) {
    let rp = relative_position;
    let leg = (dist_sq - radius_sq).sqrt();
    let left = Vector2::new(rp.x * leg - rp.y * radius, rp.x * radius + rp.y * leg) / dist_sq;
    let right = Vector2::new(rp.x * leg + rp.y * radius, -rp.x * radius + rp.y * leg) / dist_sq;
    (left, right)
}
