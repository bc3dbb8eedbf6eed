//! # Simulator
//!
//! Owns the agent and obstacle registries and drives the three-phase step:
//!
//! 1. `step_start`: rebuild the agent tree (and the obstacle tree if new
//!    obstacles were registered)
//! 2. `step_compute`: every agent in a slice computes its new velocity
//!    against the frozen snapshot of all agents
//! 3. `step_update`: every agent in a slice commits its velocity and moves
//!
//! Phases must run in that order without overlapping. Within the compute
//! phase agents only read shared state, so `step_compute_parallel` shards it
//! across the rayon pool.

use crate::agent::{Agent, AgentParams, VelocityPlan};
use crate::error::{Result, SimulatorError};
use crate::kdtree::KdTree;
use crate::structs::{left_of, Line, Obstacle, Vector2};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, trace, warn};

pub const DEFAULT_TIME_STEP: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub time_step: f64,
    /// Parameters for agents created through `add_agent_at`
    pub agent_defaults: AgentParams,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            time_step: DEFAULT_TIME_STEP,
            agent_defaults: AgentParams::default(),
        }
    }
}

/// Appends a closed polygon to the obstacle registry.
///
/// Returns the registry index of the first vertex. Nothing is appended when
/// fewer than two vertices are given.
pub(crate) fn push_polygon(obstacles: &mut Vec<Obstacle>, vertices: &[Vector2]) -> Result<usize> {
    if vertices.len() < 2 {
        return Err(SimulatorError::TooFewVertices {
            count: vertices.len(),
        });
    }

    let first = obstacles.len();
    let n = vertices.len();

    for (i, &point) in vertices.iter().enumerate() {
        let prev = if i == 0 { n - 1 } else { i - 1 };
        let next = if i == n - 1 { 0 } else { i + 1 };

        obstacles.push(Obstacle {
            id: first + i,
            point,
            direction: (vertices[next] - point).normalize(),
            convex: n == 2 || left_of(vertices[prev], point, vertices[next]) >= 0.0,
            next: first + next,
            prev: first + prev,
        });
    }

    Ok(first)
}

#[derive(Debug, Clone)]
pub struct Simulator {
    agents: Vec<Agent>,
    obstacles: Vec<Obstacle>,
    kd_tree: KdTree,
    agent_defaults: AgentParams,
    global_time: f64,
    time_step: f64,
    /// Obstacles were registered since the obstacle tree was last built
    obstacles_dirty: bool,
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new(SimulatorConfig::default())
    }
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Simulator {
            agents: Vec::new(),
            obstacles: Vec::new(),
            kd_tree: KdTree::new(),
            agent_defaults: config.agent_defaults,
            global_time: 0.0,
            time_step: config.time_step,
            obstacles_dirty: false,
        }
    }

    // ==================== Registration ====================

    /// Registers `agent` and returns its id, which is also its registry index.
    pub fn add_agent(&mut self, mut agent: Agent) -> usize {
        let id = self.agents.len();
        agent.id = id;
        self.agents.push(agent);
        id
    }

    /// Registers an agent at `position` using the configured defaults.
    pub fn add_agent_at(&mut self, position: Vector2) -> usize {
        let agent = Agent::new(position, &self.agent_defaults);
        self.add_agent(agent)
    }

    /// Registers an obstacle from its vertices and returns the id of its
    /// first vertex.
    ///
    /// Polygons are expected counter-clockwise; two vertices describe a wall.
    pub fn add_obstacle(&mut self, vertices: &[Vector2]) -> Result<usize> {
        let first = match push_polygon(&mut self.obstacles, vertices) {
            Ok(first) => first,
            Err(err) => {
                warn!(%err, "rejected obstacle");
                return Err(err);
            }
        };

        if self.kd_tree.has_obstacle_tree() {
            warn!(
                first,
                "obstacle added after the obstacle tree was built, rebuilding at next step"
            );
        }
        self.obstacles_dirty = true;

        debug!(first, vertices = vertices.len(), "registered obstacle");
        Ok(first)
    }

    /// Builds the obstacle tree, cutting edges and growing the registry as needed.
    pub fn process_obstacles(&mut self) {
        let input_edges = self.obstacles.len();
        self.kd_tree.build_obstacle_tree(&mut self.obstacles);
        self.obstacles_dirty = false;

        debug!(
            input_edges,
            edges = self.obstacles.len(),
            synthesized = self.obstacles.len() - input_edges,
            "built obstacle tree"
        );
    }

    /// Empties both registries and resets time.
    pub fn clear(&mut self) {
        self.agents.clear();
        self.obstacles.clear();
        self.kd_tree = KdTree::new();
        self.global_time = 0.0;
        self.time_step = DEFAULT_TIME_STEP;
        self.obstacles_dirty = false;
        debug!("cleared simulator");
    }

    // ==================== Stepping ====================

    /// Rebuilds the agent tree from current positions.
    pub fn step_start(&mut self) {
        if self.obstacles_dirty {
            self.process_obstacles();
        }
        self.kd_tree.build_agent_tree(&self.agents);
        trace!(agents = self.agents.len(), time = self.global_time, "step start");
    }

    /// Computes new velocities for the agents in `range`.
    pub fn step_compute(&mut self, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;
        self.compute(range);
        Ok(())
    }

    pub fn step_compute_all(&mut self) {
        self.compute(0..self.agents.len());
    }

    /// Same as `step_compute`, sharded over the rayon thread pool.
    ///
    /// Produces exactly the velocities of the sequential phase.
    pub fn step_compute_parallel(&mut self, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;

        let start = range.start;
        let kd_tree = &self.kd_tree;
        let agents = &self.agents;
        let obstacles = &self.obstacles;
        let time_step = self.time_step;

        let plans: Vec<VelocityPlan> = agents[range.clone()]
            .par_iter()
            .enumerate()
            .map(|(offset, agent)| agent.plan(start + offset, kd_tree, agents, obstacles, time_step))
            .collect();

        self.stage(range, plans);
        trace!(agents = self.agents.len(), "parallel compute done");
        Ok(())
    }

    /// Commits velocities and integrates positions for the agents in `range`.
    pub fn step_update(&mut self, range: Range<usize>) -> Result<()> {
        self.check_range(&range)?;
        self.update(range);
        Ok(())
    }

    pub fn step_update_all(&mut self) {
        self.update(0..self.agents.len());
    }

    /// Runs all three phases over every agent and advances the clock.
    pub fn do_step(&mut self) {
        self.step_start();
        self.step_compute_all();
        self.step_update_all();
        self.global_time += self.time_step;
    }

    fn compute(&mut self, range: Range<usize>) {
        let plans: Vec<VelocityPlan> = self.agents[range.clone()]
            .iter()
            .zip(range.clone())
            .map(|(agent, index)| {
                agent.plan(index, &self.kd_tree, &self.agents, &self.obstacles, self.time_step)
            })
            .collect();

        self.stage(range, plans);
        trace!(agents = self.agents.len(), "compute done");
    }

    fn stage(&mut self, range: Range<usize>, plans: Vec<VelocityPlan>) {
        for (agent, plan) in self.agents[range].iter_mut().zip(plans) {
            agent.stage(plan);
        }
    }

    fn update(&mut self, range: Range<usize>) {
        let time_step = self.time_step;
        for agent in &mut self.agents[range] {
            agent.update(time_step);
        }
        trace!(agents = self.agents.len(), "update done");
    }

    fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.agents.len() {
            return Err(SimulatorError::InvalidRange {
                start: range.start,
                end: range.end,
                len: self.agents.len(),
            });
        }
        Ok(())
    }

    // ==================== Queries ====================

    /// Whether a disk of `radius` can travel from `p1` to `p2` unobstructed.
    ///
    /// Uses the obstacle tree as last built.
    pub fn query_visibility(&self, p1: Vector2, p2: Vector2, radius: f64) -> bool {
        self.kd_tree.query_visibility(p1, p2, radius, &self.obstacles)
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, index: usize) -> Result<&Agent> {
        self.agents.get(index).ok_or(SimulatorError::AgentIndexOutOfRange {
            index,
            len: self.agents.len(),
        })
    }

    fn agent_mut(&mut self, index: usize) -> Result<&mut Agent> {
        let len = self.agents.len();
        self.agents
            .get_mut(index)
            .ok_or(SimulatorError::AgentIndexOutOfRange { index, len })
    }

    pub fn obstacles(&self) -> &[Obstacle] {
        &self.obstacles
    }

    pub fn obstacle(&self, index: usize) -> Result<&Obstacle> {
        self.obstacles.get(index).ok_or(SimulatorError::ObstacleIndexOutOfRange {
            index,
            len: self.obstacles.len(),
        })
    }

    pub fn num_agents(&self) -> usize {
        self.agents.len()
    }

    pub fn num_obstacle_vertices(&self) -> usize {
        self.obstacles.len()
    }

    pub fn global_time(&self) -> f64 {
        self.global_time
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn set_time_step(&mut self, time_step: f64) {
        self.time_step = time_step;
    }

    pub fn agent_defaults(&self) -> &AgentParams {
        &self.agent_defaults
    }

    pub fn set_agent_defaults(&mut self, params: AgentParams) {
        self.agent_defaults = params;
    }

    pub fn set_agent_pref_velocity(&mut self, index: usize, velocity: Vector2) -> Result<()> {
        self.agent_mut(index)?.pref_velocity = velocity;
        Ok(())
    }

    pub fn set_agent_position(&mut self, index: usize, position: Vector2) -> Result<()> {
        self.agent_mut(index)?.position = position;
        Ok(())
    }

    pub fn set_agent_velocity(&mut self, index: usize, velocity: Vector2) -> Result<()> {
        self.agent_mut(index)?.velocity = velocity;
        Ok(())
    }

    /// Agent neighbors of the last compute phase, nearest first.
    pub fn agent_neighbors(&self, index: usize) -> Result<&[(OrderedFloat<f64>, usize)]> {
        Ok(self.agent(index)?.neighbors().agents())
    }

    /// Obstacle edges near the agent in the last compute phase, nearest first.
    pub fn obstacle_neighbors(&self, index: usize) -> Result<&[(OrderedFloat<f64>, usize)]> {
        Ok(self.agent(index)?.neighbors().obstacles())
    }

    pub fn orca_lines(&self, index: usize) -> Result<&[Line]> {
        Ok(self.agent(index)?.orca_lines())
    }
}
