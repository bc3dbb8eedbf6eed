//! # Avoidance Core
//!
//! Local, reciprocal collision avoidance for crowds of disk-shaped agents
//! moving among static polygonal obstacles.
//!
//! ## Algorithms
//!
//! - **ORCA (Optimal Reciprocal Collision Avoidance)**: every neighbor becomes
//!   a half-plane in velocity space; each agent of a pair takes half of the
//!   correction.
//! - **Incremental linear program**: finds the velocity closest to the
//!   preferred one inside all half-planes, with a fallback that keeps
//!   obstacle constraints hard when the system is infeasible.
//! - **kd-trees**: a per-step agent tree and a static obstacle BSP for
//!   neighbor and line-of-sight queries.
//!
//! ## Usage
//!
//! ```no_run
//! use avoidance_core::{Simulator, SimulatorConfig, Vector2};
//!
//! let mut sim = Simulator::new(SimulatorConfig::default());
//! let a = sim.add_agent_at(Vector2::new(-5.0, 0.0));
//! sim.add_obstacle(&[Vector2::new(0.0, 2.0), Vector2::new(0.0, 4.0)])?;
//! sim.process_obstacles();
//!
//! sim.set_agent_pref_velocity(a, Vector2::new(1.0, 0.0))?;
//! sim.do_step();
//! println!("{:?}", sim.agent(a)?.position);
//! # Ok::<(), avoidance_core::SimulatorError>(())
//! ```
//!
//! Python bindings are available behind the `python` feature.

pub mod agent;
pub mod error;
pub mod kdtree;
pub mod linear_program;
pub mod simulator;
pub mod structs;

#[cfg(feature = "python")]
mod python;

pub use agent::{Agent, AgentParams, Neighbors};
pub use error::{Result, SimulatorError};
pub use kdtree::KdTree;
pub use simulator::{Simulator, SimulatorConfig};
pub use structs::{Line, Obstacle, Vector2, EPSILON};
