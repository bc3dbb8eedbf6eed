use thiserror::Error;

/// Errors reported by the simulator's registration and indexing API.
///
/// Numerical degeneracy inside velocity computation is never reported here;
/// it is absorbed by the solver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulatorError {
    /// An obstacle needs at least two vertices.
    #[error("obstacle requires at least 2 vertices, got {count}")]
    TooFewVertices { count: usize },

    #[error("agent index {index} out of range for {len} agents")]
    AgentIndexOutOfRange { index: usize, len: usize },

    #[error("obstacle vertex {index} out of range for {len} vertices")]
    ObstacleIndexOutOfRange { index: usize, len: usize },

    #[error("agent range {start}..{end} is invalid for {len} agents")]
    InvalidRange { start: usize, end: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, SimulatorError>;
