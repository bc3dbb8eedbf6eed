//! Python bindings.
//!
//! Vectors cross the boundary as `(x, y)` tuples.

use crate::agent::AgentParams;
use crate::error::SimulatorError;
use crate::simulator::{Simulator, SimulatorConfig};
use crate::structs::Vector2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

impl From<SimulatorError> for PyErr {
    fn from(err: SimulatorError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

#[pyclass(name = "Simulator")]
pub struct PySimulator {
    inner: Simulator,
}

#[pymethods]
impl PySimulator {
    #[new]
    #[pyo3(signature = (
        time_step = 0.1,
        radius = 1.5,
        max_speed = 2.0,
        neighbor_dist = 15.0,
        max_neighbors = 10,
        time_horizon = 10.0,
        time_horizon_obst = 10.0
    ))]
    fn new(
        time_step: f64,
        radius: f64,
        max_speed: f64,
        neighbor_dist: f64,
        max_neighbors: usize,
        time_horizon: f64,
        time_horizon_obst: f64,
    ) -> Self {
        let config = SimulatorConfig {
            time_step,
            agent_defaults: AgentParams {
                neighbor_dist,
                max_neighbors,
                time_horizon,
                time_horizon_obst,
                radius,
                max_speed,
                velocity: Vector2::ZERO,
            },
        };
        PySimulator {
            inner: Simulator::new(config),
        }
    }

    fn add_agent(&mut self, position: (f64, f64)) -> usize {
        self.inner.add_agent_at(position.into())
    }

    fn add_obstacle(&mut self, vertices: Vec<(f64, f64)>) -> PyResult<usize> {
        let vertices: Vec<Vector2> = vertices.into_iter().map(Vector2::from).collect();
        Ok(self.inner.add_obstacle(&vertices)?)
    }

    fn process_obstacles(&mut self) {
        self.inner.process_obstacles();
    }

    fn set_pref_velocity(&mut self, index: usize, velocity: (f64, f64)) -> PyResult<()> {
        Ok(self.inner.set_agent_pref_velocity(index, velocity.into())?)
    }

    fn do_step(&mut self) {
        self.inner.do_step();
    }

    fn position(&self, index: usize) -> PyResult<(f64, f64)> {
        let p = self.inner.agent(index)?.position;
        Ok((p.x, p.y))
    }

    fn velocity(&self, index: usize) -> PyResult<(f64, f64)> {
        let v = self.inner.agent(index)?.velocity;
        Ok((v.x, v.y))
    }

    #[pyo3(signature = (p1, p2, radius = 0.0))]
    fn query_visibility(&self, p1: (f64, f64), p2: (f64, f64), radius: f64) -> bool {
        self.inner.query_visibility(p1.into(), p2.into(), radius)
    }

    #[getter]
    fn global_time(&self) -> f64 {
        self.inner.global_time()
    }

    #[getter]
    fn num_agents(&self) -> usize {
        self.inner.num_agents()
    }

    fn __repr__(&self) -> String {
        format!(
            "Simulator(agents={}, obstacle_vertices={}, time={:.2})",
            self.inner.num_agents(),
            self.inner.num_obstacle_vertices(),
            self.inner.global_time()
        )
    }
}

#[pymodule]
fn avoidance_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySimulator>()?;
    Ok(())
}
