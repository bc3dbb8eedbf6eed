//! # Incremental Linear Program
//!
//! Finds the velocity closest to a preferred velocity that lies on the left of
//! every ORCA line and inside the max-speed circle.
//!
//! ## Stages
//!
//! 1. **Single line** (`linear_program1`): restrict the search to one line,
//!    clip the segment it cuts from the speed circle against all earlier lines.
//! 2. **Full solve** (`linear_program2`): walk the lines in order and only
//!    re-optimize on a line the current result violates.
//! 3. **Fallback** (`linear_program3`): when stage 2 is infeasible, minimize
//!    the largest violation of the agent-derived lines while keeping every
//!    obstacle-derived line as a hard constraint.
//!
//! The lines must be ordered obstacle lines first, agent lines after.

use crate::structs::{sqr, Line, Vector2, EPSILON};

/// Stage 2 could not satisfy `lines[line]`; `velocity` is the result as it
/// stood before that line was considered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Infeasible {
    pub line: usize,
    pub velocity: Vector2,
}

/// Computes the new velocity for a set of ORCA lines.
///
/// The first `num_obstacle_lines` entries of `lines` are never relaxed.
/// Always returns a finite velocity of length at most `max_speed` for finite input.
pub fn solve(
    lines: &[Line],
    num_obstacle_lines: usize,
    max_speed: f64,
    pref_velocity: Vector2,
) -> Vector2 {
    match linear_program2(lines, max_speed, pref_velocity, false) {
        Ok(velocity) => velocity,
        Err(Infeasible { line, velocity }) => {
            linear_program3(lines, num_obstacle_lines, line, max_speed, velocity)
        }
    }
}

/// Optimizes along `lines[line_no]` subject to the speed circle and every earlier line.
fn linear_program1(
    lines: &[Line],
    line_no: usize,
    radius: f64,
    opt_velocity: Vector2,
    direction_opt: bool,
) -> Option<Vector2> {
    let line = &lines[line_no];
    let dot_product = line.point.dot(&line.direction);
    let discriminant = sqr(dot_product) + sqr(radius) - line.point.length_sq();

    if discriminant < 0.0 {
        // Max speed circle fully invalidates this line.
        return None;
    }

    let sqrt_discriminant = discriminant.sqrt();
    let mut t_left = -dot_product - sqrt_discriminant;
    let mut t_right = -dot_product + sqrt_discriminant;

    for prior in &lines[..line_no] {
        let denominator = line.direction.det(&prior.direction);
        let numerator = prior.direction.det(&(line.point - prior.point));

        if denominator.abs() <= EPSILON {
            // Parallel lines: either the prior line is redundant or nothing is feasible.
            if numerator < 0.0 {
                return None;
            }
            continue;
        }

        let t = numerator / denominator;
        if denominator >= 0.0 {
            t_right = t_right.min(t);
        } else {
            t_left = t_left.max(t);
        }

        if t_left > t_right {
            return None;
        }
    }

    let t = if direction_opt {
        if opt_velocity.dot(&line.direction) > 0.0 {
            t_right
        } else {
            t_left
        }
    } else {
        let t = line.direction.dot(&(opt_velocity - line.point));
        if t < t_left {
            t_left
        } else if t > t_right {
            t_right
        } else {
            t
        }
    };

    Some(line.point + line.direction * t)
}

/// Solves the full program; `Err` carries the first line that could not be satisfied.
pub(crate) fn linear_program2(
    lines: &[Line],
    radius: f64,
    opt_velocity: Vector2,
    direction_opt: bool,
) -> Result<Vector2, Infeasible> {
    let mut result = if direction_opt {
        // opt_velocity is a unit direction here.
        opt_velocity * radius
    } else if opt_velocity.length_sq() > sqr(radius) {
        opt_velocity.normalize() * radius
    } else {
        opt_velocity
    };

    for (i, line) in lines.iter().enumerate() {
        if line.violation(result) <= 0.0 {
            continue;
        }

        match linear_program1(lines, i, radius, opt_velocity, direction_opt) {
            Some(velocity) => result = velocity,
            None => {
                return Err(Infeasible {
                    line: i,
                    velocity: result,
                })
            }
        }
    }

    Ok(result)
}

/// Relaxes agent lines from `begin_line` on, minimizing the largest violation.
fn linear_program3(
    lines: &[Line],
    num_obstacle_lines: usize,
    begin_line: usize,
    radius: f64,
    mut result: Vector2,
) -> Vector2 {
    let num_obstacle_lines = num_obstacle_lines.min(lines.len());
    let mut distance = 0.0;

    for i in begin_line..lines.len() {
        let line = &lines[i];
        if line.violation(result) <= distance {
            continue;
        }

        // Every obstacle line stays hard, including those after `i`.
        let mut projected: Vec<Line> = lines[..num_obstacle_lines].to_vec();

        for prior in &lines[num_obstacle_lines.min(i)..i] {
            let determinant = line.direction.det(&prior.direction);

            let point = if determinant.abs() <= EPSILON {
                if line.direction.dot(&prior.direction) > 0.0 {
                    // Same direction, the prior line adds nothing.
                    continue;
                }
                (line.point + prior.point) * 0.5
            } else {
                let t = prior.direction.det(&(line.point - prior.point)) / determinant;
                line.point + line.direction * t
            };

            projected.push(Line::new(
                point,
                (prior.direction - line.direction).normalize(),
            ));
        }

        let opt = Vector2::new(-line.direction.y, line.direction.x);
        // On failure keep the previous result; this only happens through rounding.
        if let Ok(velocity) = linear_program2(&projected, radius, opt, true) {
            result = velocity;
        }

        distance = line.violation(result);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use osqp::{CscMatrix, Problem, Settings};
    use proptest::prelude::*;

    /// Line whose feasible side is `x >= bound`.
    fn x_at_least(bound: f64) -> Line {
        Line::new(Vector2::new(bound, 0.0), Vector2::new(0.0, -1.0))
    }

    /// Line whose feasible side is `x <= bound`.
    fn x_at_most(bound: f64) -> Line {
        Line::new(Vector2::new(bound, 0.0), Vector2::new(0.0, 1.0))
    }

    /// Line whose feasible side is `y >= bound`.
    fn y_at_least(bound: f64) -> Line {
        Line::new(Vector2::new(0.0, bound), Vector2::new(1.0, 0.0))
    }

    /// Line whose feasible side is `y <= bound`.
    fn y_at_most(bound: f64) -> Line {
        Line::new(Vector2::new(0.0, bound), Vector2::new(-1.0, 0.0))
    }

    /// Line with unit direction at `angle` that keeps the origin `margin` inside.
    fn line_around_origin(angle: f64, margin: f64) -> Line {
        let direction = Vector2::new(angle.cos(), angle.sin());
        Line::new(Vector2::new(direction.y, -direction.x) * margin, direction)
    }

    /// Minimizes |v - pref|^2 subject to the lines using OSQP.
    fn osqp_closest_feasible(lines: &[Line], pref: Vector2) -> Option<Vector2> {
        let q = &[-2.0 * pref.x, -2.0 * pref.y];
        let p_matrix = CscMatrix {
            nrows: 2,
            ncols: 2,
            indptr: std::borrow::Cow::Borrowed(&[0, 1, 2]),
            indices: std::borrow::Cow::Borrowed(&[0, 1]),
            data: std::borrow::Cow::Borrowed(&[2.0, 2.0]),
        };

        // det(d, v - p) >= 0  <=>  -d.y * vx + d.x * vy >= -d.y * p.x + d.x * p.y
        let rows: Vec<[f64; 2]> = lines
            .iter()
            .map(|l| [-l.direction.y, l.direction.x])
            .collect();
        let l_bounds: Vec<f64> = lines
            .iter()
            .map(|l| -l.direction.y * l.point.x + l.direction.x * l.point.y)
            .collect();
        let u_bounds = vec![f64::INFINITY; lines.len()];

        let mut a_data = Vec::new();
        let mut a_indices = Vec::new();
        let mut a_indptr = vec![0];
        for col in 0..2 {
            for (row_idx, row) in rows.iter().enumerate() {
                if row[col] != 0.0 {
                    a_data.push(row[col]);
                    a_indices.push(row_idx);
                }
            }
            a_indptr.push(a_data.len());
        }

        let a_matrix = CscMatrix {
            nrows: rows.len(),
            ncols: 2,
            indptr: std::borrow::Cow::Owned(a_indptr),
            indices: std::borrow::Cow::Owned(a_indices),
            data: std::borrow::Cow::Owned(a_data),
        };

        let settings = Settings::default()
            .verbose(false)
            .eps_abs(1e-9)
            .eps_rel(1e-9)
            .max_iter(20000)
            .polishing(true);

        let mut problem = Problem::new(p_matrix, q, a_matrix, &l_bounds, &u_bounds, &settings).ok()?;
        match problem.solve() {
            osqp::Status::Solved(sol) | osqp::Status::SolvedInaccurate(sol) => {
                Some(Vector2::new(sol.x()[0], sol.x()[1]))
            }
            _ => None,
        }
    }

    // ==================== Stage 2 Tests ====================

    #[test]
    fn test_no_lines_returns_preferred_velocity() {
        let pref = Vector2::new(0.3, -0.4);
        let result = solve(&[], 0, 1.0, pref);
        assert_eq!(result, pref);
    }

    #[test]
    fn test_no_lines_clamps_to_max_speed() {
        let result = solve(&[], 0, 2.0, Vector2::new(6.0, 8.0));
        assert_abs_diff_eq!(result.x, 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(result.y, 1.6, epsilon = 1e-12);
    }

    #[test]
    fn test_satisfied_line_leaves_preferred_velocity() {
        let lines = [x_at_most(1.0)];
        let pref = Vector2::new(0.5, 0.5);
        assert_eq!(solve(&lines, 0, 2.0, pref), pref);
    }

    #[test]
    fn test_single_violated_line_projects() {
        let lines = [x_at_most(0.25)];
        let result = solve(&lines, 0, 2.0, Vector2::new(1.0, 0.5));
        assert_abs_diff_eq!(result.x, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(result.y, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_two_lines_meet_at_corner() {
        let lines = [x_at_most(0.5), y_at_least(0.5)];
        let result = solve(&lines, 0, 2.0, Vector2::new(1.0, 0.0));
        assert_abs_diff_eq!(result.x, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(result.y, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_projection_clipped_by_speed_circle() {
        // Nearest point on the line would be (0.5, 2.0), outside the circle of radius 1.
        let lines = [x_at_most(0.5)];
        let result = solve(&lines, 0, 1.0, Vector2::new(2.0, 2.0));
        assert_abs_diff_eq!(result.x, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(result.y, 0.75f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_stage2_reports_failing_line_and_prior_result() {
        let lines = [x_at_least(1.0), x_at_most(-1.0)];
        let outcome = linear_program2(&lines, 2.0, Vector2::new(1.0, 0.0), false);
        assert_eq!(
            outcome,
            Err(Infeasible {
                line: 1,
                velocity: Vector2::new(1.0, 0.0)
            })
        );
    }

    #[test]
    fn test_line_outside_speed_circle_is_infeasible() {
        let lines = [x_at_least(3.0)];
        let outcome = linear_program2(&lines, 1.0, Vector2::ZERO, false);
        assert!(outcome.is_err(), "no velocity within max speed reaches x >= 3");
    }

    // ==================== Stage 3 Tests ====================

    #[test]
    fn test_fallback_balances_conflicting_agent_lines() {
        let lines = [x_at_least(1.0), x_at_most(-1.0)];
        let result = solve(&lines, 0, 2.0, Vector2::new(1.0, 0.0));

        assert!(result.x.is_finite() && result.y.is_finite());
        assert_abs_diff_eq!(result.x, 0.0, epsilon = 1e-9);
        assert!(result.length() <= 2.0 + 1e-9, "fallback stays within max speed");
        assert_abs_diff_eq!(lines[0].violation(result), lines[1].violation(result), epsilon = 1e-9);
    }

    #[test]
    fn test_fallback_keeps_obstacle_lines_hard() {
        // Obstacle line x <= 0 followed by a conflicting agent line x >= 1.
        let lines = [x_at_most(0.0), x_at_least(1.0)];
        let result = solve(&lines, 1, 2.0, Vector2::new(1.0, 0.0));

        assert!(
            lines[0].violation(result) <= 1e-9,
            "obstacle line must hold, got {:?}",
            result
        );
        assert!(result.length() <= 2.0 + 1e-9);
    }

    #[test]
    fn test_fallback_with_infeasible_obstacle_lines_is_finite() {
        let lines = [x_at_least(1.0), x_at_most(-1.0), y_at_least(0.2)];
        let result = solve(&lines, 2, 1.5, Vector2::new(0.0, 1.0));
        assert!(result.x.is_finite() && result.y.is_finite());
        assert!(result.length() <= 1.5 + 1e-9);
    }

    #[test]
    fn test_fallback_keeps_later_obstacle_lines_hard() {
        // Stage 2 fails on obstacle line 1; obstacle line 2 comes after it.
        let lines = [x_at_least(1.0), x_at_most(-1.0), y_at_most(0.0)];
        let pref = Vector2::new(1.0, -0.5);
        assert_eq!(
            linear_program2(&lines, 2.0, pref, false),
            Err(Infeasible { line: 1, velocity: pref })
        );

        let result = solve(&lines, 3, 2.0, pref);
        assert!(
            lines[2].violation(result) <= 1e-9,
            "obstacle line after the failing one must hold, got {:?}",
            result
        );
        assert_abs_diff_eq!(result.x, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(result.y, -0.5, epsilon = 1e-9);
    }

    // ==================== Oracle / Property Tests ====================

    #[test]
    fn test_matches_qp_oracle_on_feasible_sets() {
        let cases: Vec<(Vec<(f64, f64)>, (f64, f64))> = vec![
            (vec![(0.0, 0.5), (1.3, 0.2), (2.9, 0.7)], (2.0, 1.0)),
            (vec![(0.4, 0.1), (0.9, 0.3)], (-1.0, 2.5)),
            (vec![(3.5, 0.05), (4.0, 0.6), (5.1, 0.3), (0.2, 1.0)], (1.5, -2.0)),
            (vec![(1.0, 0.25)], (0.1, 0.1)),
        ];

        for (constraints, pref) in &cases {
            let lines: Vec<Line> = constraints
                .iter()
                .map(|&(angle, margin)| line_around_origin(angle, margin))
                .collect();
            let pref = Vector2::from(*pref);

            let ours = solve(&lines, 0, 100.0, pref);
            let oracle = osqp_closest_feasible(&lines, pref).expect("osqp solves feasible QP");

            assert!(
                ours.distance(&oracle) < 1e-4,
                "LP {:?} disagrees with QP oracle {:?}",
                ours,
                oracle
            );
        }
    }

    proptest! {
        #[test]
        fn prop_feasible_sets_are_satisfied(
            constraints in prop::collection::vec((0.0..std::f64::consts::TAU, 0.01..2.0f64), 1..12),
            pref in (-3.0..3.0f64, -3.0..3.0f64),
            max_speed in 0.5..4.0f64,
        ) {
            let lines: Vec<Line> = constraints
                .iter()
                .map(|&(angle, margin)| line_around_origin(angle, margin))
                .collect();

            let outcome = linear_program2(&lines, max_speed, Vector2::from(pref), false);
            prop_assert!(outcome.is_ok(), "origin is feasible so stage 2 must succeed");

            let result = solve(&lines, 0, max_speed, Vector2::from(pref));
            prop_assert!(result.length() <= max_speed + 1e-9);
            for line in &lines {
                prop_assert!(line.violation(result) <= 1e-7, "violated {:?} by {:?}", line, result);
            }
        }

        #[test]
        fn prop_solution_is_always_finite(
            constraints in prop::collection::vec(
                (0.0..std::f64::consts::TAU, -3.0..3.0f64, -3.0..3.0f64),
                0..10,
            ),
            num_obstacle_lines in 0usize..4,
            pref in (-3.0..3.0f64, -3.0..3.0f64),
        ) {
            let lines: Vec<Line> = constraints
                .iter()
                .map(|&(angle, px, py)| {
                    Line::new(Vector2::new(px, py), Vector2::new(angle.cos(), angle.sin()))
                })
                .collect();
            let num_obstacle_lines = num_obstacle_lines.min(lines.len());

            let result = solve(&lines, num_obstacle_lines, 1.0, Vector2::from(pref));
            prop_assert!(result.x.is_finite() && result.y.is_finite());
            prop_assert!(result.length() <= 1.0 + 1e-9);
        }
    }
}
