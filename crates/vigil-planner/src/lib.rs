//! # Vigil Planner
//!
//! A* search-based planning over world states and registered actions.

pub mod astar;
pub mod planner;

pub use astar::AStarPlanner;
pub use planner::{PlanRequest, Planner, PlannerConfig};
