//! A* search-based planner implementation.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};
use vigil_core::{apply_effects, satisfies, Action, Plan, Registry, Result, VigilError, WorldState};

use crate::planner::{PlanRequest, Planner, PlannerConfig};

/// A* search-based planner over a shared registry.
pub struct AStarPlanner {
    config: PlannerConfig,
    registry: Arc<Registry>,
}

/// An action as seen by one search: registry entry plus adjusted priority.
struct Candidate<'a> {
    action: &'a Action,
    priority: i64,
}

/// Lower bound on the cost still needed to reach one goal.
///
/// Each step costs at least `min_cost` and settles at most `max_cover`
/// goal facts, so `ceil(unsatisfied / max_cover) * min_cost` never exceeds
/// the true remaining cost and never drops by more than one step's cost.
struct Heuristic<'a> {
    goal: &'a WorldState,
    max_cover: usize,
    min_cost: f64,
}

impl<'a> Heuristic<'a> {
    fn new(goal: &'a WorldState, candidates: &[Candidate<'_>]) -> Self {
        let max_cover = candidates
            .iter()
            .map(|c| {
                c.action
                    .effects
                    .iter()
                    .filter(|(key, value)| goal.get(key) == Some(*value))
                    .count()
            })
            .max()
            .unwrap_or(0);
        let min_cost = candidates
            .iter()
            .map(|c| c.action.base_cost)
            .fold(f64::INFINITY, f64::min);
        Self {
            goal,
            max_cover,
            min_cost: if min_cost.is_finite() { min_cost } else { 0.0 },
        }
    }

    fn estimate(&self, state: &WorldState) -> f64 {
        if self.max_cover == 0 {
            return 0.0;
        }
        let unsatisfied = state.unsatisfied(self.goal).len();
        unsatisfied.div_ceil(self.max_cover) as f64 * self.min_cost
    }
}

/// Node in the A* search tree.
struct SearchNode {
    /// Current state.
    state: WorldState,
    /// Indices into the candidate list, in id order.
    path: Vec<usize>,
    /// g(n): Actual cost from start.
    g_cost: f64,
    /// f(n) = g(n) + h(n).
    f_cost: f64,
    /// Effective priority of the action that produced this node.
    priority: i64,
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}

impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for the max-heap: lowest f, then lowest priority, then the
        // lexicographically smallest path pops first.
        other
            .f_cost
            .total_cmp(&self.f_cost)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| other.path.cmp(&self.path))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl AStarPlanner {
    /// Create a new A* planner with default configuration.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, PlannerConfig::default())
    }

    /// Create a new A* planner with custom configuration.
    pub fn with_config(registry: Arc<Registry>, config: PlannerConfig) -> Self {
        Self { config, registry }
    }

    /// The registry this planner searches.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn candidates(&self, request: &PlanRequest) -> Vec<Candidate<'_>> {
        self.registry
            .actions()
            .filter(|action| !request.excluded.contains(&action.id))
            .map(|action| Candidate {
                action,
                priority: action.plan_priority.saturating_add(
                    request
                        .priority_adjustments
                        .get(&action.id)
                        .copied()
                        .unwrap_or(0),
                ),
            })
            .collect()
    }

    fn build_plan(request: &PlanRequest, candidates: &[Candidate<'_>], node: &SearchNode, explored: usize) -> Plan {
        let mut plan = Plan::new(request.start.clone(), request.goal.clone());
        for &idx in &node.path {
            plan.push(candidates[idx].action);
        }
        plan.states_explored = explored;
        plan
    }
}

impl Planner for AStarPlanner {
    fn plan(&self, request: &PlanRequest) -> Result<Plan> {
        if let Err(VigilError::UnknownFact { key }) = self.registry.validate_goal(&request.goal) {
            return Err(VigilError::no_solution(format!(
                "goal fact '{}' is not produced by any action",
                key
            )));
        }

        info!(
            "Starting A* planning to {} from {}",
            request.goal, request.start
        );

        let candidates = self.candidates(request);
        let heuristic = Heuristic::new(&request.goal, &candidates);
        let mut open_set: BinaryHeap<SearchNode> = BinaryHeap::new();
        let mut closed_set: HashSet<WorldState> = HashSet::new();
        let mut best_cost: HashMap<WorldState, f64> = HashMap::new();
        let mut states_explored = 0;

        best_cost.insert(request.start.clone(), 0.0);
        open_set.push(SearchNode {
            state: request.start.clone(),
            path: Vec::new(),
            g_cost: 0.0,
            f_cost: heuristic.estimate(&request.start),
            priority: 0,
        });

        while let Some(current) = open_set.pop() {
            if closed_set.contains(&current.state) {
                continue;
            }

            states_explored += 1;
            if states_explored > self.config.max_states_explored {
                warn!("A* exceeded max states explored limit");
                return Err(VigilError::no_solution(format!(
                    "search budget of {} states exhausted",
                    self.config.max_states_explored
                )));
            }

            if current.state.satisfies_goal(&request.goal) {
                let plan = Self::build_plan(request, &candidates, &current, states_explored);
                info!(
                    "A* found plan with {} steps (cost {}), explored {} states",
                    plan.len(),
                    plan.total_cost,
                    states_explored
                );
                return Ok(plan);
            }

            if current.path.len() >= self.config.max_steps {
                continue;
            }

            for (idx, candidate) in candidates.iter().enumerate() {
                let action = candidate.action;
                if !satisfies(&current.state, &action.preconditions) {
                    continue;
                }

                let new_state = apply_effects(&current.state, action);
                if new_state == current.state || closed_set.contains(&new_state) {
                    continue;
                }

                let g_cost = current.g_cost + action.base_cost;
                if best_cost.get(&new_state).is_some_and(|&best| best < g_cost) {
                    debug!("Skipping {}: cheaper route to the same state known", action.id);
                    continue;
                }
                best_cost.insert(new_state.clone(), g_cost);

                let mut path = current.path.clone();
                path.push(idx);

                let f_cost = g_cost + heuristic.estimate(&new_state);
                open_set.push(SearchNode {
                    state: new_state,
                    path,
                    g_cost,
                    f_cost,
                    priority: candidate.priority,
                });
            }

            closed_set.insert(current.state);
        }

        Err(VigilError::no_solution(format!(
            "frontier exhausted after {} states",
            states_explored
        )))
    }

    fn validate_plan(&self, plan: &Plan, current_state: &WorldState) -> bool {
        plan.is_valid_from(&self.registry, current_state, 0)
    }

    fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn set_config(&mut self, config: PlannerConfig) {
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::AgentRole;

    fn intake() -> Action {
        Action::builder("intake", AgentRole::Intake)
            .effect("hasImage", true)
            .cost(1.0)
            .build()
    }

    fn classify() -> Action {
        Action::builder("classify", AgentRole::Classification)
            .precondition("hasImage", true)
            .effect("hasResult", true)
            .cost(1.0)
            .critical()
            .build()
    }

    fn safety_calibrate() -> Action {
        Action::builder("safetyCalibrate", AgentRole::Calibration)
            .precondition("hasImage", true)
            .effect("hasResult", true)
            .cost(3.0)
            .fallback()
            .build()
    }

    fn planner(actions: Vec<Action>) -> AStarPlanner {
        let registry = actions
            .into_iter()
            .fold(Registry::builder(), |b, a| b.action(a))
            .build()
            .unwrap();
        AStarPlanner::new(Arc::new(registry))
    }

    fn goal() -> WorldState {
        WorldState::from_iter([("hasResult", true)])
    }

    #[test]
    fn test_intake_then_classify() {
        let planner = planner(vec![intake(), classify()]);
        let plan = planner.plan(&PlanRequest::new(WorldState::new(), goal())).unwrap();

        assert_eq!(plan.action_ids(), vec!["intake", "classify"]);
        assert_eq!(plan.total_cost, 2.0);
        assert_eq!(plan.steps[1].cumulative_cost, 2.0);
    }

    #[test]
    fn test_prefers_cheaper_path() {
        let planner = planner(vec![intake(), classify(), safety_calibrate()]);
        let plan = planner.plan(&PlanRequest::new(WorldState::new(), goal())).unwrap();
        assert_eq!(plan.action_ids(), vec!["intake", "classify"]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let forward = planner(vec![intake(), classify(), safety_calibrate()]);
        let reversed = planner(vec![safety_calibrate(), classify(), intake()]);
        let request = PlanRequest::new(WorldState::new(), goal());

        let first = forward.plan(&request).unwrap();
        for _ in 0..10 {
            assert_eq!(forward.plan(&request).unwrap(), first);
        }
        let other = reversed.plan(&request).unwrap();
        assert_eq!(other, first);
        assert_eq!(other.fingerprint(), first.fingerprint());
    }

    #[test]
    fn test_plan_reaches_goal() {
        let planner = planner(vec![intake(), classify(), safety_calibrate()]);
        let request = PlanRequest::new(WorldState::new(), goal());
        let plan = planner.plan(&request).unwrap();

        let mut state = request.start.clone();
        for step in &plan.steps {
            state = apply_effects(&state, planner.registry().get(&step.action_id).unwrap());
        }
        assert!(state.satisfies_goal(&request.goal));
        assert!(planner.validate_plan(&plan, &request.start));
    }

    #[test]
    fn test_unknown_goal_fact_has_no_solution() {
        let planner = planner(vec![intake(), classify()]);
        let goal = WorldState::from_iter([("hasReport", true)]);
        let err = planner.plan(&PlanRequest::new(WorldState::new(), goal)).unwrap_err();
        assert!(matches!(err, VigilError::PlannerNoSolution { .. }));
    }

    #[test]
    fn test_unreachable_goal_has_no_solution() {
        // hasImage=false is known (an effect value) but nothing produces hasResult from it
        let planner = planner(vec![intake(), classify()]);
        let goal = WorldState::from_iter([("hasImage", false)]);
        let err = planner.plan(&PlanRequest::new(WorldState::new(), goal)).unwrap_err();
        assert!(matches!(err, VigilError::PlannerNoSolution { .. }));
    }

    #[test]
    fn test_goal_already_satisfied() {
        let planner = planner(vec![intake(), classify()]);
        let start = WorldState::from_iter([("hasResult", true)]);
        let plan = planner.plan(&PlanRequest::new(start, goal())).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.total_cost, 0.0);
    }

    #[test]
    fn test_equal_cost_tie_broken_by_priority() {
        let low = Action::builder("zeta", AgentRole::Classification)
            .effect("hasResult", true)
            .priority(1)
            .build();
        let high = Action::builder("alpha", AgentRole::Classification)
            .effect("hasResult", true)
            .priority(5)
            .build();
        let planner = planner(vec![high, low]);

        let plan = planner.plan(&PlanRequest::new(WorldState::new(), goal())).unwrap();
        assert_eq!(plan.action_ids(), vec!["zeta"]);

        let boosted = PlanRequest::new(WorldState::new(), goal()).adjust_priority("alpha", -10);
        let plan = planner.plan(&boosted).unwrap();
        assert_eq!(plan.action_ids(), vec!["alpha"]);
    }

    #[test]
    fn test_multi_fact_action_does_not_hide_cheaper_detour() {
        let bundle = Action::builder("bundle", AgentRole::Reporting)
            .effect("a", true)
            .effect("b", true)
            .effect("c", true)
            .cost(3.0)
            .build();
        let prep = Action::builder("prep", AgentRole::Preprocessing)
            .effect("p", true)
            .build();
        let fast = Action::builder("fast", AgentRole::Reporting)
            .precondition("p", true)
            .effect("a", true)
            .effect("b", true)
            .effect("c", true)
            .build();
        let planner = planner(vec![bundle, prep, fast]);
        let goal = WorldState::from_iter([("a", true), ("b", true), ("c", true)]);

        let plan = planner.plan(&PlanRequest::new(WorldState::new(), goal)).unwrap();
        assert_eq!(plan.action_ids(), vec!["prep", "fast"]);
        assert_eq!(plan.total_cost, 2.0);
    }

    #[test]
    fn test_fractional_costs_find_cheapest_plan() {
        let direct = Action::builder("direct", AgentRole::Classification)
            .effect("hasResult", true)
            .cost(0.9)
            .build();
        let prep = Action::builder("prep", AgentRole::Preprocessing)
            .effect("normalized", true)
            .cost(0.1)
            .build();
        let fast = Action::builder("fast", AgentRole::Classification)
            .precondition("normalized", true)
            .effect("hasResult", true)
            .cost(0.1)
            .build();
        let planner = planner(vec![direct, prep, fast]);

        let plan = planner.plan(&PlanRequest::new(WorldState::new(), goal())).unwrap();
        assert_eq!(plan.action_ids(), vec!["prep", "fast"]);
        assert!((plan.total_cost - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_priority_adjustment_saturates() {
        let fallback = Action::builder("safetyCalibrate", AgentRole::Calibration)
            .effect("hasResult", true)
            .priority(i64::MIN)
            .fallback()
            .build();
        let planner = planner(vec![fallback]);
        let request = PlanRequest::new(WorldState::new(), goal())
            .adjust_priority("safetyCalibrate", -10)
            .adjust_priority("safetyCalibrate", i64::MIN);

        let plan = planner.plan(&request).unwrap();
        assert_eq!(plan.action_ids(), vec!["safetyCalibrate"]);
    }

    #[test]
    fn test_excluded_actions_are_not_used() {
        let planner = planner(vec![intake(), classify(), safety_calibrate()]);
        let start = WorldState::from_iter([("hasImage", true)]);
        let request = PlanRequest::new(start, goal()).exclude("classify");

        let plan = planner.plan(&request).unwrap();
        assert_eq!(plan.action_ids(), vec!["safetyCalibrate"]);
        assert_eq!(plan.total_cost, 3.0);
    }

    #[test]
    fn test_search_budget_exhaustion() {
        let mut planner = planner(vec![intake(), classify()]);
        planner.set_config(PlannerConfig {
            max_states_explored: 1,
            ..PlannerConfig::default()
        });
        let err = planner.plan(&PlanRequest::new(WorldState::new(), goal())).unwrap_err();
        assert!(err.to_string().contains("search budget"));
    }
}
