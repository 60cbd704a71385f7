//! The constraint solver: layered solver states, bound tightening, and the
//! backtracking drive loop.
//!
//! Solver states form a tree. Each state owns a layer of maps that shadows
//! its parent; lookups chain upward, writes stay local. Committing a child
//! merges its layer into the parent; dropping it discards the work. This is
//! what makes disjunctions cheap to explore: each branch is a throwaway
//! layer over the shared prefix.

use crate::constraints::{Constraint, TypeVariable};
use crate::containers::unordered::UnorderedMap;
use crate::il::ValueId;
use crate::inference_context::{ConstraintSystem, VariableOrigin};
use crate::lattice::{TypeIndex, TypePool};
use crate::log::*;

/// An equivalence class of type variables under `IsEqual`, named by a dense
/// integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct UnifiedRef(usize);

/// One layer of solver-state maps. Keys written here shadow the parent
/// state's entries for the same keys.
#[derive(Default, Debug)]
struct StateLayer {
    /// UR to the type variables of that class, in unification order.
    ref_groups: UnorderedMap<UnifiedRef, Vec<TypeVariable>>,
    /// Type variable to its class.
    unification_map: UnorderedMap<TypeVariable, UnifiedRef>,
    /// Classes pinned to an exact type.
    bound_types: UnorderedMap<UnifiedRef, TypeIndex>,
    /// Most-general lower bound per class.
    general_bounds: UnorderedMap<UnifiedRef, TypeIndex>,
    /// Most-specific upper bound per class.
    specific_bounds: UnorderedMap<UnifiedRef, TypeIndex>,
    /// (subtype, supertype) pairs, in insertion order.
    specializations: Vec<(UnifiedRef, UnifiedRef)>,
}

impl StateLayer {
    fn absorb(&mut self, child: StateLayer) {
        let StateLayer {
            ref_groups,
            unification_map,
            bound_types,
            general_bounds,
            specific_bounds,
            specializations,
        } = child;
        for (k, v) in ref_groups {
            self.ref_groups.insert(k, v);
        }
        for (k, v) in unification_map {
            self.unification_map.insert(k, v);
        }
        for (k, v) in bound_types {
            self.bound_types.insert(k, v);
        }
        for (k, v) in general_bounds {
            self.general_bounds.insert(k, v);
        }
        for (k, v) in specific_bounds {
            self.specific_bounds.insert(k, v);
        }
        for pair in specializations {
            if !self.specializations.contains(&pair) {
                self.specializations.push(pair);
            }
        }
    }
}

/// A node in the solver-state tree: a local layer, the constraints left to
/// process in this state, and a back-pointer to the parent.
struct SolverState<'a> {
    layer: StateLayer,
    queue: Vec<&'a Constraint>,
    cursor: usize,
    next_ref: usize,
    parent: Option<&'a SolverState<'a>>,
}

impl<'a> SolverState<'a> {
    fn root(queue: Vec<&'a Constraint>) -> Self {
        Self {
            layer: StateLayer::default(),
            queue,
            cursor: 0,
            next_ref: 0,
            parent: None,
        }
    }

    fn next_constraint(&mut self) -> Option<&'a Constraint> {
        let constraint = self.queue.get(self.cursor).copied();
        self.cursor += 1;
        constraint
    }

    /// Search this layer, then the parent chain.
    fn chain_find(
        &self,
        select: impl Fn(&StateLayer) -> &UnorderedMap<UnifiedRef, TypeIndex>,
        key: UnifiedRef,
    ) -> Option<TypeIndex> {
        let mut current = Some(self);
        while let Some(state) = current {
            if let Some(&found) = select(&state.layer).get(&key) {
                return Some(found);
            }
            current = state.parent;
        }
        None
    }

    fn chain_bound_type(&self, ur: UnifiedRef) -> Option<TypeIndex> {
        self.chain_find(|layer| &layer.bound_types, ur)
    }

    fn chain_general(&self, ur: UnifiedRef) -> Option<TypeIndex> {
        self.chain_find(|layer| &layer.general_bounds, ur)
    }

    fn chain_specific(&self, ur: UnifiedRef) -> Option<TypeIndex> {
        self.chain_find(|layer| &layer.specific_bounds, ur)
    }

    fn chain_unification(&self, tv: TypeVariable) -> Option<UnifiedRef> {
        let mut current = Some(self);
        while let Some(state) = current {
            if let Some(&ur) = state.layer.unification_map.get(&tv) {
                return Some(ur);
            }
            current = state.parent;
        }
        None
    }

    fn chain_group_cloned(&self, ur: UnifiedRef) -> Vec<TypeVariable> {
        let mut current = Some(self);
        while let Some(state) = current {
            if let Some(group) = state.layer.ref_groups.get(&ur) {
                return group.clone();
            }
            current = state.parent;
        }
        vec![]
    }

    /// All known specialization pairs, outermost layer first, then local
    /// insertions. The order is deterministic.
    fn specialization_pairs(&self) -> Vec<(UnifiedRef, UnifiedRef)> {
        let mut chain = vec![];
        let mut current = Some(self);
        while let Some(state) = current {
            chain.push(state);
            current = state.parent;
        }
        let mut pairs = vec![];
        for state in chain.into_iter().rev() {
            pairs.extend(state.layer.specializations.iter().copied());
        }
        pairs
    }

    fn has_specialization(&self, pair: (UnifiedRef, UnifiedRef)) -> bool {
        let mut current = Some(self);
        while let Some(state) = current {
            if state.layer.specializations.contains(&pair) {
                return true;
            }
            current = state.parent;
        }
        false
    }

    /// The class of `tv`, allocating a fresh singleton class on first sight.
    fn unified_reference(&mut self, tv: TypeVariable) -> UnifiedRef {
        if let Some(ur) = self.chain_unification(tv) {
            return ur;
        }
        let ur = UnifiedRef(self.next_ref);
        self.next_ref += 1;
        self.layer.ref_groups.insert(ur, vec![tv]);
        self.layer.unification_map.insert(tv, ur);
        ur
    }

    /// Pin a class to an exact type. Succeeds if the class is unbound or
    /// already bound to an equivalent type.
    fn bind_type(&mut self, ur: UnifiedRef, typ: TypeIndex, pool: &TypePool) -> bool {
        match self.chain_bound_type(ur) {
            None => {
                self.layer.bound_types.insert(ur, typ);
                true
            }
            Some(existing) => pool.is_equal_to(existing, typ),
        }
    }

    /// Accept or reject a new most-general bound for one class, without
    /// propagation. Rejects a bound that falls strictly below the class's
    /// upper-bound cap; among accepted candidates the more specific one
    /// wins, and incomparable candidates keep the incumbent.
    fn tighten_one_general(
        &mut self,
        pool: &TypePool,
        target: UnifiedRef,
        new_bound: TypeIndex,
    ) -> bool {
        if let Some(opposite) = self.chain_specific(target) {
            if pool.is_generalization_of(opposite, new_bound)
                && !pool.is_equal_to(opposite, new_bound)
            {
                let detail = TighteningKV {
                    candidate: pool.render(new_bound).to_string(),
                    opposite: pool.render(opposite).to_string(),
                    incumbent: self
                        .chain_general(target)
                        .map(|t| pool.render(t).to_string()),
                };
                debug!("Rejecting general bound past the specific bound"; detail);
                return false;
            }
        }
        let update = match self.chain_general(target) {
            Some(current) => pool.is_generalization_of(current, new_bound),
            None => true,
        };
        if update {
            self.layer.general_bounds.insert(target, new_bound);
        }
        true
    }

    /// Accept a new most-specific bound for one class, without propagation.
    /// The more specific candidate wins; incomparable candidates keep the
    /// incumbent. There is no opposite-bound rejection on this side: the
    /// width caps produced by loads and maximum-width constraints routinely
    /// sit beside general bounds of a sibling category, and contradiction
    /// detection is owned by the general side.
    fn tighten_one_specific(&mut self, pool: &TypePool, target: UnifiedRef, new_bound: TypeIndex) {
        let update = match self.chain_specific(target) {
            Some(current) => pool.is_generalization_of(current, new_bound),
            None => true,
        };
        if update {
            self.layer.specific_bounds.insert(target, new_bound);
        }
    }

    /// Tighten the most-general bound of a class and push it down every
    /// known subtype.
    fn tighten_general(&mut self, pool: &TypePool, target: UnifiedRef, new_bound: TypeIndex) -> bool {
        if !self.tighten_one_general(pool, target, new_bound) {
            return false;
        }
        for (sub, supertype) in self.specialization_pairs() {
            if supertype == target && !self.tighten_one_general(pool, sub, new_bound) {
                return false;
            }
        }
        true
    }

    /// Tighten the most-specific bound of a class and push it up every known
    /// supertype.
    fn tighten_specific(&mut self, pool: &TypePool, target: UnifiedRef, new_bound: TypeIndex) {
        self.tighten_one_specific(pool, target, new_bound);
        for (sub, supertype) in self.specialization_pairs() {
            if sub == target {
                self.tighten_one_specific(pool, supertype, new_bound);
            }
        }
    }

    /// Record `sub ⊑ super`: insert the pair, exchange bound information
    /// between the two classes, and close transitively.
    fn add_specialization(
        &mut self,
        pool: &TypePool,
        sub: UnifiedRef,
        supertype: UnifiedRef,
    ) -> bool {
        let pair = (sub, supertype);
        if self.has_specialization(pair) {
            return true;
        }
        self.layer.specializations.push(pair);

        if let Some(bound) = self.chain_bound_type(sub) {
            self.tighten_specific(pool, supertype, bound);
        } else if let Some(bound) = self.chain_bound_type(supertype) {
            if !self.tighten_general(pool, sub, bound) {
                return false;
            }
        }

        for (existing_sub, existing_super) in self.specialization_pairs() {
            if existing_sub == supertype && !self.add_specialization(pool, sub, existing_super) {
                return false;
            }
        }

        if let Some(general) = self.chain_general(supertype) {
            if !self.tighten_general(pool, sub, general) {
                return false;
            }
        }
        if let Some(specific) = self.chain_specific(supertype) {
            self.tighten_specific(pool, sub, specific);
        }
        if let Some(specific) = self.chain_specific(sub) {
            self.tighten_specific(pool, supertype, specific);
        }
        true
    }

    /// Merge the class of `tv` into `target`.
    fn unify(&mut self, pool: &TypePool, target: UnifiedRef, tv: TypeVariable) -> bool {
        match self.chain_unification(tv) {
            None => {
                let mut group = self.chain_group_cloned(target);
                group.push(tv);
                self.layer.ref_groups.insert(target, group);
                self.layer.unification_map.insert(tv, target);
                true
            }
            Some(existing) if existing == target => true,
            Some(other) => {
                if let Some(bound) = self.chain_bound_type(other) {
                    if !self.bind_type(target, bound, pool) {
                        debug!("Unification found conflicting bound types"; "target" => ?target, "other" => ?other);
                        return false;
                    }
                }
                if let Some(general) = self.chain_general(other) {
                    if !self.tighten_general(pool, target, general) {
                        return false;
                    }
                }
                if let Some(specific) = self.chain_specific(other) {
                    self.tighten_specific(pool, target, specific);
                }
                let moved = self.chain_group_cloned(other);
                let mut group = self.chain_group_cloned(target);
                for &member in &moved {
                    self.layer.unification_map.insert(member, target);
                }
                group.extend(moved);
                self.layer.ref_groups.insert(target, group);
                self.layer.ref_groups.insert(other, vec![]);
                true
            }
        }
    }
}

/// Consumes a generated constraint system and refines, for every unified
/// class, a pair of bounds in the lattice.
pub struct Solver {
    system: ConstraintSystem,
    result: StateLayer,
    solved: bool,
}

impl Solver {
    /// Build a solver over a generated constraint system. Pre-bound
    /// variables are pinned to their literals when solving starts.
    pub fn new(system: ConstraintSystem) -> Self {
        Self {
            system,
            result: StateLayer::default(),
            solved: false,
        }
    }

    /// Process every constraint. Returns `false` when the system is
    /// infeasible, in which case no query results are available.
    pub fn solve(&mut self) -> bool {
        let Self { system, result, solved } = self;
        let ConstraintSystem {
            pool,
            constraints,
            variables,
            value_variables: _,
        } = system;

        let mut queue: Vec<&Constraint> = constraints.iter().collect();
        queue.sort_by_key(|constraint| constraint.kind_order());

        // One class per variable up front, in variable order. Allocating
        // lazily instead would let a class materialize inside a disjunction
        // branch, where the variable-to-class mapping does not survive the
        // branch merge.
        let mut root = SolverState::root(queue);
        for (index, origin) in variables.iter().enumerate() {
            let ur = root.unified_reference(TypeVariable(index));
            if let VariableOrigin::Builtin(typ) = origin {
                if !root.bind_type(ur, *typ, pool) {
                    *solved = false;
                    return false;
                }
            }
        }

        let ok = solve_state(&mut root, pool);
        if ok {
            *result = root.layer;
        } else {
            *result = StateLayer::default();
        }
        *solved = ok;
        ok
    }

    /// The inferred bounds for an IR value: its most-general lower bound and
    /// most-specific upper bound, either of which may be absent.
    pub fn inferred_type(&self, value: ValueId) -> (Option<TypeIndex>, Option<TypeIndex>) {
        if !self.solved {
            return (None, None);
        }
        let tv = match self.system.variable_for_value(value) {
            Some(tv) => tv,
            None => return (None, None),
        };
        let ur = match self.result.unification_map.get(&tv) {
            Some(&ur) => ur,
            None => return (None, None),
        };
        (
            self.result.general_bounds.get(&ur).copied(),
            self.result.specific_bounds.get(&ur).copied(),
        )
    }

    /// The lattice-type arena, for inspecting and rendering query results.
    pub fn pool(&self) -> &TypePool {
        self.system.pool()
    }

    /// Mutable access to the arena, for callers that want to compare query
    /// results against types of their own. The arena is append-only, so
    /// existing indexes stay valid.
    pub fn pool_mut(&mut self) -> &mut TypePool {
        &mut self.system.pool
    }
}

fn solve_state(state: &mut SolverState, pool: &mut TypePool) -> bool {
    while let Some(constraint) = state.next_constraint() {
        if !process(state, pool, constraint) {
            return false;
        }
    }
    true
}

fn process<'a>(state: &mut SolverState<'a>, pool: &mut TypePool, constraint: &'a Constraint) -> bool {
    match constraint {
        Constraint::IsEqual { left, right } => {
            let ur = state.unified_reference(*left);
            state.unify(pool, ur, *right)
        }
        Constraint::Specializes { left, right } => {
            let sub = state.unified_reference(*left);
            let supertype = state.unified_reference(*right);
            state.add_specialization(pool, sub, supertype)
        }
        Constraint::Generalizes { left, right } => {
            let sub = state.unified_reference(*right);
            let supertype = state.unified_reference(*left);
            state.add_specialization(pool, sub, supertype)
        }
        Constraint::Conjunction(children) => process_conjunction(state, pool, children),
        Constraint::Disjunction(children) => process_disjunction(state, pool, children),
    }
}

fn process_conjunction<'a>(
    state: &mut SolverState<'a>,
    pool: &mut TypePool,
    children: &'a [Constraint],
) -> bool {
    let mut queue: Vec<&Constraint> = children.iter().collect();
    queue.sort_by_key(|constraint| constraint.kind_order());
    let mut child = SolverState {
        layer: StateLayer::default(),
        queue,
        cursor: 0,
        next_ref: state.next_ref,
        parent: Some(&*state),
    };
    if !solve_state(&mut child, pool) {
        return false;
    }
    let SolverState { layer, next_ref, .. } = child;
    state.layer.absorb(layer);
    state.next_ref = next_ref;
    true
}

fn process_disjunction<'a>(
    state: &mut SolverState<'a>,
    pool: &mut TypePool,
    children: &'a [Constraint],
) -> bool {
    assert!(!children.is_empty());

    let mut successes: Vec<(StateLayer, usize)> = vec![];
    for disjunct in children {
        let mut child = SolverState {
            layer: StateLayer::default(),
            queue: vec![disjunct],
            cursor: 0,
            next_ref: state.next_ref,
            parent: Some(&*state),
        };
        if solve_state(&mut child, pool) {
            let SolverState { layer, next_ref, .. } = child;
            successes.push((layer, next_ref));
        } else {
            trace!("Disjunction branch infeasible"; "branch" => %disjunct);
        }
    }

    match successes.len() {
        0 => false,
        1 => {
            let (layer, next_ref) = successes.pop().unwrap();
            state.layer.absorb(layer);
            state.next_ref = next_ref;
            true
        }
        _ => {
            merge_disjunction_branches(state, pool, successes);
            true
        }
    }
}

/// Fold the bound maps of several successful branches into the parent,
/// element-wise via union join. A class bounded in one branch but
/// unconstrained in another contributes nothing: the join with "anything"
/// carries no information. Unifications and specializations private to the
/// branches are discarded; reference numbers they consumed stay consumed so
/// later allocations cannot collide with leftover bound entries.
fn merge_disjunction_branches(
    state: &mut SolverState,
    pool: &mut TypePool,
    branches: Vec<(StateLayer, usize)>,
) {
    let max_next_ref = branches
        .iter()
        .map(|&(_, next_ref)| next_ref)
        .max()
        .unwrap_or(state.next_ref);

    for general_side in [true, false] {
        let mut keys: Vec<UnifiedRef> = vec![];
        for (layer, _) in &branches {
            let map = if general_side {
                &layer.general_bounds
            } else {
                &layer.specific_bounds
            };
            for &key in map.keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys.sort();

        'key: for key in keys {
            let mut joined: Option<TypeIndex> = None;
            for (layer, _) in &branches {
                let local = if general_side {
                    layer.general_bounds.get(&key).copied()
                } else {
                    layer.specific_bounds.get(&key).copied()
                };
                let effective = local.or_else(|| {
                    if general_side {
                        state.chain_general(key)
                    } else {
                        state.chain_specific(key)
                    }
                });
                let bound = match effective {
                    Some(bound) => bound,
                    None => continue 'key,
                };
                joined = Some(match joined {
                    None => bound,
                    Some(accumulated) => pool.union_join(accumulated, bound),
                });
            }
            if let Some(joined) = joined {
                if general_side {
                    state.layer.general_bounds.insert(key, joined);
                } else {
                    state.layer.specific_bounds.insert(key, joined);
                }
            }
        }
    }

    state.next_ref = max_next_ref;
}
