use rustc_hash::FxHashMap;

use super::item::{Item, ItemSet};
use super::syntax::{ProdId, RuleId, Syntax, TermId, TokenKind};

/// StateId indexes the state table. `ACCEPT` is a pseudo-state carried by
/// accepting stack entries; it never appears in the table itself.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct StateId(u32);

impl StateId {
    pub const ACCEPT: StateId = StateId(u32::MAX);

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) fn mock(n: u32) -> StateId {
        StateId(n)
    }
}

/// Terminal shift edge: match the regex, go to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    pub term: TermId,
    pub target: StateId,
}

/// Completion of a nullable terminal without consuming input: reduce the
/// terminal's zero-token wrapper production when its regex matches empty at
/// the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyAction {
    pub term: TermId,
    pub production: ProdId,
}

pub struct State {
    items: ItemSet,
    filled: bool,
    actions: Vec<Action>,
    rules: FxHashMap<RuleId, StateId>,
    reduce: Vec<ProdId>,
    reduce_empty: Vec<EmptyAction>,
}

/// The LR automaton, built lazily: states are interned by item set when
/// first referenced and their transitions computed on first use. Successor
/// states are only interned, not filled, so construction stays proportional
/// to the states the parse actually visits.
pub struct Table {
    states: Vec<State>,
    lookup: FxHashMap<ItemSet, StateId>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            states: Vec::new(),
            lookup: FxHashMap::default(),
        }
    }

    pub fn count(&self) -> usize {
        self.states.len()
    }

    /// Intern an item set, returning the id of its state.
    pub fn state_for(&mut self, items: ItemSet) -> StateId {
        if let Some(&id) = self.lookup.get(&items) {
            return id;
        }
        let id = StateId(self.states.len() as u32);
        self.lookup.insert(items.clone(), id);
        self.states.push(State {
            items,
            filled: false,
            actions: Vec::new(),
            rules: FxHashMap::default(),
            reduce: Vec::new(),
            reduce_empty: Vec::new(),
        });
        id
    }

    /// Compute the transitions of a state if not done yet.
    pub fn fill(&mut self, id: StateId, syntax: &Syntax) {
        if self.states[id.as_usize()].filled {
            return;
        }
        self.states[id.as_usize()].filled = true;

        let items = self.states[id.as_usize()].items.clone();
        let mut reduce = Vec::new();
        // Keyed vectors rather than maps: iteration order must follow the
        // (sorted) item order for determinism.
        let mut term_adv: Vec<(TermId, ItemSet)> = Vec::new();
        let mut rule_adv: Vec<(RuleId, ItemSet)> = Vec::new();

        for item in items.iter() {
            match item.next_token(syntax) {
                None => reduce.push(item.prod),
                Some(tok) => match tok.kind {
                    TokenKind::Terminal(t) => add_advance(&mut term_adv, t, item),
                    TokenKind::Rule(r) => add_advance(&mut rule_adv, r, item),
                },
            }
        }

        let mut actions = Vec::new();
        let mut rules = FxHashMap::default();
        let mut reduce_empty = Vec::new();
        for (term, set) in term_adv {
            let target = self.state_for(set.expand(syntax));
            actions.push(Action { term, target });
            if syntax.term_nullable(term) {
                // The empty match is realized as a reduction of the
                // terminal's wrapper rule, landing in the same state as a
                // real shift would.
                let rule = syntax.eskip_rule(term).expect("nullable terminal");
                let production = syntax.eskip_prod(term).expect("nullable terminal");
                rules.insert(rule, target);
                reduce_empty.push(EmptyAction { term, production });
            }
        }
        for (rule, set) in rule_adv {
            let target = self.state_for(set.expand(syntax));
            rules.insert(rule, target);
        }

        let state = &mut self.states[id.as_usize()];
        state.actions = actions;
        state.rules = rules;
        state.reduce = reduce;
        state.reduce_empty = reduce_empty;
    }

    pub fn items(&self, id: StateId) -> &ItemSet {
        &self.states[id.as_usize()].items
    }

    pub fn actions(&self, id: StateId) -> &[Action] {
        debug_assert!(self.states[id.as_usize()].filled);
        &self.states[id.as_usize()].actions
    }

    pub fn goto(&self, id: StateId, rule: RuleId) -> Option<StateId> {
        debug_assert!(self.states[id.as_usize()].filled);
        self.states[id.as_usize()].rules.get(&rule).copied()
    }

    /// Rule transitions of a state, in a stable order.
    pub fn gotos(&self, id: StateId) -> Vec<(RuleId, StateId)> {
        debug_assert!(self.states[id.as_usize()].filled);
        let mut v: Vec<_> = self.states[id.as_usize()]
            .rules
            .iter()
            .map(|(&r, &s)| (r, s))
            .collect();
        v.sort_by_key(|&(r, _)| r);
        v
    }

    pub fn reductions(&self, id: StateId) -> &[ProdId] {
        debug_assert!(self.states[id.as_usize()].filled);
        &self.states[id.as_usize()].reduce
    }

    pub fn reduce_empty(&self, id: StateId) -> &[EmptyAction] {
        debug_assert!(self.states[id.as_usize()].filled);
        &self.states[id.as_usize()].reduce_empty
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}

/// Advance `item` over its next token, accumulating per-key item sets in
/// first-seen order.
fn add_advance<K: PartialEq + Copy>(acc: &mut Vec<(K, ItemSet)>, key: K, item: Item) {
    match acc.iter_mut().find(|(k, _)| *k == key) {
        Some((_, set)) => {
            set.push(item.advance());
        }
        None => {
            let mut set = ItemSet::new();
            set.push(item.advance());
            acc.push((key, set));
        }
    }
}
