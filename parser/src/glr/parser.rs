use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::api::GrammarDef;
use crate::logging::Logger;
use crate::warn;

use super::info::{IndentType, InfoErrors, InfoIndent, InfoInternal, InfoLeaf, InfoNode, SrcPos};
use super::item::{Item, ItemSet};
use super::node::{SyntaxChild, SyntaxNode, SyntaxToken};
use super::stack::{FutureStacks, StackId, StackStore};
use super::syntax::{
    ParentReq, ProdId, ProductionSpec, RuleId, RuleKind, SpecialProd, Syntax, TermId, TokenKind,
};
use super::table::{StateId, Table};
use super::tree::{TreeId, TreeStore};

const DEBUG: bool = false;

macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(feature = "logging") && DEBUG {
            eprintln!($($arg)*);
        }
    }
}

/// Telemetry for one parse session, for performance regression tests.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ParserStats {
    pub positions: usize,
    pub stack_nodes: usize,
    pub forest_nodes: usize,
    pub forest_bytes: usize,
    pub states: usize,
    pub reductions: usize,
    pub shifts: usize,
    pub skipped_bytes: usize,
}

/// What the per-position actor is currently working on. Passed explicitly so
/// the reduce machinery has no hidden state beyond the parser itself.
#[derive(Clone, Copy)]
struct ActorEnv {
    state: StateId,
    stack: StackId,
    reduce_all: bool,
}

/// One reduction in flight: which production, over how many stack links, and
/// how many of its tokens are missing (only nonzero during error recovery).
#[derive(Clone, Copy)]
struct ReduceEnv {
    actor: ActorEnv,
    production: ProdId,
    rule: RuleId,
    length: usize,
    missing: usize,
}

/// The GLR parse engine. Grammar registration happens up front; a `parse` or
/// `parse_approx` call then runs a complete session over one source buffer,
/// after which the resulting tree, diagnostics and telemetry can be read
/// until the next call.
pub struct Parser {
    syntax: Syntax,
    table: Table,

    // Per-session state below.
    store: TreeStore,
    gss: StackStore,
    stacks: FutureStacks,
    accepting_stack: Option<StackId>,
    source: String,
    source_name: String,
    start_pos: usize,
    parse_root: Option<RuleId>,
    current_pos: usize,
    /// Index of the vertex currently visited in this position's bucket;
    /// bounds the merge replay in `limited_reduce`.
    top_visiting: usize,
    last_set: Vec<StackId>,
    last_pos: usize,
    stats: ParserStats,
    pub logger: Logger,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            syntax: Syntax::new(),
            table: Table::new(),
            store: TreeStore::new(),
            gss: StackStore::new(),
            stacks: FutureStacks::new(),
            accepting_stack: None,
            source: String::new(),
            source_name: String::new(),
            start_pos: 0,
            parse_root: None,
            current_pos: 0,
            top_visiting: 0,
            last_set: Vec::new(),
            last_pos: 0,
            stats: ParserStats::default(),
            logger: Logger::default(),
        }
    }

    /// Build a parser directly from a grammar description.
    pub fn from_grammar(def: &GrammarDef) -> Result<Self> {
        let mut p = Parser::new();
        p.add_grammar(def)?;
        Ok(p)
    }

    pub fn add_grammar(&mut self, def: &GrammarDef) -> Result<()> {
        def.apply(&mut self.syntax)
    }

    pub fn add_rule(&mut self, name: &str) -> RuleId {
        self.syntax.add_rule(name)
    }

    pub fn add_terminal(&mut self, pattern: &str) -> Result<TermId> {
        self.syntax.add_terminal(pattern)
    }

    pub fn add_production(&mut self, rule: RuleId, spec: ProductionSpec) -> Result<ProdId> {
        self.syntax.add_production(rule, spec)
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    /// Parse the whole of `source` from `start` as the rule `root`. Returns
    /// true when an accepting derivation with all context requirements
    /// satisfied exists; the tree and diagnostics remain readable either
    /// way.
    pub fn parse(&mut self, root: RuleId, source: &str, file: &str, start: usize) -> bool {
        self.init_parse(root, source, file, start);
        self.do_parse(self.start_pos);
        self.finish_parse(&[]);

        match self.accepting_stack {
            Some(acc) => self.gss.node(acc).required.empty(),
            None => false,
        }
    }

    /// Error-tolerant parse: always produces a tree, even for arbitrarily
    /// broken input, and returns the accumulated error score (zero for a
    /// clean parse). `context` names the rules enclosing this fragment, so
    /// context requirements they satisfy are not reported as errors.
    pub fn parse_approx(
        &mut self,
        root: RuleId,
        source: &str,
        file: &str,
        start: usize,
        context: &[RuleId],
    ) -> InfoErrors {
        self.init_parse(root, source, file, start);

        // Start as usual.
        let (mut set, mut pos) = self.do_parse_recover(self.start_pos);

        let length = self.source.len();
        let mut prev_round = (usize::MAX, usize::MAX);
        while pos <= length && self.accepting_pos().map_or(true, |p| p < length) {
            // Resume from the remembered frontier and squeeze out whatever
            // progress the grammar still has, valid or not.
            self.stacks.set_top(set.clone(), &self.gss);
            self.current_pos = pos;
            self.advance_all();
            set = self.stacks.top_items();

            if prev_round == (pos, set.len()) {
                // Nothing moved since the last round; the input is
                // exhausted and forced completion has converged.
                warn!(self, "error recovery made no progress at {}", pos);
                break;
            }
            prev_round = (pos, set.len());

            // Find a place where at least one stack can shift for real.
            let mut shifted = self.actor_shift_all();
            while !shifted && self.current_pos < length {
                let step = self.char_width(self.current_pos);
                self.current_pos += step;
                pos += step;
                self.stats.skipped_bytes += step;
                shifted = self.actor_shift_all();
            }

            // Keep on parsing normally now that something can move.
            if self.current_pos < length {
                self.current_pos += 1;
                pos += 1;
                self.stacks.pop();
                let r = self.do_parse_recover(self.current_pos);
                set = r.0;
                pos = r.1;
            }
        }

        self.finish_parse(context);
        if self.has_tree() {
            let acc = self.accepting_stack.unwrap();
            let errors = self.store.at(self.gss.node(acc).tree).errors();
            // Unfulfilled requirements count as additional bad shifts.
            errors + InfoErrors::shifts(self.gss.node(acc).required.count() as u32)
        } else {
            InfoErrors::failure()
        }
    }

    fn init_parse(&mut self, root: RuleId, source: &str, file: &str, start: usize) {
        assert!(
            source.is_char_boundary(start),
            "start offset {} is not a char boundary",
            start
        );
        self.source.clear();
        self.source.push_str(source);
        self.source_name.clear();
        self.source_name.push_str(file);
        self.start_pos = start;
        self.parse_root = Some(root);

        self.store = TreeStore::new();
        self.gss = StackStore::new();
        self.stacks = FutureStacks::new();
        self.accepting_stack = None;
        self.last_set = Vec::new();
        self.last_pos = 0;
        self.current_pos = start;
        self.top_visiting = 0;
        self.stats = ParserStats::default();

        let state = self.start_state(root);
        let node = self
            .gss
            .add(state, start, None, TreeId::NONE, ParentReq::default());
        self.stacks.put(0, &mut self.gss, &self.store, node);
    }

    fn start_state(&mut self, root: RuleId) -> StateId {
        let mut items = ItemSet::new();
        for &prod in self.syntax.rule_info(root) {
            items.push(Item::first(prod));
        }
        self.table.state_for(items.expand(&self.syntax))
    }

    fn do_parse(&mut self, from: usize) {
        let length = self.source.len();
        for i in from..=length {
            if self.stacks.top_len() > 0 {
                self.actor(i);
            }
            self.stacks.pop();
        }
    }

    /// Like `do_parse`, but also picks the frontier error recovery should
    /// resume from. Line endings make good resynchronization points, so the
    /// last non-empty frontier at or before one is preferred, with a growing
    /// penalty for candidates far from their line ending.
    #[cfg(feature = "backtrack")]
    fn do_parse_recover(&mut self, from: usize) -> (Vec<StackId>, usize) {
        let mut chosen: Option<(Vec<StackId>, usize)> = None;
        let mut badness = 0;
        let mut new_line = from;

        let length = self.source.len();
        for i in from..=length {
            if self.stacks.top_len() > 0 {
                if self.last_pos <= new_line && !self.last_set.is_empty() {
                    let bad = new_line - self.last_pos;
                    if chosen.is_none() || bad < badness {
                        chosen = Some((self.last_set.clone(), self.last_pos));
                    } else {
                        badness += 2;
                    }
                }
                new_line = 0;
                self.actor(i);
            }
            self.stacks.pop();

            if i < length && self.source.as_bytes()[i] == b'\n' {
                new_line = i;
            }
        }

        chosen.unwrap_or_else(|| (self.last_set.clone(), self.last_pos))
    }

    #[cfg(not(feature = "backtrack"))]
    fn do_parse_recover(&mut self, from: usize) -> (Vec<StackId>, usize) {
        self.do_parse(from);
        (self.last_set.clone(), self.last_pos)
    }

    fn finish_parse(&mut self, context: &[RuleId]) {
        self.stacks.clear();

        // Requirements satisfied by the enclosing context are not errors.
        let ctx = ParentReq::from_rules(context);

        if let Some(head) = self.accepting_stack {
            let chain: Vec<StackId> = self.gss.links(head).collect();
            if ctx.any() {
                for &id in &chain {
                    let req = self.gss.node(id).required.remove_all(&ctx);
                    self.gss.node_mut(id).required = req;
                }
            }

            // Put the stacks without requirements first, keeping the
            // insertion order otherwise.
            let (mut order, rest): (Vec<StackId>, Vec<StackId>) = chain
                .iter()
                .copied()
                .partition(|&id| self.gss.node(id).required.empty());
            order.extend(rest);
            for w in order.windows(2) {
                self.gss.node_mut(w[0]).more = Some(w[1]);
            }
            if let Some(&last) = order.last() {
                self.gss.node_mut(last).more = None;
            }
            self.accepting_stack = order.first().copied();
        }

        self.stats.forest_nodes = self.store.node_count();
        self.stats.forest_bytes = self.store.byte_count();
        self.stats.states = self.table.count();
        self.stats.stack_nodes = self.gss.count();
    }

    /// Process every vertex at one position: all reductions for a vertex,
    /// then its shifts, so the forest at this position is complete before
    /// the scan advances past it.
    fn actor(&mut self, pos: usize) {
        debug!("actor at {}", pos);
        self.current_pos = pos;

        let mut i = 0;
        while i < self.stacks.top_len() {
            self.top_visiting = i;
            let now = self.stacks.top_at(i);
            let state = self.gss.node(now).state;
            self.table.fill(state, &self.syntax);
            debug!(
                "visiting {:?}: {}",
                state,
                self.table.items(state).to_string(&self.syntax)
            );

            let env = ActorEnv {
                state,
                stack: now,
                reduce_all: false,
            };
            self.actor_reduce(env, None);
            self.actor_shift(env);
            i += 1;
        }

        if self.stacks.top_len() > 0 {
            self.last_set = self.stacks.top_items();
            self.last_pos = pos;
            self.stats.positions += 1;
        }
    }

    fn actor_shift(&mut self, env: ActorEnv) -> bool {
        let actions = self.table.actions(env.state).to_vec();
        let mut any = false;
        for a in actions {
            let Some(matched) = self
                .syntax
                .match_terminal(a.term, &self.source, self.current_pos)
            else {
                continue;
            };
            // Zero-width matches never advance the scan; they are realized
            // as reductions of the terminal's wrapper rule instead.
            if matched <= self.current_pos {
                continue;
            }

            let offset = matched - self.current_pos;
            // The vertex's own position, not the scan position: during
            // recovery the difference is a skipped region, which the tree
            // must still cover, and which is charged to the leaf.
            let stack_pos = self.gss.node(env.stack).pos();
            let mut errors = InfoErrors::success();
            if stack_pos < self.current_pos {
                errors.set_chars((self.current_pos - stack_pos) as u32);
            }
            let tree = self.store.push_leaf(stack_pos, errors);
            let item = self
                .gss
                .add(a.target, matched, Some(env.stack), tree, ParentReq::default());
            self.stacks.put(offset, &mut self.gss, &self.store, item);
            self.stats.shifts += 1;
            any = true;
            debug!("shift to {:?} at {}", a.target, matched);
        }
        any
    }

    fn actor_reduce(&mut self, env: ActorEnv, through: Option<StackId>) {
        if env.reduce_all {
            self.actor_reduce_all(env, through);
            return;
        }

        let to_reduce = self.table.reductions(env.state).to_vec();
        for prod in to_reduce {
            self.do_reduce(env, prod, through);
        }

        let empty = self.table.reduce_empty(env.state).to_vec();
        for ea in empty {
            if self
                .syntax
                .match_terminal(ea.term, &self.source, self.current_pos)
                != Some(self.current_pos)
            {
                continue;
            }
            self.do_reduce(env, ea.production, through);
        }
    }

    /// Reduce everything in the state, finished or not. Unfinished items are
    /// completed at their dot, with the missing tokens charged as errors.
    fn actor_reduce_all(&mut self, env: ActorEnv, through: Option<StackId>) {
        let to_reduce = self.table.reductions(env.state).to_vec();
        for prod in to_reduce {
            self.do_reduce(env, prod, through);
        }
        // The empty-terminal completions are covered by the forced shifts.

        let items: Vec<Item> = self.table.items(env.state).iter().collect();
        for item in items {
            if item.at_end(&self.syntax) {
                continue;
            }
            debug!("reducing {} early", item.to_string(&self.syntax));
            let renv = ReduceEnv {
                actor: env,
                production: item.prod,
                rule: item.rule(&self.syntax),
                length: item.pos as usize,
                missing: item.length(&self.syntax) - item.pos as usize,
            };
            self.reduce(renv, env.stack, through, renv.length);
        }
    }

    fn do_reduce(&mut self, env: ActorEnv, production: ProdId, through: Option<StackId>) {
        let rule = self.syntax.production_rule(production);
        let length = self.syntax.production_length(production);
        let renv = ReduceEnv {
            actor: env,
            production,
            rule,
            length,
            missing: 0,
        };
        self.reduce(renv, env.stack, through, length);
    }

    /// Walk `len` steps backward through the GSS, branching over every link
    /// of every vertex on the way, and finish the reduction once per
    /// complete path. Iterative: each work-stack frame is a partially
    /// walked path.
    fn reduce(&mut self, env: ReduceEnv, stack: StackId, through: Option<StackId>, len: usize) {
        struct Frame {
            node: StackId,
            through: Option<StackId>,
            len: usize,
            path: Vec<StackId>,
        }
        let mut work = vec![Frame {
            node: stack,
            through,
            len,
            path: Vec::new(),
        }];

        while let Some(f) = work.pop() {
            if f.len == 0 {
                // A path that did not pass `through` was already reduced
                // before the merge; skip it.
                if f.through.is_none() {
                    self.finish_reduce(env, f.node, &f.path);
                }
                continue;
            }
            let links: Vec<StackId> = self.gss.links(f.node).collect();
            for l in links {
                let Some(prev) = self.gss.node(l).prev else {
                    continue;
                };
                let mut path = f.path.clone();
                path.push(l);
                work.push(Frame {
                    node: prev,
                    through: if Some(l) == f.through { None } else { f.through },
                    len: f.len - 1,
                    path,
                });
            }
        }
    }

    fn finish_reduce(&mut self, env: ReduceEnv, stack: StackId, path: &[StackId]) {
        let state = self.gss.node(stack).state;
        self.table.fill(state, &self.syntax);
        let to = self.table.goto(state, env.rule);

        let accept = self.gss.node(stack).prev.is_none() && Some(env.rule) == self.parse_root;
        let reduce = to.is_some();
        if !accept && !reduce {
            return;
        }

        self.stats.reductions += 1;

        // The forest node for this reduction, and the context requirements
        // accumulated over its children.
        let mut required = ParentReq::default();
        let mut errors = InfoErrors::success();
        let mut nonterm_errors = false;
        for &l in path {
            let link_tree = self.gss.node(l).tree;
            let link_required = self.gss.node(l).required.clone();
            let node = self.store.at(link_tree);
            let err = node.errors();
            errors += err;
            nonterm_errors |= node.leaf() && err.any();
            required = required.concat(&link_required);
        }
        errors += InfoErrors::shifts(env.missing as u32);
        if env.missing > 0 || nonterm_errors {
            // Charge the covered span once; inner recoveries already
            // counted their own characters.
            errors.set_chars((self.current_pos - self.gss.node(stack).pos()) as u32);
        }

        let mut used_node = false;
        let node = if env.production.special() == SpecialProd::ESkip {
            // Zero-width terminal match: really just a shift.
            self.store.push_leaf(self.gss.node(stack).pos(), errors)
        } else {
            let mut children = Vec::with_capacity(env.length);
            for i in 0..env.length {
                children.push(self.gss.node(path[env.length - 1 - i]).tree);
            }
            let pos = children
                .first()
                .map(|&c| self.store.at(c).pos())
                .unwrap_or_else(|| self.gss.node(stack).pos());
            self.store.push_node(pos, env.production, errors, children)
        };

        // This rule discharges matching requirements of its children; the
        // production may impose one of its own. A production requiring its
        // own rule must be nested, so the requirement is added after the
        // removal.
        required = required.remove(env.rule);
        if let Some(parent) = self.syntax.production_req(env.production) {
            required = required.concat(&ParentReq::single(parent));
        }

        if accept {
            let add = self.gss.add(
                StateId::ACCEPT,
                self.current_pos,
                Some(stack),
                node,
                required.clone(),
            );
            match self.accepting_stack {
                Some(acc) if self.gss.node(acc).pos() == self.current_pos => {
                    let inserted = self.gss.insert(&self.store, acc, add, &mut used_node);
                    used_node |= inserted;
                }
                _ => {
                    self.accepting_stack = Some(add);
                    used_node = true;
                }
            }
            debug!("accept at {}", self.current_pos);
        }

        if let Some(to) = to {
            let add = self
                .gss
                .add(to, self.current_pos, Some(stack), node, required);
            let old = self.stacks.put_raw(0, &self.gss, add);
            if old == add {
                // Inserted as a fresh vertex; nothing more to do.
                used_node = true;
            } else if self.gss.insert(&self.store, old, add, &mut used_node) {
                used_node = true;
                debug!("merged into {:?}", old);
                // Reductions already made through the existing vertex have
                // not seen the new edge; replay them for it.
                self.limited_reduce(env, add);
            }
        }

        if !used_node {
            self.store.free(node);
        }
    }

    /// Replay reductions for the vertices already visited at this position,
    /// restricted to derivation paths passing through the new link. Vertices
    /// after `top_visiting` will be visited with the edge in place anyway.
    fn limited_reduce(&mut self, env: ReduceEnv, through: StackId) {
        let len = self.stacks.top_len();
        if len == 0 {
            return;
        }
        let limit = self.top_visiting.min(len - 1);
        for i in 0..=limit {
            let item = self.stacks.top_at(i);
            let state = self.gss.node(item).state;
            self.table.fill(state, &self.syntax);
            let aenv = ActorEnv {
                state,
                stack: item,
                reduce_all: env.actor.reduce_all,
            };
            self.actor_reduce(aenv, Some(through));
        }
    }

    /// Forced progress for error recovery: every reduction, then every
    /// shift, whether the input supports them or not.
    fn advance_all(&mut self) {
        // Reductions first, so a production is not reduced a second time at
        // the same spot through a forced shift.
        self.reduce_all();
        self.shift_all();
    }

    fn reduce_all(&mut self) {
        let mut i = 0;
        while i < self.stacks.top_len() {
            self.top_visiting = i;
            let now = self.stacks.top_at(i);
            let state = self.gss.node(now).state;
            self.table.fill(state, &self.syntax);
            let env = ActorEnv {
                state,
                stack: now,
                reduce_all: true,
            };
            self.actor_reduce_all(env, None);
            i += 1;
        }
    }

    fn shift_all(&mut self) {
        let mut start = 0;
        let mut matched = false;
        loop {
            let end = self.stacks.top_len();
            while start < end {
                self.top_visiting = start;
                let now = self.stacks.top_at(start);
                matched |= self.shift_all_node(now);
                start += 1;
            }
            // Stop as soon as some regex matched for real.
            if matched || start >= self.stacks.top_len() {
                break;
            }
        }
    }

    fn shift_all_node(&mut self, now: StackId) -> bool {
        let state = self.gss.node(now).state;
        self.table.fill(state, &self.syntax);
        let now_pos = self.gss.node(now).pos();
        let mut found = false;

        let actions = self.table.actions(state).to_vec();
        for a in actions {
            // A regex that can advance here for real makes forcing this
            // edge unnecessary.
            if let Some(end) = self
                .syntax
                .match_terminal(a.term, &self.source, self.current_pos)
            {
                if end != self.current_pos {
                    found = true;
                    continue;
                }
            }

            let mut errors = InfoErrors::success();
            if !self.syntax.term_nullable(a.term) {
                errors += InfoErrors::shifts(1);
            }
            let tree = self.store.push_leaf(now_pos, errors);
            let item = self
                .gss
                .add(a.target, self.current_pos, Some(now), tree, ParentReq::default());
            self.stacks.put(0, &mut self.gss, &self.store, item);
        }

        // Shift through the nonterminals at this position, pretending their
        // shortest derivation matched.
        for (rule, to) in self.table.gotos(state) {
            // Null terminals are already skipped.
            if self.syntax.rule_kind(rule) == RuleKind::ESkip {
                continue;
            }
            let Some((min_len, min_prod)) = self.syntax.min_rule_derivation(rule) else {
                warn!(self, "rule {} has no productions", self.syntax.rule_name(rule));
                continue;
            };
            let errors = InfoErrors::shifts(min_len as u32);
            let tree = self.store.push_node(now_pos, min_prod, errors, Vec::new());
            let item = self
                .gss
                .add(to, self.current_pos, Some(now), tree, ParentReq::default());
            self.stacks.put(0, &mut self.gss, &self.store, item);
        }

        found
    }

    /// Probe (and perform) the ordinary shifts for every vertex at the
    /// current position. Used by recovery to find the next place where the
    /// parse can move.
    fn actor_shift_all(&mut self) -> bool {
        let mut any = false;
        for now in self.stacks.top_items() {
            let state = self.gss.node(now).state;
            self.table.fill(state, &self.syntax);
            let env = ActorEnv {
                state,
                stack: now,
                reduce_all: false,
            };
            any |= self.actor_shift(env);
        }
        any
    }

    fn accepting_pos(&self) -> Option<usize> {
        self.accepting_stack.map(|acc| self.gss.node(acc).pos())
    }

    fn char_width(&self, pos: usize) -> usize {
        self.source[pos..].chars().next().map_or(1, |c| c.len_utf8())
    }

    fn src_pos(&self, start: usize, end: usize) -> SrcPos {
        SrcPos {
            file: self.source_name.clone(),
            start,
            end,
        }
    }

    // ---------- results ----------

    pub fn has_tree(&self) -> bool {
        self.accepting_stack
            .map_or(false, |acc| !self.gss.node(acc).tree.is_none())
    }

    /// End of the accepted match, when there is one.
    pub fn match_end(&self) -> Option<usize> {
        self.accepting_stack.map(|acc| self.gss.node(acc).pos())
    }

    pub fn has_error(&self) -> bool {
        match self.accepting_stack {
            None => true,
            Some(acc) => {
                self.gss.node(acc).required.any()
                    || self.gss.node(acc).pos() < self.source.len()
            }
        }
    }

    /// Materialize the accepted forest root as a generic tree.
    pub fn tree(&self) -> Option<SyntaxNode> {
        let acc = self.accepting_stack?;
        let tree = self.gss.node(acc).tree;
        if tree.is_none() {
            return None;
        }
        Some(self.build_tree(tree, self.gss.node(acc).pos()))
    }

    fn build_tree(&self, id: TreeId, end_pos: usize) -> SyntaxNode {
        let node = self.store.at(id);
        let production = node
            .production()
            .expect("trying to create a tree from a non-reduced node");
        let mut children = Vec::new();
        self.collect_children(id, end_pos, &mut children);
        SyntaxNode {
            rule: self.syntax.production_rule(production),
            production,
            pos: self.src_pos(node.pos(), end_pos),
            children,
        }
    }

    /// Spans are recovered right to left: each child ends where the next
    /// one starts. Synthetic repetition nodes are spliced inline so the
    /// tree shows the production as written.
    fn collect_children(&self, id: TreeId, end_pos: usize, out: &mut Vec<SyntaxChild>) {
        let node = self.store.at(id);
        let mut spans = Vec::with_capacity(node.children().len());
        let mut pos = end_pos;
        for &c in node.children().iter().rev() {
            spans.push((c, pos));
            pos = self.store.at(c).pos();
        }

        for &(c, end) in spans.iter().rev() {
            let cn = self.store.at(c);
            match cn.production() {
                None => out.push(SyntaxChild::Token(SyntaxToken {
                    text: self.source.get(cn.pos()..end).unwrap_or("").to_string(),
                    pos: self.src_pos(cn.pos(), end),
                })),
                Some(p) => match p.special() {
                    SpecialProd::None => out.push(SyntaxChild::Node(self.build_tree(c, end))),
                    SpecialProd::Epsilon => {}
                    SpecialProd::Repeat => self.collect_children(c, end, out),
                    // An empty terminal match looks like a plain token.
                    SpecialProd::ESkip => out.push(SyntaxChild::Token(SyntaxToken {
                        text: String::new(),
                        pos: self.src_pos(cn.pos(), cn.pos()),
                    })),
                },
            }
        }
    }

    /// Materialize the accepted root as a token-preserving editor tree.
    pub fn info_tree(&self) -> Option<InfoNode> {
        let acc = self.accepting_stack?;
        let tree = self.gss.node(acc).tree;
        if tree.is_none() {
            return None;
        }
        Some(self.build_info(tree, self.gss.node(acc).pos()))
    }

    fn build_info(&self, id: TreeId, end_pos: usize) -> InfoNode {
        let node = self.store.at(id);
        let production = node
            .production()
            .expect("trying to create an info tree from a non-reduced node");

        let mut parts: Vec<(usize, InfoNode)> = Vec::new();
        let mut computed = InfoErrors::success();
        self.collect_info(id, end_pos, None, &mut parts, &mut computed);

        let indent = self
            .syntax
            .production_indent(production)
            .map(|(from, to, kind)| self.indent_hint(&parts, from, to, kind));

        // When the stored tally cannot be explained by the children, the
        // errors happened here.
        let error = computed != node.errors();

        InfoNode::Internal(InfoInternal {
            production,
            rule: self.syntax.production_rule(production),
            children: parts.into_iter().map(|(_, n)| n).collect(),
            indent,
            error,
            delimiter: false,
        })
    }

    fn indent_hint(
        &self,
        parts: &[(usize, InfoNode)],
        from: usize,
        to: usize,
        kind: IndentType,
    ) -> InfoIndent {
        let start = parts
            .iter()
            .position(|&(ti, _)| ti >= from)
            .unwrap_or(parts.len());
        let end = parts
            .iter()
            .rposition(|&(ti, _)| ti < to)
            .map(|i| i + 1)
            .unwrap_or(start);
        InfoIndent { start, end, kind }
    }

    fn collect_info(
        &self,
        id: TreeId,
        end_pos: usize,
        splice_idx: Option<usize>,
        parts: &mut Vec<(usize, InfoNode)>,
        computed: &mut InfoErrors,
    ) {
        let node = self.store.at(id);
        let tokens = node
            .production()
            .map(|p| self.syntax.production_tokens(p))
            .unwrap_or(&[]);

        let mut spans = Vec::with_capacity(node.children().len());
        let mut pos = end_pos;
        for &c in node.children().iter().rev() {
            spans.push((c, pos));
            pos = self.store.at(c).pos();
        }

        for (i, &(c, end)) in spans.iter().rev().enumerate() {
            // Children spliced out of a repetition all belong to the token
            // position the repetition occupies in the surface production.
            let token_idx = splice_idx.unwrap_or(i);
            let tok = tokens.get(i);
            let cn = self.store.at(c);
            match cn.production() {
                None => {
                    // Leaf errors are accounted for by the enclosing node.
                    parts.push((
                        token_idx,
                        InfoNode::Leaf(InfoLeaf {
                            text: self.source.get(cn.pos()..end).unwrap_or("").to_string(),
                            color: tok.and_then(|t| t.color),
                            delimiter: tok.map_or(false, |t| t.delimiter),
                        }),
                    ));
                }
                Some(p) => match p.special() {
                    SpecialProd::None => {
                        let mut sub = self.build_info(c, end);
                        if let InfoNode::Internal(ref mut n) = sub {
                            n.delimiter = tok.map_or(false, |t| t.delimiter);
                        }
                        *computed += cn.errors();
                        parts.push((token_idx, sub));
                    }
                    SpecialProd::Epsilon => {}
                    SpecialProd::Repeat => {
                        self.collect_info(c, end, Some(token_idx), parts, computed)
                    }
                    SpecialProd::ESkip => {
                        parts.push((
                            token_idx,
                            InfoNode::Leaf(InfoLeaf {
                                text: String::new(),
                                color: tok.and_then(|t| t.color),
                                delimiter: false,
                            }),
                        ));
                    }
                },
            }
        }
    }

    // ---------- diagnostics ----------

    pub fn error_message(&self) -> String {
        if let Some(acc) = self.accepting_stack {
            if self.gss.node(acc).required.any() {
                return self.req_error_msg(acc);
            }
        }
        if self.last_pos >= self.source.len() {
            return "Unexpected end of file.".to_string();
        }
        if !self.last_set.is_empty() {
            return self.expected_msg(self.last_pos, &self.last_set);
        }
        "No syntax provided.".to_string()
    }

    fn expected_msg(&self, pos: usize, states: &[StackId]) -> String {
        let mut expected = BTreeSet::new();
        for &s in states {
            let state = self.gss.node(s).state;
            for item in self.table.items(state).iter() {
                let Some(tok) = item.next_token(&self.syntax) else {
                    continue;
                };
                match tok.kind {
                    TokenKind::Rule(r) => {
                        if self.syntax.rule_kind(r) == RuleKind::Normal {
                            expected.insert(self.syntax.rule_name(r).to_string());
                        }
                    }
                    TokenKind::Terminal(t) => {
                        expected.insert(format!("\"{}\"", self.syntax.term_pattern(t)));
                    }
                }
            }
        }

        let mut out = match self.source[pos..].chars().next() {
            Some(c) => format!("Unexpected '{}'.", c.escape_default()),
            None => "Unexpected end of file.".to_string(),
        };
        if !expected.is_empty() {
            out.push_str(" Expected:");
            for e in &expected {
                out.push_str("\n  ");
                out.push_str(e);
            }
        }
        out
    }

    fn req_error_msg(&self, acc: StackId) -> String {
        let mut out = String::new();
        for item in self.gss.links(acc).collect::<Vec<_>>() {
            // Find a production with an unfulfilled requirement.
            let required = self.gss.node(item).required.clone();
            let Some(found) = self.find_missing_req(self.gss.node(item).tree, &required) else {
                continue;
            };
            let node = self.store.at(found);
            let production = node.production().expect("requirement on a leaf");
            let Some(parent) = self.syntax.production_req(production) else {
                continue;
            };
            out.push_str(&format!(
                "The production {} (for the rule {}) needs to be used inside the rule {}.",
                self.syntax.production_name(production),
                self.syntax.rule_name(self.syntax.production_rule(production)),
                self.syntax.rule_name(parent),
            ));
        }
        out
    }

    fn find_missing_req(&self, tree: TreeId, required: &ParentReq) -> Option<TreeId> {
        if tree.is_none() {
            return None;
        }
        let node = self.store.at(tree);
        // Leaves are just shifts.
        if node.leaf() {
            return None;
        }
        let production = node.production().expect("not a leaf");

        if let Some(here) = self.syntax.production_req(production) {
            if required.has(here) {
                return Some(tree);
            }
        }

        // This rule fulfills the matching requirement of anything below it.
        let rule = self.syntax.production_rule(production);
        let required = required.remove(rule);

        for &c in node.children() {
            if let Some(found) = self.find_missing_req(c, &required) {
                return Some(found);
            }
        }
        None
    }

    pub fn error_location(&self) -> SrcPos {
        // Matches the search in `req_error_msg`.
        if let Some(acc) = self.accepting_stack {
            if self.gss.node(acc).required.any() {
                for item in self.gss.links(acc).collect::<Vec<_>>() {
                    let required = self.gss.node(item).required.clone();
                    if let Some(found) =
                        self.find_missing_req(self.gss.node(item).tree, &required)
                    {
                        let pos = self.store.at(found).pos();
                        return self.src_pos(pos, pos + 1);
                    }
                }
            }
        }
        self.src_pos(self.last_pos, self.last_pos + 1)
    }

    // ---------- telemetry ----------

    pub fn node_count(&self) -> usize {
        self.store.node_count()
    }

    pub fn byte_count(&self) -> usize {
        self.store.byte_count()
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// Drop the session state, keeping the grammar and table.
    pub fn clear(&mut self) {
        self.store = TreeStore::new();
        self.gss = StackStore::new();
        self.stacks = FutureStacks::new();
        self.accepting_stack = None;
        self.source.clear();
        self.source_name.clear();
        self.parse_root = None;
        self.last_set = Vec::new();
        self.last_pos = 0;
    }
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}
