use anyhow::{bail, ensure, Result};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::info::{IndentType, TokenColor};

/// RuleId is an index into the rule table. Synthetic rules (repetition
/// helpers, empty-terminal wrappers) are ordinary entries distinguished by
/// their `RuleKind`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleId(u32);

impl RuleId {
    pub fn new(idx: usize) -> Self {
        RuleId(idx as u32)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Normal,
    /// Synthetic rule produced by repetition desugaring.
    Repeat,
    /// Synthetic rule wrapping a terminal whose regex matches the empty
    /// string.
    ESkip,
}

/// ProdId is an index into the production table, with the top two bits
/// marking the synthetic productions introduced by desugaring. The marker
/// travels with the id so that tree materialization can recognize nodes that
/// must be flattened away without consulting the grammar.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProdId(u32);

const PROD_MASK: u32 = 0xC000_0000;
const PROD_EPSILON: u32 = 0x4000_0000;
const PROD_REPEAT: u32 = 0x8000_0000;
const PROD_ESKIP: u32 = 0xC000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialProd {
    None,
    /// Empty iteration of a repetition.
    Epsilon,
    /// One iteration of a repetition, possibly recursing.
    Repeat,
    /// Zero-width match of a nullable terminal; reduces to a leaf.
    ESkip,
}

impl ProdId {
    fn new(idx: usize, marker: u32) -> Self {
        assert!(idx < (1 << 30), "production table overflow");
        ProdId(idx as u32 | marker)
    }

    pub fn as_index(&self) -> usize {
        (self.0 & !PROD_MASK) as usize
    }

    pub fn special(&self) -> SpecialProd {
        match self.0 & PROD_MASK {
            0 => SpecialProd::None,
            PROD_EPSILON => SpecialProd::Epsilon,
            PROD_REPEAT => SpecialProd::Repeat,
            _ => SpecialProd::ESkip,
        }
    }
}

/// TermId is an index into the terminal table. Terminals are interned by
/// pattern, so the same regex used by several productions is stored (and
/// matched) once.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TermId(u32);

impl TermId {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepType {
    ZeroOne,
    ZeroPlus,
    OnePlus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Terminal(TermId),
    Rule(RuleId),
}

/// One position in a production's token sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub color: Option<TokenColor>,
    pub delimiter: bool,
}

impl Token {
    pub fn terminal(term: TermId) -> Self {
        Token {
            kind: TokenKind::Terminal(term),
            color: None,
            delimiter: false,
        }
    }

    pub fn rule(rule: RuleId) -> Self {
        Token {
            kind: TokenKind::Rule(rule),
            color: None,
            delimiter: false,
        }
    }

    pub fn with_color(mut self, color: TokenColor) -> Self {
        self.color = Some(color);
        self
    }

    pub fn as_delimiter(mut self) -> Self {
        self.delimiter = true;
        self
    }
}

/// Everything needed to register one production.
#[derive(Debug, Clone, Default)]
pub struct ProductionSpec {
    pub name: Option<String>,
    pub tokens: Vec<Token>,
    /// Requirement on the enclosing context: this production is only valid
    /// somewhere inside a derivation of the given rule.
    pub inside: Option<RuleId>,
    /// Half-open token range repeated according to the `RepType`.
    pub repeat: Option<(usize, usize, RepType)>,
    /// Indentation hint for editor trees: the tokens between the two
    /// positions are indented.
    pub indent: Option<(usize, usize, IndentType)>,
}

struct RuleData {
    name: String,
    kind: RuleKind,
    productions: Vec<ProdId>,
}

struct ProdData {
    name: String,
    rule: RuleId,
    tokens: Vec<Token>,
    inside: Option<RuleId>,
    indent: Option<(usize, usize, IndentType)>,
}

struct TermData {
    pattern: String,
    regex: Regex,
    nullable: bool,
    eskip_rule: Option<RuleId>,
    eskip_prod: Option<ProdId>,
}

/// The grammar registry: rules, productions and interned terminals, after
/// desugaring. This is the read-only world the parse table is built from.
pub struct Syntax {
    rules: Vec<RuleData>,
    rule_lookup: FxHashMap<String, RuleId>,
    productions: Vec<ProdData>,
    terminals: Vec<TermData>,
    term_lookup: FxHashMap<String, TermId>,
}

impl Syntax {
    pub fn new() -> Self {
        Syntax {
            rules: Vec::new(),
            rule_lookup: FxHashMap::default(),
            productions: Vec::new(),
            terminals: Vec::new(),
            term_lookup: FxHashMap::default(),
        }
    }

    /// Get or create the rule with the given name.
    pub fn add_rule(&mut self, name: &str) -> RuleId {
        if let Some(&id) = self.rule_lookup.get(name) {
            return id;
        }
        let id = self.push_rule(name.to_string(), RuleKind::Normal);
        self.rule_lookup.insert(name.to_string(), id);
        id
    }

    pub fn lookup_rule(&self, name: &str) -> Option<RuleId> {
        self.rule_lookup.get(name).copied()
    }

    fn push_rule(&mut self, name: String, kind: RuleKind) -> RuleId {
        let id = RuleId::new(self.rules.len());
        self.rules.push(RuleData {
            name,
            kind,
            productions: Vec::new(),
        });
        id
    }

    /// Intern a terminal regex. The pattern is compiled anchored at the
    /// match position; a pattern that can match the empty string additionally
    /// gets a synthetic wrapper rule whose zero-token production stands in
    /// for the empty match (zero-width shifts are forbidden).
    pub fn add_terminal(&mut self, pattern: &str) -> Result<TermId> {
        if let Some(&id) = self.term_lookup.get(pattern) {
            return Ok(id);
        }
        let regex = match Regex::new(&format!(r"\A(?:{})", pattern)) {
            Ok(r) => r,
            Err(e) => bail!("invalid terminal regex {:?}: {}", pattern, e),
        };
        let nullable = regex.is_match("");
        let id = TermId(self.terminals.len() as u32);
        self.terminals.push(TermData {
            pattern: pattern.to_string(),
            regex,
            nullable,
            eskip_rule: None,
            eskip_prod: None,
        });
        self.term_lookup.insert(pattern.to_string(), id);

        if nullable {
            let rule = self.push_rule(format!("({})?", pattern), RuleKind::ESkip);
            let prod = self.push_prod(
                PROD_ESKIP,
                ProdData {
                    name: format!("({})?.empty", pattern),
                    rule,
                    tokens: Vec::new(),
                    inside: None,
                    indent: None,
                },
            );
            let term = &mut self.terminals[id.as_usize()];
            term.eskip_rule = Some(rule);
            term.eskip_prod = Some(prod);
        }
        Ok(id)
    }

    fn push_prod(&mut self, marker: u32, data: ProdData) -> ProdId {
        let id = ProdId::new(self.productions.len(), marker);
        self.rules[data.rule.as_usize()].productions.push(id);
        self.productions.push(data);
        id
    }

    /// Register a production, desugaring any repetition into synthetic
    /// epsilon/repeat productions on a fresh rule.
    pub fn add_production(&mut self, rule: RuleId, spec: ProductionSpec) -> Result<ProdId> {
        ensure!(
            rule.as_usize() < self.rules.len(),
            "unknown rule id {:?}",
            rule
        );
        ensure!(
            self.rules[rule.as_usize()].kind == RuleKind::Normal,
            "cannot add productions to a synthetic rule"
        );
        let name = spec.name.unwrap_or_else(|| {
            format!(
                "{}.{}",
                self.rules[rule.as_usize()].name,
                self.rules[rule.as_usize()].productions.len()
            )
        });

        let tokens = match spec.repeat {
            None => spec.tokens,
            Some((from, to, rep)) => {
                ensure!(
                    from <= to && to <= spec.tokens.len(),
                    "repeat range {}..{} out of bounds in production {}",
                    from,
                    to,
                    name
                );
                self.desugar_repeat(&name, &spec.tokens, from, to, rep)
            }
        };
        if let Some((from, to, _)) = spec.indent {
            ensure!(
                from <= to && to <= tokens.len(),
                "indent range {}..{} out of bounds in production {}",
                from,
                to,
                name
            );
        }

        Ok(self.push_prod(
            0,
            ProdData {
                name,
                rule,
                tokens,
                inside: spec.inside,
                indent: spec.indent,
            },
        ))
    }

    /// Replace the repeated token range with a reference to a synthetic
    /// rule. The synthetic rule derives either nothing (epsilon production)
    /// or one iteration, recursing on itself for unbounded repeats.
    fn desugar_repeat(
        &mut self,
        name: &str,
        tokens: &[Token],
        from: usize,
        to: usize,
        rep: RepType,
    ) -> Vec<Token> {
        let rep_rule = self.push_rule(format!("{}.rep", name), RuleKind::Repeat);
        self.push_prod(
            PROD_EPSILON,
            ProdData {
                name: format!("{}.rep.empty", name),
                rule: rep_rule,
                tokens: Vec::new(),
                inside: None,
                indent: None,
            },
        );
        let mut seg = tokens[from..to].to_vec();
        if rep != RepType::ZeroOne {
            seg.push(Token::rule(rep_rule));
        }
        self.push_prod(
            PROD_REPEAT,
            ProdData {
                name: format!("{}.rep.more", name),
                rule: rep_rule,
                tokens: seg,
                inside: None,
                indent: None,
            },
        );

        // For one-or-more, the first iteration stays in the surface
        // production and the synthetic rule covers the tail.
        let head = if rep == RepType::OnePlus { to } else { from };
        let mut out = tokens[..head].to_vec();
        out.push(Token::rule(rep_rule));
        out.extend_from_slice(&tokens[to..]);
        out
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rule_name(&self, rule: RuleId) -> &str {
        &self.rules[rule.as_usize()].name
    }

    pub fn rule_kind(&self, rule: RuleId) -> RuleKind {
        self.rules[rule.as_usize()].kind
    }

    /// All productions of a rule, in registration order.
    pub fn rule_info(&self, rule: RuleId) -> &[ProdId] {
        &self.rules[rule.as_usize()].productions
    }

    pub fn production_rule(&self, prod: ProdId) -> RuleId {
        self.productions[prod.as_index()].rule
    }

    pub fn production_name(&self, prod: ProdId) -> &str {
        &self.productions[prod.as_index()].name
    }

    pub fn production_length(&self, prod: ProdId) -> usize {
        self.productions[prod.as_index()].tokens.len()
    }

    pub fn production_tokens(&self, prod: ProdId) -> &[Token] {
        &self.productions[prod.as_index()].tokens
    }

    /// The rule this production must be nested inside, if any.
    pub fn production_req(&self, prod: ProdId) -> Option<RuleId> {
        self.productions[prod.as_index()].inside
    }

    pub fn production_indent(&self, prod: ProdId) -> Option<(usize, usize, IndentType)> {
        self.productions[prod.as_index()].indent
    }

    /// Shortest derivation of a rule, used as the penalty-weighted default
    /// when error recovery shifts through a nonterminal without input.
    pub fn min_rule_derivation(&self, rule: RuleId) -> Option<(usize, ProdId)> {
        self.rules[rule.as_usize()]
            .productions
            .iter()
            .map(|&p| (self.production_length(p), p))
            .min_by_key(|&(len, _)| len)
    }

    pub fn term_pattern(&self, term: TermId) -> &str {
        &self.terminals[term.as_usize()].pattern
    }

    pub fn term_nullable(&self, term: TermId) -> bool {
        self.terminals[term.as_usize()].nullable
    }

    pub fn eskip_rule(&self, term: TermId) -> Option<RuleId> {
        self.terminals[term.as_usize()].eskip_rule
    }

    pub fn eskip_prod(&self, term: TermId) -> Option<ProdId> {
        self.terminals[term.as_usize()].eskip_prod
    }

    /// Match a terminal at a byte offset. Returns the end offset of the
    /// match. The pattern is anchored, so this either matches a prefix of
    /// `&source[pos..]` or nothing. Offsets that are not char boundaries
    /// never match.
    pub fn match_terminal(&self, term: TermId, source: &str, pos: usize) -> Option<usize> {
        let tail = source.get(pos..)?;
        self.terminals[term.as_usize()]
            .regex
            .find(tail)
            .map(|m| pos + m.end())
    }
}

impl Default for Syntax {
    fn default() -> Self {
        Syntax::new()
    }
}

/// Set of rules that some production in a derivation still requires as an
/// enclosing context. Kept sorted; operations return new sets, which stays
/// cheap because almost all sets are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentReq {
    ids: Vec<RuleId>,
}

impl ParentReq {
    pub fn single(rule: RuleId) -> Self {
        ParentReq { ids: vec![rule] }
    }

    pub fn from_rules(rules: &[RuleId]) -> Self {
        let mut ids = rules.to_vec();
        ids.sort();
        ids.dedup();
        ParentReq { ids }
    }

    pub fn empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn any(&self) -> bool {
        !self.ids.is_empty()
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn has(&self, rule: RuleId) -> bool {
        self.ids.binary_search(&rule).is_ok()
    }

    /// Does this set contain any rule from `other`?
    pub fn has_any(&self, other: &ParentReq) -> bool {
        other.ids.iter().any(|&r| self.has(r))
    }

    pub fn concat(&self, other: &ParentReq) -> ParentReq {
        if other.ids.is_empty() {
            return self.clone();
        }
        if self.ids.is_empty() {
            return other.clone();
        }
        let mut ids = self.ids.clone();
        ids.extend_from_slice(&other.ids);
        ids.sort();
        ids.dedup();
        ParentReq { ids }
    }

    pub fn remove(&self, rule: RuleId) -> ParentReq {
        match self.ids.binary_search(&rule) {
            Ok(idx) => {
                let mut ids = self.ids.clone();
                ids.remove(idx);
                ParentReq { ids }
            }
            Err(_) => self.clone(),
        }
    }

    pub fn remove_all(&self, other: &ParentReq) -> ParentReq {
        if other.ids.is_empty() || self.ids.is_empty() {
            return self.clone();
        }
        ParentReq {
            ids: self
                .ids
                .iter()
                .copied()
                .filter(|r| !other.has(*r))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.ids.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_interning() {
        let mut syn = Syntax::new();
        let a = syn.add_terminal("[0-9]+").unwrap();
        let b = syn.add_terminal("[0-9]+").unwrap();
        assert_eq!(a, b);
        assert!(!syn.term_nullable(a));
        assert!(syn.eskip_rule(a).is_none());
    }

    #[test]
    fn nullable_terminal_gets_wrapper() {
        let mut syn = Syntax::new();
        let ws = syn.add_terminal("[ \t]*").unwrap();
        assert!(syn.term_nullable(ws));
        let rule = syn.eskip_rule(ws).unwrap();
        assert_eq!(syn.rule_kind(rule), RuleKind::ESkip);
        let prod = syn.eskip_prod(ws).unwrap();
        assert_eq!(prod.special(), SpecialProd::ESkip);
        assert_eq!(syn.production_length(prod), 0);
        assert_eq!(syn.production_rule(prod), rule);
    }

    #[test]
    fn match_is_anchored() {
        let mut syn = Syntax::new();
        let num = syn.add_terminal("[0-9]+").unwrap();
        assert_eq!(syn.match_terminal(num, "12+3", 0), Some(2));
        assert_eq!(syn.match_terminal(num, "12+3", 2), None);
        assert_eq!(syn.match_terminal(num, "12+3", 3), Some(4));
    }

    #[test]
    fn repeat_desugaring() {
        let mut syn = Syntax::new();
        let list = syn.add_rule("list");
        let item = syn.add_rule("item");
        let lp = syn.add_terminal(r"\(").unwrap();
        let rp = syn.add_terminal(r"\)").unwrap();
        let prod = syn
            .add_production(
                list,
                ProductionSpec {
                    tokens: vec![
                        Token::terminal(lp),
                        Token::rule(item),
                        Token::terminal(rp),
                    ],
                    repeat: Some((1, 2, RepType::ZeroPlus)),
                    ..ProductionSpec::default()
                },
            )
            .unwrap();
        // Surface production now refers to the synthetic rule in the middle.
        let tokens = syn.production_tokens(prod);
        assert_eq!(tokens.len(), 3);
        let rep_rule = match tokens[1].kind {
            TokenKind::Rule(r) => r,
            _ => panic!("expected rule token"),
        };
        assert_eq!(syn.rule_kind(rep_rule), RuleKind::Repeat);
        let prods = syn.rule_info(rep_rule);
        assert_eq!(prods.len(), 2);
        assert_eq!(prods[0].special(), SpecialProd::Epsilon);
        assert_eq!(prods[1].special(), SpecialProd::Repeat);
        // The repeat production recurses on its own rule.
        let rep_tokens = syn.production_tokens(prods[1]);
        assert_eq!(rep_tokens.len(), 2);
        assert_eq!(rep_tokens[1].kind, TokenKind::Rule(rep_rule));
    }

    #[test]
    fn parent_req_ops() {
        let a = RuleId::new(1);
        let b = RuleId::new(2);
        let r = ParentReq::single(a).concat(&ParentReq::single(b));
        assert_eq!(r.count(), 2);
        assert!(r.has(a) && r.has(b));
        let r = r.remove(a);
        assert_eq!(r.count(), 1);
        assert!(!r.has(a));
        let r = r.concat(&ParentReq::single(b));
        assert_eq!(r.count(), 1, "concat deduplicates");
        assert!(r.remove_all(&ParentReq::single(b)).empty());
    }
}
