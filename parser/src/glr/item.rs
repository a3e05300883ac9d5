use std::fmt;

use super::syntax::{ProdId, RuleId, Syntax, Token, TokenKind};

/// Item in the LR tables: a production id plus the dot position inside its
/// token sequence. Cheap to copy and hash, so item sets can be interned.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Item {
    pub prod: ProdId,
    pub pos: u32,
}

impl Item {
    /// The first position of a production.
    pub fn first(prod: ProdId) -> Self {
        Item { prod, pos: 0 }
    }

    pub fn rule(&self, syntax: &Syntax) -> RuleId {
        syntax.production_rule(self.prod)
    }

    pub fn length(&self, syntax: &Syntax) -> usize {
        syntax.production_length(self.prod)
    }

    pub fn at_end(&self, syntax: &Syntax) -> bool {
        self.pos as usize >= self.length(syntax)
    }

    /// The token after the dot, unless the item is at the end.
    pub fn next_token(&self, syntax: &Syntax) -> Option<Token> {
        syntax
            .production_tokens(self.prod)
            .get(self.pos as usize)
            .copied()
    }

    /// The item with the dot advanced one step.
    pub fn advance(&self) -> Item {
        Item {
            prod: self.prod,
            pos: self.pos + 1,
        }
    }

    pub fn to_string(&self, syntax: &Syntax) -> String {
        let mut s = format!(
            "{} ->",
            syntax.rule_name(syntax.production_rule(self.prod))
        );
        for (i, tok) in syntax.production_tokens(self.prod).iter().enumerate() {
            if i == self.pos as usize {
                s.push_str(" *");
            }
            match tok.kind {
                TokenKind::Terminal(t) => {
                    s.push_str(&format!(" \"{}\"", syntax.term_pattern(t)))
                }
                TokenKind::Rule(r) => s.push_str(&format!(" {}", syntax.rule_name(r))),
            }
        }
        if self.at_end(syntax) {
            s.push_str(" *");
        }
        s
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Item({:?}, {})", self.prod, self.pos)
    }
}

/// Ordered set of items. States are interned by their item set, so equality
/// and hashing must not depend on insertion order.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct ItemSet {
    items: Vec<Item>,
}

impl ItemSet {
    pub fn new() -> Self {
        ItemSet::default()
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn at(&self, idx: usize) -> Item {
        self.items[idx]
    }

    pub fn has(&self, item: Item) -> bool {
        self.items.binary_search(&item).is_ok()
    }

    /// Insert the item, keeping the set sorted. Returns true if it was not
    /// present before.
    pub fn push(&mut self, item: Item) -> bool {
        match self.items.binary_search(&item) {
            Ok(_) => false,
            Err(idx) => {
                self.items.insert(idx, item);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Item> + '_ {
        self.items.iter().copied()
    }

    /// Expand all nonterminals after a dot: the LR closure of this set.
    pub fn expand(mut self, syntax: &Syntax) -> ItemSet {
        let mut work: Vec<Item> = self.items.clone();
        while let Some(item) = work.pop() {
            let Some(tok) = item.next_token(syntax) else {
                continue;
            };
            let TokenKind::Rule(rule) = tok.kind else {
                continue;
            };
            for &prod in syntax.rule_info(rule) {
                let first = Item::first(prod);
                if self.push(first) {
                    work.push(first);
                }
            }
        }
        self
    }

    pub fn to_string(&self, syntax: &Syntax) -> String {
        let mut s = String::from("{");
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                s.push_str(", ");
            }
            s.push_str(&item.to_string(syntax));
        }
        s.push('}');
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glr::syntax::ProductionSpec;

    fn sum_syntax() -> (Syntax, RuleId) {
        let mut syn = Syntax::new();
        let sum = syn.add_rule("sum");
        let num = syn.add_terminal("[0-9]+").unwrap();
        let plus = syn.add_terminal(r"\+").unwrap();
        syn.add_production(
            sum,
            ProductionSpec {
                tokens: vec![Token::terminal(num)],
                ..ProductionSpec::default()
            },
        )
        .unwrap();
        syn.add_production(
            sum,
            ProductionSpec {
                tokens: vec![
                    Token::rule(sum),
                    Token::terminal(plus),
                    Token::terminal(num),
                ],
                ..ProductionSpec::default()
            },
        )
        .unwrap();
        (syn, sum)
    }

    #[test]
    fn push_is_idempotent() {
        let (syn, sum) = sum_syntax();
        let prod = syn.rule_info(sum)[0];
        let mut set = ItemSet::new();
        assert!(set.push(Item::first(prod)));
        assert!(!set.push(Item::first(prod)));
        assert_eq!(set.count(), 1);
        assert!(set.has(Item::first(prod)));
        assert_eq!(set.at(0), Item::first(prod));
    }

    #[test]
    fn expand_closes_over_left_recursion() {
        let (syn, sum) = sum_syntax();
        let mut set = ItemSet::new();
        for &prod in syn.rule_info(sum) {
            set.push(Item::first(prod));
        }
        let expanded = set.expand(&syn);
        // Left recursion must not loop; both productions stay at dot 0.
        assert_eq!(expanded.count(), 2);
        for item in expanded.iter() {
            assert_eq!(item.pos, 0);
        }
    }

    #[test]
    fn order_independent_equality() {
        let (syn, sum) = sum_syntax();
        let prods = syn.rule_info(sum);
        let mut a = ItemSet::new();
        a.push(Item::first(prods[0]));
        a.push(Item::first(prods[1]));
        let mut b = ItemSet::new();
        b.push(Item::first(prods[1]));
        b.push(Item::first(prods[0]));
        assert_eq!(a, b);
    }
}
