use crate::api::{GrammarDef, ProductionDef, RuleDef, TokenDef};
use crate::glr::TokenColor;

/// Programmatic construction of grammar descriptions, mostly for tests and
/// embedding. Rules spring into existence when first mentioned.
pub struct GrammarBuilder {
    def: GrammarDef,
}

/// A terminal token matching a regex.
pub fn rx(pattern: &str) -> TokenDef {
    TokenDef::Regex {
        rx: pattern.to_string(),
        color: None,
        delimiter: false,
    }
}

/// A terminal token with a highlight color.
pub fn rx_colored(pattern: &str, color: TokenColor) -> TokenDef {
    TokenDef::Regex {
        rx: pattern.to_string(),
        color: Some(color),
        delimiter: false,
    }
}

/// A nonterminal token referencing a rule by name.
pub fn sym(rule: &str) -> TokenDef {
    TokenDef::Rule {
        rule: rule.to_string(),
    }
}

impl GrammarBuilder {
    pub fn new() -> Self {
        GrammarBuilder {
            def: GrammarDef::default(),
        }
    }

    fn rule_mut(&mut self, name: &str) -> &mut RuleDef {
        if let Some(idx) = self.def.rules.iter().position(|r| r.name == name) {
            return &mut self.def.rules[idx];
        }
        self.def.rules.push(RuleDef {
            name: name.to_string(),
            productions: Vec::new(),
        });
        self.def.rules.last_mut().unwrap()
    }

    /// Declare a rule without productions (or make sure it exists).
    pub fn rule(&mut self, name: &str) -> &mut Self {
        self.rule_mut(name);
        self
    }

    /// Add a plain production.
    pub fn production(&mut self, rule: &str, tokens: &[TokenDef]) -> &mut Self {
        self.add(
            rule,
            ProductionDef {
                tokens: tokens.to_vec(),
                ..ProductionDef::default()
            },
        )
    }

    /// Add a production with every knob exposed.
    pub fn add(&mut self, rule: &str, def: ProductionDef) -> &mut Self {
        self.rule_mut(rule).productions.push(def);
        self
    }

    pub fn finalize(&self) -> GrammarDef {
        self.def.clone()
    }
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        GrammarBuilder::new()
    }
}
