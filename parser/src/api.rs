use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::glr::{IndentType, ProductionSpec, RepType, Syntax, Token, TokenColor};

/// Serializable description of a grammar: the input surface of the engine.
/// Rules may reference each other freely; everything is resolved when the
/// description is applied to a `Syntax`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct GrammarDef {
    pub rules: Vec<RuleDef>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RuleDef {
    pub name: String,
    #[serde(default)]
    pub productions: Vec<ProductionDef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ProductionDef {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub tokens: Vec<TokenDef>,

    /// This production is only valid nested inside the named rule.
    #[serde(default)]
    pub inside: Option<String>,

    /// Repeat the tokens in `from..to`.
    #[serde(default)]
    pub repeat: Option<RepeatDef>,

    /// Indent the tokens in `from..to` in editor trees.
    #[serde(default)]
    pub indent: Option<IndentDef>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum TokenDef {
    Regex {
        rx: String,
        #[serde(default)]
        color: Option<TokenColor>,
        #[serde(default)]
        delimiter: bool,
    },
    Rule {
        rule: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct RepeatDef {
    pub from: usize,
    pub to: usize,
    pub kind: RepType,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct IndentDef {
    pub from: usize,
    pub to: usize,
    pub kind: IndentType,
}

impl GrammarDef {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("grammar serialization")
    }

    /// Register everything described here into `syntax`. Rules are declared
    /// up front so productions can reference rules defined later in the
    /// description (or already present in the syntax).
    pub fn apply(&self, syntax: &mut Syntax) -> Result<()> {
        for rule in &self.rules {
            syntax.add_rule(&rule.name);
        }

        for rule in &self.rules {
            let rule_id = syntax.lookup_rule(&rule.name).expect("declared above");
            for prod in &rule.productions {
                let mut tokens = Vec::with_capacity(prod.tokens.len());
                for tok in &prod.tokens {
                    tokens.push(match tok {
                        TokenDef::Regex {
                            rx,
                            color,
                            delimiter,
                        } => {
                            let mut t = Token::terminal(syntax.add_terminal(rx)?);
                            t.color = *color;
                            t.delimiter = *delimiter;
                            t
                        }
                        TokenDef::Rule { rule: name } => match syntax.lookup_rule(name) {
                            Some(id) => Token::rule(id),
                            None => bail!(
                                "production of {} references unknown rule {:?}",
                                rule.name,
                                name
                            ),
                        },
                    });
                }
                let inside = match &prod.inside {
                    None => None,
                    Some(name) => match syntax.lookup_rule(name) {
                        Some(id) => Some(id),
                        None => bail!(
                            "production of {} must nest inside unknown rule {:?}",
                            rule.name,
                            name
                        ),
                    },
                };
                syntax.add_production(
                    rule_id,
                    ProductionSpec {
                        name: prod.name.clone(),
                        tokens,
                        inside,
                        repeat: prod.repeat.map(|r| (r.from, r.to, r.kind)),
                        indent: prod.indent.map(|i| (i.from, i.to, i.kind)),
                    },
                )?;
            }
        }
        Ok(())
    }
}
