use glr_parser::api::GrammarDef;
use glr_parser::glr::{InfoErrors, SyntaxChild, SyntaxNode};
use glr_parser::Parser;

/// Render a tree compactly for comparisons: each node is the rule name with
/// its children in parentheses, tokens appear verbatim.
///
/// `sum ::= num | sum "+" num` over `1+2` renders as `sum(sum(1),+,2)`.
pub fn fmt_tree(parser: &Parser, node: &SyntaxNode) -> String {
    let mut out = format!("{}(", parser.syntax().rule_name(node.rule));
    for (i, c) in node.children.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match c {
            SyntaxChild::Node(n) => out.push_str(&fmt_tree(parser, n)),
            SyntaxChild::Token(t) => out.push_str(&t.text),
        }
    }
    out.push(')');
    out
}

pub fn make_parser(def: &GrammarDef) -> Parser {
    Parser::from_grammar(def).expect("grammar must be valid")
}

/// Parse `input` completely as `root` and compare the tree rendering.
pub fn check_parse(def: &GrammarDef, root: &str, input: &str, expected: &str) {
    let mut parser = make_parser(def);
    let root_id = parser.syntax().lookup_rule(root).expect("unknown root rule");
    let ok = parser.parse(root_id, input, "test", 0);
    assert!(
        ok,
        "parse of {:?} failed: {}",
        input,
        parser.error_message()
    );
    assert!(
        !parser.has_error(),
        "parse of {:?} left an error: {}",
        input,
        parser.error_message()
    );
    let tree = parser.tree().expect("accepted parse must have a tree");
    assert_eq!(
        fmt_tree(&parser, &tree),
        expected,
        "tree mismatch for {:?}",
        input
    );
}

/// Parse `input` as `root`, expecting no complete accepting parse; returns
/// the parser for further inspection of the diagnostics.
pub fn check_rejects(def: &GrammarDef, root: &str, input: &str) -> Parser {
    let mut parser = make_parser(def);
    let root_id = parser.syntax().lookup_rule(root).expect("unknown root rule");
    parser.parse(root_id, input, "test", 0);
    assert!(
        parser.has_error(),
        "expected {:?} to be rejected, got {:?}",
        input,
        parser.tree().map(|t| fmt_tree(&parser, &t))
    );
    parser
}

/// Run the error-tolerant parse; asserts that a tree always comes back.
pub fn check_approx(def: &GrammarDef, root: &str, input: &str) -> (Parser, InfoErrors) {
    let mut parser = make_parser(def);
    let root_id = parser.syntax().lookup_rule(root).expect("unknown root rule");
    let errors = parser.parse_approx(root_id, input, "test", 0, &[]);
    assert!(
        parser.has_tree(),
        "approximate parse of {:?} produced no tree",
        input
    );
    assert!(
        !errors.is_failure(),
        "approximate parse of {:?} reported failure",
        input
    );
    (parser, errors)
}

/// The left-recursive sum grammar used throughout the tests:
/// `sum ::= [0-9]+ | sum "+" [0-9]+`.
pub fn sum_grammar() -> GrammarDef {
    let mut b = glr_parser::GrammarBuilder::new();
    b.production("sum", &[glr_parser::rx("[0-9]+")]);
    b.production(
        "sum",
        &[
            glr_parser::sym("sum"),
            glr_parser::rx(r"\+"),
            glr_parser::rx("[0-9]+"),
        ],
    );
    b.finalize()
}
