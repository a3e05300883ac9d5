use glr_parser::api::ProductionDef;
use glr_parser::glr::{InfoNode, RepType, TokenColor};
use glr_parser::{rx, rx_colored, sym, GrammarBuilder};
use sample_parser::*;

#[test]
fn left_recursive_sum() {
    let def = sum_grammar();
    check_parse(&def, "sum", "1+2+3", "sum(sum(sum(1),+,2),+,3)");
    check_parse(&def, "sum", "7", "sum(7)");
    check_parse(&def, "sum", "10+20", "sum(sum(10),+,20)");
}

#[test]
fn clean_parse_has_zero_cost() {
    let (parser, errors) = check_approx(&sum_grammar(), "sum", "1+2+3");
    assert!(!errors.any(), "clean parse must cost nothing, got {}", errors);
    assert!(!parser.has_error());
    assert_eq!(parser.match_end(), Some(5));
}

#[test]
fn parse_twice_is_deterministic() {
    let def = sum_grammar();
    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("sum").unwrap();

    assert!(parser.parse(root, "1+2+3", "test", 0));
    let first = fmt_tree(&parser, &parser.tree().unwrap());
    let first_nodes = parser.node_count();

    assert!(parser.parse(root, "1+2+3", "test", 0));
    let second = fmt_tree(&parser, &parser.tree().unwrap());
    assert_eq!(first, second);
    assert_eq!(first_nodes, parser.node_count());

    let e1 = parser.parse_approx(root, "1+2+", "test", 0, &[]);
    let t1 = fmt_tree(&parser, &parser.tree().unwrap());
    let e2 = parser.parse_approx(root, "1+2+", "test", 0, &[]);
    let t2 = fmt_tree(&parser, &parser.tree().unwrap());
    assert_eq!(e1, e2);
    assert_eq!(t1, t2);
}

#[test]
fn ambiguous_terminal_is_packed() {
    // Two productions for x both matching the same literal: the terminal
    // leaf must be shared and exactly one tree comes back.
    let mut b = GrammarBuilder::new();
    b.production("x", &[sym("a")]);
    b.production("x", &[sym("b")]);
    b.production("a", &[rx("a")]);
    b.production("b", &[rx("a")]);
    let def = b.finalize();

    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("x").unwrap();
    assert!(parser.parse(root, "a", "test", 0));
    let tree = parser.tree().unwrap();
    // First registered production wins the packed slot.
    assert_eq!(fmt_tree(&parser, &tree), "x(a(a))");
    // One shared leaf, a(a), x(a(a)) and b(a); the discarded x(b(a)) root
    // was returned to the store.
    assert_eq!(parser.node_count(), 4);
}

#[test]
fn highly_ambiguous_grammar_stays_polynomial() {
    // e ::= e e | "a" has exponentially many derivations; sharing must keep
    // the forest small.
    let mut b = GrammarBuilder::new();
    b.production("e", &[sym("e"), sym("e")]);
    b.production("e", &[rx("a")]);
    let def = b.finalize();

    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("e").unwrap();
    let input = "aaaaaaaa";
    assert!(parser.parse(root, input, "test", 0));
    assert!(!parser.has_error());
    let stats = parser.stats().clone();
    // Catalan(7) = 429 distinct trees, well over 6000 nodes if enumerated;
    // the packed forest must stay far below that.
    assert!(
        stats.forest_nodes < 1000,
        "forest blew up: {} nodes",
        stats.forest_nodes
    );
    assert!(parser.tree().is_some());
}

#[test]
fn multi_char_terminals_wait_for_their_offset() {
    let mut b = GrammarBuilder::new();
    b.production("pair", &[rx("[a-z]+"), rx("[0-9]+")]);
    let def = b.finalize();
    check_parse(&def, "pair", "abc123", "pair(abc,123)");
}

#[test]
fn nullable_terminal_never_shifts_empty() {
    let mut b = GrammarBuilder::new();
    b.production("seq", &[rx("a"), rx("b*"), rx("c")]);
    let def = b.finalize();
    // The b* terminal matches empty; the parse must still terminate and
    // accept both with and without the bs.
    check_parse(&def, "seq", "abbc", "seq(a,bb,c)");
    check_parse(&def, "seq", "ac", "seq(a,,c)");
}

#[test]
fn repetition_is_flattened() {
    let mut b = GrammarBuilder::new();
    b.add(
        "list",
        ProductionDef {
            tokens: vec![rx(r"\("), sym("elem"), rx(r"\)")],
            repeat: Some(glr_parser::api::RepeatDef {
                from: 1,
                to: 2,
                kind: RepType::ZeroPlus,
            }),
            ..ProductionDef::default()
        },
    );
    b.production("elem", &[rx("[a-z]+;")]);
    let def = b.finalize();

    check_parse(&def, "list", "(ab;cd;ef;)", "list((,elem(ab;),elem(cd;),elem(ef;),))");
    check_parse(&def, "list", "()", "list((,))");
}

#[test]
fn one_or_more_repetition() {
    let mut b = GrammarBuilder::new();
    b.add(
        "list",
        ProductionDef {
            tokens: vec![sym("elem")],
            repeat: Some(glr_parser::api::RepeatDef {
                from: 0,
                to: 1,
                kind: RepType::OnePlus,
            }),
            ..ProductionDef::default()
        },
    );
    b.production("elem", &[rx("[a-z]+;")]);
    let def = b.finalize();

    check_parse(&def, "list", "ab;", "list(elem(ab;))");
    check_parse(&def, "list", "ab;cd;", "list(elem(ab;),elem(cd;))");
    check_rejects(&def, "list", "");
}

#[test]
fn parse_from_offset() {
    let def = sum_grammar();
    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("sum").unwrap();
    assert!(parser.parse(root, "##1+2", "test", 2));
    assert!(!parser.has_error());
    assert_eq!(parser.match_end(), Some(5));
}

#[test]
fn requirement_outside_required_rule_is_reported() {
    // xp may only appear nested inside wrapper.
    let mut b = GrammarBuilder::new();
    b.add(
        "xp",
        ProductionDef {
            name: Some("xp.x".to_string()),
            tokens: vec![rx("x")],
            inside: Some("wrapper".to_string()),
            ..ProductionDef::default()
        },
    );
    b.production("wrapper", &[rx(r"\("), sym("xp"), rx(r"\)")]);
    b.production("root", &[sym("xp")]);
    b.production("root", &[sym("wrapper")]);
    let def = b.finalize();

    // Inside the wrapper the requirement is discharged.
    check_parse(&def, "root", "(x)", "root(wrapper((,xp(x),)))");

    // Outside it, the parse is rejected and the diagnostic names both the
    // production and the required enclosing rule.
    let parser = check_rejects(&def, "xp", "x");
    let msg = parser.error_message();
    assert!(msg.contains("xp.x"), "message was: {}", msg);
    assert!(msg.contains("wrapper"), "message was: {}", msg);
    let loc = parser.error_location();
    assert_eq!((loc.start, loc.end), (0, 1));
}

#[test]
fn recovery_context_satisfies_requirements() {
    let mut b = GrammarBuilder::new();
    b.add(
        "xp",
        ProductionDef {
            tokens: vec![rx("x")],
            inside: Some("wrapper".to_string()),
            ..ProductionDef::default()
        },
    );
    b.rule("wrapper");
    let def = b.finalize();

    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("xp").unwrap();
    let wrapper = parser.syntax().lookup_rule("wrapper").unwrap();
    // Re-parsing a fragment that the editor knows sits inside a wrapper:
    // the requirement is satisfied by the context, so the parse is clean.
    let errors = parser.parse_approx(root, "x", "test", 0, &[wrapper]);
    assert!(!errors.any(), "context should discharge the requirement");
    assert!(!parser.has_error());
}

#[test]
fn error_message_lists_expected_terminals() {
    let parser = check_rejects(&sum_grammar(), "sum", "1+x");
    let msg = parser.error_message();
    assert!(msg.contains("Unexpected 'x'"), "message was: {}", msg);
    assert!(msg.contains("[0-9]+"), "message was: {}", msg);
    let loc = parser.error_location();
    assert_eq!((loc.start, loc.end), (2, 3));
}

#[test]
fn eof_error_message() {
    let parser = check_rejects(&sum_grammar(), "sum", "");
    assert_eq!(parser.error_message(), "Unexpected end of file.");
}

#[test]
fn info_tree_preserves_every_token() {
    let mut b = GrammarBuilder::new();
    b.production(
        "expr",
        &[
            rx_colored("[0-9]+", TokenColor::Literal),
            rx("[ ]*"),
            rx(r"\+"),
            rx("[ ]*"),
            rx_colored("[0-9]+", TokenColor::Literal),
        ],
    );
    let def = b.finalize();

    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("expr").unwrap();
    assert!(parser.parse(root, "1 + 2", "test", 0));
    let info = parser.info_tree().unwrap();
    // Concatenating the leaves reproduces the input, whitespace included.
    assert_eq!(info.format(), "1 + 2");
    assert!(!info.has_error());
    match &info {
        InfoNode::Internal(node) => {
            assert_eq!(node.children.len(), 5);
            match &node.children[0] {
                InfoNode::Leaf(l) => assert_eq!(l.color, Some(TokenColor::Literal)),
                _ => panic!("expected a leaf"),
            }
        }
        _ => panic!("expected an internal node"),
    }
}

#[test]
fn info_tree_carries_indent_hints() {
    let mut b = GrammarBuilder::new();
    b.add(
        "block",
        ProductionDef {
            tokens: vec![rx(r"\{"), sym("stmt"), rx(r"\}")],
            indent: Some(glr_parser::api::IndentDef {
                from: 1,
                to: 2,
                kind: glr_parser::glr::IndentType::Increase,
            }),
            ..ProductionDef::default()
        },
    );
    b.production("stmt", &[rx("[a-z]+;")]);
    let def = b.finalize();

    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("block").unwrap();
    assert!(parser.parse(root, "{ok;}", "test", 0));
    let info = parser.info_tree().unwrap();
    match info {
        InfoNode::Internal(node) => {
            let indent = node.indent.expect("block production has an indent hint");
            assert_eq!(indent.start, 1);
            assert_eq!(indent.end, 2);
            assert_eq!(indent.kind, glr_parser::glr::IndentType::Increase);
        }
        _ => panic!("expected an internal node"),
    }
}

#[test]
fn grammar_from_json() {
    let def = glr_parser::api::GrammarDef::from_json(
        r#"{
            "rules": [
                {
                    "name": "sum",
                    "productions": [
                        { "tokens": [ { "rx": "[0-9]+" } ] },
                        { "tokens": [ { "rule": "sum" }, { "rx": "\\+" }, { "rx": "[0-9]+" } ] }
                    ]
                }
            ]
        }"#,
    )
    .unwrap();
    check_parse(&def, "sum", "4+5", "sum(sum(4),+,5)");
}

#[test]
fn telemetry_is_populated() {
    let def = sum_grammar();
    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("sum").unwrap();
    assert!(parser.parse(root, "1+2+3", "test", 0));
    assert!(parser.node_count() > 0);
    assert!(parser.byte_count() > 0);
    let stats = parser.stats();
    assert!(stats.states > 0);
    assert!(stats.shifts >= 5, "five terminals were shifted");
    assert!(stats.reductions >= 3, "three sum reductions happened");
}
