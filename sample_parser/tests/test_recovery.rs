use glr_parser::{rx, sym, GrammarBuilder};
use sample_parser::*;

#[test]
fn truncated_input_still_yields_a_tree() {
    // "1+2+" is missing its last operand; the tree must still cover the
    // well-formed prefix, with the missing shift priced in.
    let (parser, errors) = check_approx(&sum_grammar(), "sum", "1+2+");
    assert!(errors.any(), "truncated input must cost something");
    assert!(errors.shift_count() >= 1);
    let tree = parser.tree().unwrap();
    let rendered = fmt_tree(&parser, &tree);
    assert!(
        rendered.starts_with("sum(sum(sum(1),+,2)"),
        "prefix must be parsed cleanly, got {}",
        rendered
    );
}

#[test]
fn skip_and_resync() {
    // A stray character in the middle: recovery skips it and resumes the
    // ordinary parse, charging the skipped region to the error score.
    let (parser, errors) = check_approx(&sum_grammar(), "sum", "1+$2+3");
    assert!(errors.any());
    assert!(errors.char_count() >= 1, "the skipped byte must be charged");
    assert_eq!(parser.match_end(), Some(6), "the whole input is covered");
}

#[test]
fn garbage_input_never_fails() {
    let (parser, errors) = check_approx(&sum_grammar(), "sum", "%%%%");
    assert!(errors.any());
    assert!(!errors.is_failure());
    assert!(parser.has_tree());
}

#[test]
fn empty_input_never_fails() {
    let (_, errors) = check_approx(&sum_grammar(), "sum", "");
    assert!(errors.any(), "the missing operand is priced in");
}

#[test]
fn clean_input_costs_nothing_and_matches_parse() {
    let def = sum_grammar();
    let mut parser = make_parser(&def);
    let root = parser.syntax().lookup_rule("sum").unwrap();

    assert!(parser.parse(root, "4+5", "test", 0));
    let exact = fmt_tree(&parser, &parser.tree().unwrap());

    let errors = parser.parse_approx(root, "4+5", "test", 0, &[]);
    assert!(!errors.any());
    let approx = fmt_tree(&parser, &parser.tree().unwrap());
    assert_eq!(exact, approx);
}

#[test]
fn recovery_terminates_on_long_garbage() {
    // Bounded skip steps: recovery walks the input once, it does not thrash.
    let input = "@".repeat(512);
    let (parser, errors) = check_approx(&sum_grammar(), "sum", &input);
    assert!(errors.any());
    assert!(parser.has_tree());
    assert!(parser.stats().skipped_bytes <= input.len());
}

#[test]
fn multiline_recovery() {
    // Statement-per-line grammar with an unparseable middle line. Recovery
    // resynchronizes and the trailing lines parse cleanly.
    let mut b = GrammarBuilder::new();
    b.production("stmts", &[sym("stmt")]);
    b.production("stmts", &[sym("stmts"), sym("stmt")]);
    b.production("stmt", &[rx("[a-z]+=[0-9]+;\n")]);
    let def = b.finalize();

    let input = "a=1;\n####\nb=2;\n";
    let (parser, errors) = check_approx(&def, "stmts", input);
    assert!(errors.any());
    assert_eq!(parser.match_end(), Some(input.len()));
    let info = parser.info_tree().unwrap();
    // The info tree still spans the skipped region.
    assert_eq!(info.length(), input.len());
}

#[test]
fn utf8_input_recovers_on_char_boundaries() {
    // The skipped region contains multi-byte characters; recovery must
    // step over them without splitting a code point.
    let (parser, errors) = check_approx(&sum_grammar(), "sum", "1+漢字2+3");
    assert!(errors.any());
    assert!(parser.has_tree());
    assert_eq!(parser.match_end(), Some("1+漢字2+3".len()));
}
