use std::{env, fs::File, io::Read};

use anyhow::{bail, Context, Result};
use glr_parser::{api::GrammarDef, Parser};
use sample_parser::fmt_tree;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        eprintln!("Usage: {} <grammar.json> <root-rule> <input-file>", args[0]);
        std::process::exit(1);
    }

    let grammar_file = read_file_to_string(&args[1])?;
    let grammar = GrammarDef::from_json(&grammar_file).context("invalid grammar")?;
    let root_name = &args[2];
    let input = read_file_to_string(&args[3])?;

    let mut parser = Parser::from_grammar(&grammar)?;
    let Some(root) = parser.syntax().lookup_rule(root_name) else {
        bail!("unknown root rule {:?}", root_name);
    };

    if parser.parse(root, &input, &args[3], 0) && !parser.has_error() {
        let tree = parser.tree().expect("accepted parse has a tree");
        println!("{}", fmt_tree(&parser, &tree));
    } else {
        eprintln!("Parse failed: {}", parser.error_message());
        eprintln!("  at {}", parser.error_location());

        // Try again in error-tolerant mode, like an editor would.
        let errors = parser.parse_approx(root, &input, &args[3], 0, &[]);
        println!("Recovered with {}:", errors);
        if let Some(tree) = parser.tree() {
            println!("{}", fmt_tree(&parser, &tree));
        }
    }

    eprintln!("stats: {}", serde_json::to_string(parser.stats())?);
    Ok(())
}

fn read_file_to_string(filename: &str) -> Result<String> {
    let mut file = File::open(filename).with_context(|| format!("unable to open {}", filename))?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .with_context(|| format!("unable to read {}", filename))?;
    Ok(content)
}
