mod grammar_tester;

pub use grammar_tester::*;
