pub mod api;
pub mod glr;

mod grammar_builder;
mod logging;

pub use glr::{InfoErrors, InfoNode, Parser, ParserStats, SyntaxNode};
pub use grammar_builder::{rx, rx_colored, sym, GrammarBuilder};
pub use logging::Logger;

#[macro_export]
macro_rules! warn {
    ($s:expr, $($arg:tt)*) => {
        if $s.logger.level_enabled(1) {
            $s.logger.warn(&format!($($arg)*));
        }
    };
}
