//! Language selection: script detection, code registry, histograms, and
//! the resolver that combines them.

pub mod history;
pub mod registry;
pub mod resolver;
pub mod script;

pub use history::{LangHistogram, LanguageHistory, RedisLanguageHistory};
pub use resolver::{LangContext, LanguageHints, LanguageResolver};
