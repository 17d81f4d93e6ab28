//! Core domain types
//!
//! Immutable records passed between the orchestrators, plugins, ranker and
//! resolvers. Parsing helpers (sizes, release names) live next to the types
//! they feed.

pub mod category;
pub mod crawljob;
pub mod search_result;
pub mod stream;

pub use category::{AgeBucket, Category};
pub use crawljob::{CrawlJob, JobPriority};
pub use search_result::{AlternativeUrl, SearchResult, parse_size};
pub use stream::{LanguageKind, ParsedLanguage, Quality, RankedStream, ResolvedStream};
