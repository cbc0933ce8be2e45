//! Built-in middleware stages.

pub mod compression;
pub mod cors;

pub use compression::{parse_accept_encoding, Algorithm, Compression, CompressionBuilder};
pub use cors::{CorsBuilder, CorsOutcome, CorsPolicy, OriginDecision, OriginPolicy};
