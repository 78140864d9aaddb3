pub mod cache;
pub mod resolver;

pub use cache::{IdentityCache, IdentityField};
pub use resolver::IdentityResolver;
