mod repo;
mod repo_types;

pub use repo_types::{NewPolicy, Policy};
