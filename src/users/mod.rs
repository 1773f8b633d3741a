mod password;
mod repo;
mod repo_types;

pub use password::{hash_password, HashedPassword};
pub use repo_types::{NewUser, User, UserRole};
