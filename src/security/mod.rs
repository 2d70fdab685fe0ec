//! Security utilities for fastskill

pub mod path;

pub use path::{
    safe_join, sanitize_path_component, validate_path_component, validate_path_within_root,
    PathSecurityError,
};
