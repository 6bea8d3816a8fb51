//! Small shared helpers.

pub mod group;

pub use group::TaskGroup;

/// Parse a boolean the way build flags are written (`1`, `t`, `true`, `0`, `f`, `false`, ...).
///
/// Returns `None` for anything that is not a recognised boolean literal.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
