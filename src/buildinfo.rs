//! Build metadata baked in at compile time. Commit and date come from the
//! release pipeline via `STASHKEEP_COMMIT` / `STASHKEEP_BUILD_DATE`; local
//! builds fall back to placeholders.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const COMMIT: &str = match option_env!("STASHKEEP_COMMIT") {
    Some(commit) => commit,
    None => "none",
};

pub const BUILD_DATE: &str = match option_env!("STASHKEEP_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

pub fn render() -> String {
    format!("version: {VERSION}\ncommit: {COMMIT}\ndate: {BUILD_DATE}")
}
