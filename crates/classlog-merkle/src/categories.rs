//! Recognized session categories.
//!
//! When a session closes, one `child_session_finished` item is propagated
//! into the parent stream for every (category, value) pair present in the
//! session whose category is in this set.

/// Default recognized categories, matching the reference deployment.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "teacher",
    "student",
    "school",
    "classroom",
    "course",
    "assignment",
    "tool",
];
