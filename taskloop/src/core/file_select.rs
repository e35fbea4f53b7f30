//! Choose the most likely file to read from a directory listing.

use crate::core::paths::{depth, is_code_file};

/// Listings with more ambiguous candidates than this are not guessed from.
pub const MAX_AMBIGUOUS_CANDIDATES: usize = 5;

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Select a file from `listing`.
///
/// Files named like one of `preferred` win, shallowest first, then by
/// preference order, then shortest path. Otherwise a single code file is
/// taken as is, and 2 to 5 code files resolve to the shallowest/shortest.
/// Larger sets return `None`.
pub fn select_file(listing: &[String], preferred: &[String]) -> Option<String> {
    let preferred_match = listing
        .iter()
        .filter_map(|path| {
            preferred
                .iter()
                .position(|name| file_name(path) == name)
                .map(|rank| (depth(path), rank, path.len(), path))
        })
        .min();
    if let Some((_, _, _, path)) = preferred_match {
        return Some(path.clone());
    }

    let candidates: Vec<&String> = listing.iter().filter(|path| is_code_file(path)).collect();
    match candidates.len() {
        0 => None,
        1 => Some(candidates[0].clone()),
        n if n <= MAX_AMBIGUOUS_CANDIDATES => candidates
            .into_iter()
            .min_by_key(|path| (depth(path), path.len(), path.as_str()))
            .cloned(),
        _ => None,
    }
}
