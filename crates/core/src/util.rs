/// Extract the branch name from a ref path like `refs/heads/feature/foo`.
/// The branch name is the final path segment; an input with no separator
/// passes through unchanged.
pub fn branch_from_ref(source_reference: &str) -> &str {
    source_reference.rsplit('/').next().unwrap_or(source_reference)
}
