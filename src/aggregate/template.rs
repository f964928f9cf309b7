/// Wildcard emitted at token positions where cluster members disagree.
pub const WILDCARD: &str = "***";

/// Synthesize the representative template for a cluster of messages.
///
/// Messages are split on whitespace and compared position by position: a
/// token every member agrees on is kept, anything else becomes `***`.
///
/// Known limitation, preserved from the original positional scheme: the
/// alignment stops at the shortest member's token count, so trailing tokens
/// of longer members are dropped without warning. The result is therefore
/// independent of member order but sensitive to whichever member happens to
/// be shortest.
pub fn synthesize_template(messages: &[&str]) -> String {
    let token_rows: Vec<Vec<&str>> = messages
        .iter()
        .map(|m| m.split_whitespace().collect())
        .collect();

    let width = token_rows.iter().map(|row| row.len()).min().unwrap_or(0);

    let mut parts = Vec::with_capacity(width);
    for pos in 0..width {
        let first = token_rows[0][pos];
        if token_rows.iter().all(|row| row[pos] == first) {
            parts.push(first);
        } else {
            parts.push(WILDCARD);
        }
    }

    parts.join(" ")
}
