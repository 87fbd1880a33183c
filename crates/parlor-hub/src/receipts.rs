use uuid::Uuid;

/// Add `user_id` to a message's combined delivered/read set.
///
/// Returns the updated set and whether it actually changed, so the caller can
/// skip the persistence write when the receipt was already recorded. Set
/// semantics over an ordered container: first receipt wins the position,
/// re-acknowledging is a no-op.
pub fn mark_seen(read_by: Vec<Uuid>, user_id: Uuid) -> (Vec<Uuid>, bool) {
    if read_by.contains(&user_id) {
        return (read_by, false);
    }
    let mut out = read_by;
    out.push(user_id);
    (out, true)
}
