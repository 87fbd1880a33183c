use uuid::Uuid;

use parlor_types::models::Reaction;

/// Merge an incoming reaction into a message's reaction set.
///
/// Any existing reaction by `user_id` is removed first, so a message never
/// holds more than one reaction per user. If the removed reaction carried the
/// same emoji as the incoming one, the merge stops there (toggle-off);
/// otherwise the new reaction is appended at the end.
pub fn merge(reactions: Vec<Reaction>, user_id: Uuid, emoji: &str) -> Vec<Reaction> {
    let mut toggled_off = false;
    let mut out: Vec<Reaction> = reactions
        .into_iter()
        .filter(|r| {
            if r.user_id == user_id {
                if r.emoji == emoji {
                    toggled_off = true;
                }
                false
            } else {
                true
            }
        })
        .collect();

    if !toggled_off {
        out.push(Reaction {
            user_id,
            emoji: emoji.to_string(),
        });
    }

    out
}
