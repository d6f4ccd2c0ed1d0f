//! Circular turn order over the currently seated players.
//!
//! Seats are dense 0..N-1 indices. Eliminated players keep their seat for
//! the rest of the game and are skipped during advancement; only lobby
//! departures compact the ring.

use std::collections::HashMap;

/// Uid holding a given seat.
pub fn holder_at(positions: &HashMap<String, usize>, seat: usize) -> Option<&String> {
    positions
        .iter()
        .find(|(_, &pos)| pos == seat)
        .map(|(uid, _)| uid)
}

/// Next alive player clockwise from `from_position`, wrapping.
///
/// Scans at most N seats. Finding none is a fatal consistency violation
/// (the game must hold at least one alive player while in progress), not
/// a retryable condition.
pub fn next_alive(
    from_position: usize,
    positions: &HashMap<String, usize>,
    lives: &HashMap<String, u32>,
) -> Result<(String, usize), String> {
    let seat_count = positions.len();
    if seat_count == 0 {
        return Err("turn advancement over an empty ring".to_string());
    }

    let mut seat = (from_position + 1) % seat_count;
    for _ in 0..seat_count {
        match holder_at(positions, seat) {
            Some(uid) => {
                if lives.get(uid).copied().unwrap_or(0) > 0 {
                    return Ok((uid.clone(), seat));
                }
            }
            None => return Err(format!("seat {seat} has no holder")),
        }
        seat = (seat + 1) % seat_count;
    }

    Err("no alive player found in the ring".to_string())
}

/// A lap completes when advancement wraps the ring: the chosen next seat
/// is at or before the seat of the player losing the turn. With no
/// eliminations this is exactly "the loser sits at the highest seat"; a
/// dead tail seat still wraps here, so mid-lap eliminations do not
/// distort the round boundary.
pub fn completes_lap(from_position: usize, next_position: usize) -> bool {
    next_position <= from_position
}

/// Remove a player and re-dense the remaining seat indices, preserving
/// relative order by old seat.
pub fn renumber(
    positions: &HashMap<String, usize>,
    removed_uid: &str,
) -> HashMap<String, usize> {
    let mut remaining: Vec<(&String, usize)> = positions
        .iter()
        .filter(|(uid, _)| uid.as_str() != removed_uid)
        .map(|(uid, &pos)| (uid, pos))
        .collect();
    remaining.sort_by_key(|&(_, pos)| pos);

    remaining
        .into_iter()
        .enumerate()
        .map(|(new_pos, (uid, _))| (uid.clone(), new_pos))
        .collect()
}
