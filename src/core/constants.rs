use std::ops::RangeInclusive;

/// Maximum players per room.
pub const ROOM_CAPACITY: u32 = 4;

/// Players required before the creator may start.
pub const MIN_PLAYERS_TO_START: u32 = 2;

/// Lives each player joins with.
pub const INITIAL_LIVES: u32 = 3;

/// Floor for the per-turn budget as it shrinks over the game.
pub const MIN_SECONDS_PER_TURN: u32 = 5;

/// Freshly created rooms draw their starting turn budget from this range.
pub const INITIAL_SECONDS_RANGE: RangeInclusive<u32> = 13..=33;

/// Remaining seconds at which the clock starts raising cosmetic ticks.
pub const LOW_TIME_THRESHOLD: u32 = 10;

/// Common English letter runs used as required fragments. A submitted
/// word must contain the current fragment as a substring.
pub const FRAGMENT_POOL: &[&str] = &[
    // 2-letter combinations
    "th", "he", "in", "er", "an", "re", "on", "at", "en", "nd", "st", "es", "ng", "ou",
    // 3-letter combinations
    "the", "and", "ing", "ent", "ion", "tio", "for", "ere", "her", "ate", "est", "all", "int",
    "ter",
];
