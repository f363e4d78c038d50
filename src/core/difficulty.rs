use crate::core::Block;

// Difficulty adjustment constants
const TARGET_MINE_RATE: i64 = 5_000; // milliseconds between blocks
const INITIAL_DIFFICULTY: u32 = 10; // difficulty of the genesis block
const MIN_DIFFICULTY: u32 = 1;

/// Per-block retarget: every block moves the difficulty one step up or down
/// relative to its parent depending on how long it took to find.
pub struct DifficultyAdjustment;

impl DifficultyAdjustment {
    /// Difficulty for a block found at `timestamp` on top of `prev`
    pub fn adjust_difficulty(prev: &Block, timestamp: i64) -> u32 {
        let difficulty = prev.get_difficulty();

        if difficulty < MIN_DIFFICULTY {
            return MIN_DIFFICULTY;
        }

        if timestamp.saturating_sub(prev.get_timestamp()) > TARGET_MINE_RATE {
            return difficulty - 1;
        }

        difficulty.saturating_add(1)
    }

    /// Get the initial difficulty for genesis block
    pub fn get_initial_difficulty() -> u32 {
        INITIAL_DIFFICULTY
    }

    /// Adjacent blocks may differ by at most one step
    pub fn is_valid_step(prev: u32, next: u32) -> bool {
        prev.abs_diff(next) <= 1
    }
}
