// The ScrabbleGames table: one row per game, keyed by tournament then game
// id, with a column family for the game itself and one for each player
// side. Every family keeps up to ten versions per cell.

use anyhow::Result;
use tracing::info;

use crate::store::{Store, TableSpec};

pub const TABLE_NAME: &str = "ScrabbleGames";

pub const FAMILY_GAME: &str = "Game";
pub const FAMILY_WINNER: &str = "Winner";
pub const FAMILY_LOSER: &str = "Loser";

pub const MAX_VERSIONS: usize = 10;

// Game family qualifiers.
pub const Q_GAMEID: &[u8] = b"gameid";
pub const Q_TOURNEYID: &[u8] = b"tourneyid";
pub const Q_TIE: &[u8] = b"tie";
pub const Q_ROUND: &[u8] = b"round";
pub const Q_DIVISION: &[u8] = b"division";
pub const Q_DATE: &[u8] = b"date";
pub const Q_LEXICON: &[u8] = b"lexicon";

// Winner and Loser family qualifiers.
pub const Q_ID: &[u8] = b"id";
pub const Q_NAME: &[u8] = b"name";
pub const Q_SCORE: &[u8] = b"score";
pub const Q_OLDRATING: &[u8] = b"oldrating";
pub const Q_NEWRATING: &[u8] = b"newrating";
pub const Q_POS: &[u8] = b"pos";

pub fn table_spec() -> TableSpec {
    TableSpec::new(TABLE_NAME)
        .family(FAMILY_GAME, MAX_VERSIONS)
        .family(FAMILY_WINNER, MAX_VERSIONS)
        .family(FAMILY_LOSER, MAX_VERSIONS)
}

// Drops any existing ScrabbleGames table and creates a fresh, empty one.
// Running against a store that never held the table is the normal first-run
// case, not an error; anything else the store reports comes back to the
// caller.
pub fn create_or_replace_table(store: &Store) -> Result<()> {
    if store.disable_table(TABLE_NAME)? {
        store.delete_table(TABLE_NAME)?;
        info!(table = TABLE_NAME, "dropped previous table");
    }
    store.create_table(table_spec())
}
