// The three range-scan queries over the ScrabbleGames table, plus a row
// counter. Each one is a single forward scan; the scan order (tournament,
// then game id) is what the streaming group logic in
// `repeat_players_in_span` leans on.

use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::keys;
use crate::schema::{
    FAMILY_GAME, FAMILY_LOSER, FAMILY_WINNER, Q_GAMEID, Q_ID, Q_NAME, Q_TIE, Q_TOURNEYID,
};
use crate::store::{CellFilter, Row, Table};


// The loser ids of every game in `tourney_id` whose winner is named
// `winner_name`, in ascending game-id order. One entry per game, so a
// repeated opponent appears repeatedly.
pub fn opponents_of_winner(
    table: &Table,
    tourney_id: u64,
    winner_name: &str,
) -> Result<Vec<String>> {
    let (start, end) = keys::tourney_range(tourney_id)?;
    let filter = CellFilter::new(FAMILY_WINNER, Q_NAME, winner_name.as_bytes());
    let mut opponents = Vec::new();
    for row in table.scan(&start, Some(&end), Some(filter))? {
        let row = row?;
        opponents.push(text_cell(&row, FAMILY_LOSER, Q_ID)?);
    }
    Ok(opponents)
}

// The player ids that appear in more than one game of every tournament in
// [first_tourney, last_tourney). The upper tournament is excluded; callers
// that want it included pass `last_tourney + 1`.
//
// One pass over the scan: rows of one tournament are contiguous, so a
// change in Game:tourneyid closes the current tournament's group and folds
// it into the running intersection. The intersection stays unseeded until
// the first group closes, which makes a span holding a single tournament
// yield that tournament's group.
pub fn repeat_players_in_span(
    table: &Table,
    first_tourney: u64,
    last_tourney: u64,
) -> Result<HashSet<String>> {
    let (start, end) = keys::tourney_span(first_tourney, last_tourney)?;
    let mut intersection: Option<HashSet<String>> = None;
    let mut current_group: HashSet<String> = HashSet::new();
    let mut seen_once: HashSet<String> = HashSet::new();
    let mut current_tourney: Option<String> = None;

    for row in table.scan(&start, Some(&end), None)? {
        let row = row?;
        let tourney = text_cell(&row, FAMILY_GAME, Q_TOURNEYID)?;
        if current_tourney.as_deref() != Some(tourney.as_str()) {
            if current_tourney.is_some() {
                close_group(&mut intersection, &mut current_group);
            }
            seen_once.clear();
            current_tourney = Some(tourney);
        }
        for family in [FAMILY_WINNER, FAMILY_LOSER] {
            let player = text_cell(&row, family, Q_ID)?;
            if let Some(owned) = seen_once.take(player.as_str()) {
                current_group.insert(owned);
            } else if !current_group.contains(player.as_str()) {
                seen_once.insert(player);
            }
        }
    }

    Ok(match intersection {
        // Zero or one tournament in range.
        None => current_group,
        Some(mut acc) => {
            acc.retain(|p| current_group.contains(p));
            acc
        }
    })
}

fn close_group(intersection: &mut Option<HashSet<String>>, current_group: &mut HashSet<String>) {
    match intersection {
        None => *intersection = Some(std::mem::take(current_group)),
        Some(acc) => {
            acc.retain(|p| current_group.contains(p));
            current_group.clear();
        }
    }
}

// The game ids of every tied game in `tourney_id`, in ascending game-id
// order.
pub fn tied_games(table: &Table, tourney_id: u64) -> Result<Vec<String>> {
    let (start, end) = keys::tourney_range(tourney_id)?;
    let filter = CellFilter::new(FAMILY_GAME, Q_TIE, b"True");
    let mut games = Vec::new();
    for row in table.scan(&start, Some(&end), Some(filter))? {
        let row = row?;
        games.push(text_cell(&row, FAMILY_GAME, Q_GAMEID)?);
    }
    Ok(games)
}

// Counts the rows of the whole table that hold at least one cell. A
// load-sanity diagnostic, not a fast path: this scans everything.
pub fn count_records(table: &Table) -> Result<u64> {
    let mut rows = 0_u64;
    for row in table.scan(b"", None, None)? {
        let row = row?;
        if !row.is_empty() {
            rows += 1;
        }
    }
    Ok(rows)
}

fn text_cell(row: &Row, family: &str, qualifier: &[u8]) -> Result<String> {
    let raw = row.value(family, qualifier).with_context(|| {
        format!(
            "row {:?} is missing {}:{}",
            String::from_utf8_lossy(row.key()),
            family,
            String::from_utf8_lossy(qualifier)
        )
    })?;
    Ok(String::from_utf8(raw.to_vec())?)
}
