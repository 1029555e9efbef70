// Bulk loader for the cross-tables corpus: reads scrabble_games.csv out of
// a folder, projects each record into the three column families, and puts
// in large batches so one wal sync covers many rows.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::keys;
use crate::schema::{
    FAMILY_GAME, FAMILY_LOSER, FAMILY_WINNER, Q_DATE, Q_DIVISION, Q_GAMEID, Q_ID, Q_LEXICON,
    Q_NAME, Q_NEWRATING, Q_OLDRATING, Q_POS, Q_ROUND, Q_SCORE, Q_TIE, Q_TOURNEYID,
};
use crate::store::{Mutation, Table};

pub const BATCH_SIZE: usize = 100_000;
pub const DATA_FILE_NAME: &str = "scrabble_games.csv";

// gameid, tourneyid, tie, then six winner fields, six loser fields, round,
// division, date, lexicon.
const FIELD_COUNT: usize = 19;

// Loads every record of `<folder>/scrabble_games.csv` into the table and
// flushes, returning the number of records stored. The first line is a
// header. A record with fewer than nineteen fields aborts the load; rows
// already stored stay stored.
pub fn load_from_folder(table: &mut Table, folder: &Path) -> Result<u64> {
    let path = folder.join(DATA_FILE_NAME);
    let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    if lines.next().transpose()?.is_none() {
        warn!(path = %path.display(), "input file is empty");
        return Ok(0);
    }

    let mut batch: Vec<Mutation> = Vec::with_capacity(BATCH_SIZE);
    let mut loaded = 0_u64;
    let mut line_no = 1_u64;
    while let Some(line) = lines.next().transpose()? {
        line_no += 1;
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < FIELD_COUNT {
            bail!(
                "record at line {} has {} fields; {} are required",
                line_no,
                fields.len(),
                FIELD_COUNT
            );
        }
        let key = record_key(&fields).with_context(|| format!("record at line {}", line_no))?;
        batch.push(record_mutation(key, &fields));
        if batch.len() == BATCH_SIZE {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_SIZE));
            table.put(full)?;
            loaded += BATCH_SIZE as u64;
            info!(loaded, "stored batch");
        }
    }
    if !batch.is_empty() {
        loaded += batch.len() as u64;
        table.put(batch)?;
    }
    table.flush()?;
    info!(records = loaded, "load complete");
    Ok(loaded)
}

fn record_key(fields: &[&str]) -> Result<keys::RowKey> {
    let tourney: u64 = fields[1]
        .parse()
        .with_context(|| format!("tourney id {:?} is not a non-negative integer", fields[1]))?;
    let game: u64 = fields[0]
        .parse()
        .with_context(|| format!("game id {:?} is not a non-negative integer", fields[0]))?;
    keys::encode_key(tourney, game)
}

fn record_mutation(key: keys::RowKey, fields: &[&str]) -> Mutation {
    Mutation::new(key.to_vec())
        .set(FAMILY_GAME, Q_GAMEID, fields[0].as_bytes())
        .set(FAMILY_GAME, Q_TOURNEYID, fields[1].as_bytes())
        .set(FAMILY_GAME, Q_TIE, fields[2].as_bytes())
        .set(FAMILY_GAME, Q_ROUND, fields[15].as_bytes())
        .set(FAMILY_GAME, Q_DIVISION, fields[16].as_bytes())
        .set(FAMILY_GAME, Q_DATE, fields[17].as_bytes())
        .set(FAMILY_GAME, Q_LEXICON, fields[18].as_bytes())
        .set(FAMILY_WINNER, Q_ID, fields[3].as_bytes())
        .set(FAMILY_WINNER, Q_NAME, fields[4].as_bytes())
        .set(FAMILY_WINNER, Q_SCORE, fields[5].as_bytes())
        .set(FAMILY_WINNER, Q_OLDRATING, fields[6].as_bytes())
        .set(FAMILY_WINNER, Q_NEWRATING, fields[7].as_bytes())
        .set(FAMILY_WINNER, Q_POS, fields[8].as_bytes())
        .set(FAMILY_LOSER, Q_ID, fields[9].as_bytes())
        .set(FAMILY_LOSER, Q_NAME, fields[10].as_bytes())
        .set(FAMILY_LOSER, Q_SCORE, fields[11].as_bytes())
        .set(FAMILY_LOSER, Q_OLDRATING, fields[12].as_bytes())
        .set(FAMILY_LOSER, Q_NEWRATING, fields[13].as_bytes())
        .set(FAMILY_LOSER, Q_POS, fields[14].as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema;
    use crate::store::{Row, Store};
    use std::io::Write as _;

    const HEADER: &str = "gameid,tourneyid,tie,winnerid,winnername,winnerscore,winneroldrating,winnernewrating,winnerpos,loserid,losername,loserscore,loseroldrating,losernewrating,loserpos,round,division,date,lexicon";

    fn write_csv(folder: &Path, records: &[&str]) {
        let mut file = File::create(folder.join(DATA_FILE_NAME)).unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for record in records {
            writeln!(file, "{}", record).unwrap();
        }
    }

    fn fresh_table(dir: &Path) -> Table {
        let store = Store::open(dir).unwrap();
        schema::create_or_replace_table(&store).unwrap();
        store.table(schema::TABLE_NAME).unwrap()
    }

    fn all_rows(table: &Table) -> Vec<Row> {
        table
            .scan(b"", None, None)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_load_projects_fields() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        write_csv(
            &data,
            &["7,3,True,901,Alice,420,1500,1510,1,902,Bob,418,1400,1395,2,5,A,2019-01-27,TWL06"],
        );

        let mut table = fresh_table(&dir.path().join("store"));
        assert_eq!(load_from_folder(&mut table, &data).unwrap(), 1);

        let rows = all_rows(&table);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.key(), keys::encode_key(3, 7).unwrap().as_slice());
        assert_eq!(row.value(FAMILY_GAME, Q_GAMEID), Some(b"7".as_slice()));
        assert_eq!(row.value(FAMILY_GAME, Q_TOURNEYID), Some(b"3".as_slice()));
        assert_eq!(row.value(FAMILY_GAME, Q_TIE), Some(b"True".as_slice()));
        assert_eq!(row.value(FAMILY_GAME, Q_ROUND), Some(b"5".as_slice()));
        assert_eq!(row.value(FAMILY_GAME, Q_DIVISION), Some(b"A".as_slice()));
        assert_eq!(row.value(FAMILY_GAME, Q_DATE), Some(b"2019-01-27".as_slice()));
        assert_eq!(row.value(FAMILY_GAME, Q_LEXICON), Some(b"TWL06".as_slice()));
        assert_eq!(row.value(FAMILY_WINNER, Q_ID), Some(b"901".as_slice()));
        assert_eq!(row.value(FAMILY_WINNER, Q_NAME), Some(b"Alice".as_slice()));
        assert_eq!(row.value(FAMILY_WINNER, Q_SCORE), Some(b"420".as_slice()));
        assert_eq!(row.value(FAMILY_WINNER, Q_OLDRATING), Some(b"1500".as_slice()));
        assert_eq!(row.value(FAMILY_WINNER, Q_NEWRATING), Some(b"1510".as_slice()));
        assert_eq!(row.value(FAMILY_WINNER, Q_POS), Some(b"1".as_slice()));
        assert_eq!(row.value(FAMILY_LOSER, Q_ID), Some(b"902".as_slice()));
        assert_eq!(row.value(FAMILY_LOSER, Q_NAME), Some(b"Bob".as_slice()));
        assert_eq!(row.value(FAMILY_LOSER, Q_SCORE), Some(b"418".as_slice()));
        assert_eq!(row.value(FAMILY_LOSER, Q_OLDRATING), Some(b"1400".as_slice()));
        assert_eq!(row.value(FAMILY_LOSER, Q_NEWRATING), Some(b"1395".as_slice()));
        assert_eq!(row.value(FAMILY_LOSER, Q_POS), Some(b"2".as_slice()));
    }

    #[test]
    fn test_rows_sorted_by_tourney_then_game() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        write_csv(
            &data,
            &[
                "10,5,False,1,X,1,1,1,1,2,L10,1,1,1,2,1,A,2019-01-01,TWL06",
                "3,5,False,1,X,1,1,1,1,3,L3,1,1,1,2,1,A,2019-01-01,TWL06",
                "1,2,False,1,X,1,1,1,1,4,L1,1,1,1,2,1,A,2019-01-01,TWL06",
            ],
        );

        let mut table = fresh_table(&dir.path().join("store"));
        assert_eq!(load_from_folder(&mut table, &data).unwrap(), 3);

        let got: Vec<(u64, u64)> = all_rows(&table)
            .iter()
            .map(|r| keys::decode_key(r.key()).unwrap())
            .collect();
        assert_eq!(got, vec![(2, 1), (5, 3), (5, 10)]);
    }

    #[test]
    fn test_reload_stacks_versions() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        let record = "7,3,False,901,Alice,420,1500,1510,1,902,Bob,418,1400,1395,2,5,A,2019-01-27,TWL06";
        write_csv(&data, &[record]);

        let mut table = fresh_table(&dir.path().join("store"));
        load_from_folder(&mut table, &data).unwrap();
        load_from_folder(&mut table, &data).unwrap();

        let rows = all_rows(&table);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].versions(FAMILY_WINNER, Q_NAME).len(), 2);
    }

    #[test]
    fn test_short_record_fails_with_line() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        write_csv(
            &data,
            &[
                "1,1,False,1,X,1,1,1,1,2,Y,1,1,1,2,1,A,2019-01-01,TWL06",
                "2,1,False,only,three",
            ],
        );

        let mut table = fresh_table(&dir.path().join("store"));
        let err = load_from_folder(&mut table, &data).unwrap_err();
        assert!(err.to_string().contains("line 3"), "got: {}", err);
    }

    #[test]
    fn test_bad_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        write_csv(
            &data,
            &["x,1,False,1,X,1,1,1,1,2,Y,1,1,1,2,1,A,2019-01-01,TWL06"],
        );

        let mut table = fresh_table(&dir.path().join("store"));
        assert!(load_from_folder(&mut table, &data).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();

        let mut table = fresh_table(&dir.path().join("store"));
        assert!(load_from_folder(&mut table, &data).is_err());
    }

    #[test]
    fn test_header_only_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        write_csv(&data, &[]);

        let mut table = fresh_table(&dir.path().join("store"));
        assert_eq!(load_from_folder(&mut table, &data).unwrap(), 0);
        assert_eq!(all_rows(&table).len(), 0);
    }
}
