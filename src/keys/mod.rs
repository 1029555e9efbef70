// Row keys for the ScrabbleGames table: twenty ASCII digits, the tournament
// id then the game id, each left-padded with '0' to ten digits. Fixed width
// makes lexicographic order agree with numeric order, so every query is a
// contiguous key range.

use anyhow::{bail, Result};

pub const KEY_LEN: usize = 20;
pub const MAX_ID: u64 = 9_999_999_999;

const ID_DIGITS: usize = 10;

pub type RowKey = [u8; KEY_LEN];

pub fn encode_key(tourney_id: u64, game_id: u64) -> Result<RowKey> {
    if tourney_id > MAX_ID {
        bail!("tourney id {} does not fit in ten decimal digits", tourney_id);
    }
    if game_id > MAX_ID {
        bail!("game id {} does not fit in ten decimal digits", game_id);
    }
    let mut key = [0_u8; KEY_LEN];
    write_padded(tourney_id, &mut key[..ID_DIGITS]);
    write_padded(game_id, &mut key[ID_DIGITS..]);
    Ok(key)
}

pub fn decode_key(key: &[u8]) -> Result<(u64, u64)> {
    if key.len() != KEY_LEN {
        bail!("row key must be {} bytes, got {}", KEY_LEN, key.len());
    }
    Ok((
        read_padded(&key[..ID_DIGITS])?,
        read_padded(&key[ID_DIGITS..])?,
    ))
}

// Bounds of a scan covering every game of one tournament. The end key is
// exclusive and sits at game id 9999999999, so that one id is unreachable;
// real corpora top out far below it.
pub fn tourney_range(tourney_id: u64) -> Result<(RowKey, RowKey)> {
    Ok((encode_key(tourney_id, 0)?, encode_key(tourney_id, MAX_ID)?))
}

// Bounds of a scan covering tournaments `lo` through `hi` exclusive of `hi`:
// the end key is the first key of `hi`. Callers that want `hi` included pass
// `hi + 1`. When `lo >= hi` the range is empty.
pub fn tourney_span(lo: u64, hi: u64) -> Result<(RowKey, RowKey)> {
    Ok((encode_key(lo, 0)?, encode_key(hi, 0)?))
}

fn write_padded(id: u64, out: &mut [u8]) {
    let mut rest = id;
    for slot in out.iter_mut().rev() {
        *slot = b'0' + (rest % 10) as u8;
        rest /= 10;
    }
}

fn read_padded(digits: &[u8]) -> Result<u64> {
    let mut v = 0_u64;
    for &d in digits {
        if !d.is_ascii_digit() {
            bail!("row key contains non-digit byte {:#04x}", d);
        }
        v = v * 10 + (d - b'0') as u64;
    }
    Ok(v)
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_encode_key() {
        assert_eq!(&encode_key(42153, 123).unwrap(), b"00000421530000000123");
        assert_eq!(&encode_key(0, 0).unwrap(), b"00000000000000000000");
        assert_eq!(&encode_key(MAX_ID, MAX_ID).unwrap(), b"99999999999999999999");
    }

    #[test]
    fn test_encode_key_out_of_range() {
        assert!(encode_key(MAX_ID + 1, 0).is_err());
        assert!(encode_key(0, MAX_ID + 1).is_err());
    }

    #[test]
    fn test_decode_key() {
        assert_eq!(decode_key(b"00000421530000000123").unwrap(), (42153, 123));
        assert!(decode_key(b"0000042153").is_err());
        assert!(decode_key(b"0000042153000000012x").is_err());
    }

    #[test]
    fn test_random_roundtrip() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let t = rng.gen_range(0..=MAX_ID);
            let g = rng.gen_range(0..=MAX_ID);
            let key = encode_key(t, g).unwrap();
            assert_eq!(decode_key(&key).unwrap(), (t, g));
        }
    }

    // Key order has to agree with (tourney, game) numeric order for range
    // scans to mean anything.
    #[test]
    fn test_order_agrees_with_ids() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let a = (rng.gen_range(0..=MAX_ID), rng.gen_range(0..=MAX_ID));
            let b = (rng.gen_range(0..=MAX_ID), rng.gen_range(0..=MAX_ID));
            let ka = encode_key(a.0, a.1).unwrap();
            let kb = encode_key(b.0, b.1).unwrap();
            assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }

    #[test]
    fn test_tourney_range() {
        let (start, end) = tourney_range(7).unwrap();
        assert_eq!(&start, b"00000000070000000000");
        assert_eq!(&end, b"00000000079999999999");

        // Every key of tournament 7 falls inside, and neighbours do not.
        let inside = encode_key(7, MAX_ID - 1).unwrap();
        assert!(start.as_slice() <= inside.as_slice() && inside.as_slice() < end.as_slice());
        let below = encode_key(6, MAX_ID).unwrap();
        let above = encode_key(8, 0).unwrap();
        assert!(below.as_slice() < start.as_slice());
        assert!(above.as_slice() >= end.as_slice());
    }

    #[test]
    fn test_tourney_span() {
        let (start, end) = tourney_span(1, 3).unwrap();
        assert_eq!(&start, b"00000000010000000000");
        assert_eq!(&end, b"00000000030000000000");

        // Tournament 3 itself sits at or past the exclusive end.
        let first_of_three = encode_key(3, 0).unwrap();
        assert!(first_of_three.as_slice() >= end.as_slice());
        let last_of_two = encode_key(2, MAX_ID).unwrap();
        assert!(last_of_two.as_slice() < end.as_slice());
    }
}
