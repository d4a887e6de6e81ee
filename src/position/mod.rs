//! Fractional position keys.
//!
//! Keys are base-62 strings with a variable-length integer head followed by an
//! optional fraction: `a0`, `a1`, ..., `az`, `b00`, ... above the start key and
//! `Zz`, `Zy`, ..., `Y zz` style keys below it. Plain byte-wise string
//! comparison gives the sort order, so the backend can `ORDER BY position`.
//!
//! Inserting between two adjacent keys never requires touching any other row.

use std::fmt;

const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ZERO: u8 = b'0';

/// `A` followed by 26 zero digits. Nothing sorts below it.
const SMALLEST_INTEGER: &str = "A00000000000000000000000000";

/// The key handed out for the first row of an empty scope.
pub const START_KEY: &str = "a0";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PositionError {
    InvalidKey(String),
    OutOfOrder { lower: String, upper: String },
    Exhausted,
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionError::InvalidKey(key) => write!(f, "invalid position key: {key:?}"),
            PositionError::OutOfOrder { lower, upper } => {
                write!(f, "position bounds out of order: {lower:?} >= {upper:?}")
            }
            PositionError::Exhausted => write!(f, "position key space exhausted"),
        }
    }
}

impl std::error::Error for PositionError {}

fn digit_index(c: u8) -> Option<usize> {
    DIGITS.iter().position(|&d| d == c)
}

fn digit_at(key: &str, c: u8) -> Result<usize, PositionError> {
    digit_index(c).ok_or_else(|| PositionError::InvalidKey(key.to_string()))
}

fn integer_length(key: &str, head: u8) -> Result<usize, PositionError> {
    match head {
        b'a'..=b'z' => Ok((head - b'a') as usize + 2),
        b'A'..=b'Z' => Ok((b'Z' - head) as usize + 2),
        _ => Err(PositionError::InvalidKey(key.to_string())),
    }
}

fn integer_part(key: &str) -> Result<&str, PositionError> {
    let head = *key
        .as_bytes()
        .first()
        .ok_or_else(|| PositionError::InvalidKey(key.to_string()))?;
    let len = integer_length(key, head)?;
    if len > key.len() || !key.is_ascii() {
        return Err(PositionError::InvalidKey(key.to_string()));
    }
    Ok(&key[..len])
}

/// Check that `key` could have been produced by this module.
pub fn validate_key(key: &str) -> Result<(), PositionError> {
    if key == SMALLEST_INTEGER {
        return Err(PositionError::InvalidKey(key.to_string()));
    }
    let int = integer_part(key)?;
    for &c in &key.as_bytes()[1..] {
        digit_at(key, c)?;
    }
    if key.len() > int.len() && key.ends_with(ZERO as char) {
        return Err(PositionError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Fraction strictly between `a` and `b` (or above `a` when `b` is open).
/// Neither argument may end in the zero digit.
fn midpoint(a: &str, b: Option<&str>) -> Result<String, PositionError> {
    let b = b.filter(|b| !b.is_empty());

    if let Some(b) = b {
        if a >= b {
            return Err(PositionError::OutOfOrder {
                lower: a.to_string(),
                upper: b.to_string(),
            });
        }
    }
    if a.ends_with(ZERO as char) {
        return Err(PositionError::InvalidKey(a.to_string()));
    }
    if let Some(b) = b.filter(|b| b.ends_with(ZERO as char)) {
        return Err(PositionError::InvalidKey(b.to_string()));
    }

    if let Some(b) = b {
        // Strip the shared prefix, treating a missing digit in `a` as zero.
        let (ab, bb) = (a.as_bytes(), b.as_bytes());
        let mut n = 0;
        while n < bb.len() && ab.get(n).copied().unwrap_or(ZERO) == bb[n] {
            n += 1;
        }
        if n > 0 {
            let rest = midpoint(a.get(n..).unwrap_or(""), Some(&b[n..]))?;
            return Ok(format!("{}{}", &b[..n], rest));
        }
    }

    let digit_a = match a.as_bytes().first() {
        Some(&c) => digit_at(a, c)?,
        None => 0,
    };
    let digit_b = match b.and_then(|b| b.as_bytes().first().copied()) {
        Some(c) => digit_at(b.unwrap_or_default(), c)?,
        None => DIGITS.len(),
    };

    if digit_b > digit_a + 1 {
        let mid = (digit_a + digit_b + 1) / 2;
        return Ok((DIGITS[mid] as char).to_string());
    }

    match b.filter(|b| b.len() > 1) {
        Some(b) => Ok(b[..1].to_string()),
        None => {
            let rest = midpoint(a.get(1..).unwrap_or(""), None)?;
            Ok(format!("{}{}", DIGITS[digit_a] as char, rest))
        }
    }
}

fn split_integer(key: &str) -> Result<(u8, Vec<u8>), PositionError> {
    let int = integer_part(key)?;
    let bytes = int.as_bytes();
    Ok((bytes[0], bytes[1..].to_vec()))
}

fn assemble(head: u8, digits: Vec<u8>) -> String {
    let mut out = String::with_capacity(digits.len() + 1);
    out.push(head as char);
    out.extend(digits.into_iter().map(|d| d as char));
    out
}

fn increment_integer(int: &str) -> Result<Option<String>, PositionError> {
    let (head, mut digs) = split_integer(int)?;

    let mut carry = true;
    for i in (0..digs.len()).rev() {
        let d = digit_at(int, digs[i])? + 1;
        if d == DIGITS.len() {
            digs[i] = ZERO;
        } else {
            digs[i] = DIGITS[d];
            carry = false;
            break;
        }
    }

    if !carry {
        return Ok(Some(assemble(head, digs)));
    }
    match head {
        b'Z' => Ok(Some(assemble(b'a', vec![ZERO]))),
        b'z' => Ok(None),
        _ => {
            let next = head + 1;
            if next > b'a' {
                digs.push(ZERO);
            } else {
                digs.pop();
            }
            Ok(Some(assemble(next, digs)))
        }
    }
}

fn decrement_integer(int: &str) -> Result<Option<String>, PositionError> {
    let (head, mut digs) = split_integer(int)?;
    let top = DIGITS[DIGITS.len() - 1];

    let mut borrow = true;
    for i in (0..digs.len()).rev() {
        let d = digit_at(int, digs[i])?;
        if d == 0 {
            digs[i] = top;
        } else {
            digs[i] = DIGITS[d - 1];
            borrow = false;
            break;
        }
    }

    if !borrow {
        return Ok(Some(assemble(head, digs)));
    }
    match head {
        b'a' => Ok(Some(assemble(b'Z', vec![top]))),
        b'A' => Ok(None),
        _ => {
            let prev = head - 1;
            if prev < b'Z' {
                digs.push(top);
            } else {
                digs.pop();
            }
            Ok(Some(assemble(prev, digs)))
        }
    }
}

/// Returns a key that sorts strictly between `lower` and `upper`.
///
/// `None` means the bound is open. `(None, None)` yields [`START_KEY`].
/// Passing `lower >= upper` is a caller bug: the bounds are always read from
/// adjacent rows in sorted order, so it is reported as an error instead of
/// being papered over.
pub fn generate_key_between(
    lower: Option<&str>,
    upper: Option<&str>,
) -> Result<String, PositionError> {
    let result = key_between(lower, upper);
    if let Err(e) = &result {
        log::error!(
            "[position] generate_key_between failed: lower={:?} upper={:?} error={}",
            lower,
            upper,
            e
        );
    }
    result
}

fn key_between(lower: Option<&str>, upper: Option<&str>) -> Result<String, PositionError> {
    if let Some(a) = lower {
        validate_key(a)?;
    }
    if let Some(b) = upper {
        validate_key(b)?;
    }
    if let (Some(a), Some(b)) = (lower, upper) {
        if a >= b {
            return Err(PositionError::OutOfOrder {
                lower: a.to_string(),
                upper: b.to_string(),
            });
        }
    }

    match (lower, upper) {
        (None, None) => Ok(START_KEY.to_string()),
        (None, Some(b)) => {
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];
            if ib == SMALLEST_INTEGER {
                return Ok(format!("{ib}{}", midpoint("", Some(fb))?));
            }
            if ib < b {
                return Ok(ib.to_string());
            }
            decrement_integer(ib)?.ok_or(PositionError::Exhausted)
        }
        (Some(a), None) => {
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            match increment_integer(ia)? {
                Some(next) => Ok(next),
                None => Ok(format!("{ia}{}", midpoint(fa, None)?)),
            }
        }
        (Some(a), Some(b)) => {
            let ia = integer_part(a)?;
            let fa = &a[ia.len()..];
            let ib = integer_part(b)?;
            let fb = &b[ib.len()..];
            if ia == ib {
                return Ok(format!("{ia}{}", midpoint(fa, Some(fb))?));
            }
            let next = increment_integer(ia)?.ok_or(PositionError::Exhausted)?;
            if next.as_str() < b {
                Ok(next)
            } else {
                Ok(format!("{ia}{}", midpoint(fa, None)?))
            }
        }
    }
}

/// `n` ascending keys between `lower` and `upper`, spread so later single
/// insertions stay short.
pub fn generate_n_keys_between(
    lower: Option<&str>,
    upper: Option<&str>,
    n: usize,
) -> Result<Vec<String>, PositionError> {
    match n {
        0 => return Ok(vec![]),
        1 => return Ok(vec![generate_key_between(lower, upper)?]),
        _ => {}
    }

    match (lower, upper) {
        (_, None) => {
            let mut out = Vec::with_capacity(n);
            let mut last = generate_key_between(lower, None)?;
            for _ in 1..n {
                let next = generate_key_between(Some(&last), None)?;
                out.push(std::mem::replace(&mut last, next));
            }
            out.push(last);
            Ok(out)
        }
        (None, Some(b)) => {
            let mut out = Vec::with_capacity(n);
            let mut last = generate_key_between(None, Some(b))?;
            for _ in 1..n {
                let next = generate_key_between(None, Some(&last))?;
                out.push(std::mem::replace(&mut last, next));
            }
            out.push(last);
            out.reverse();
            Ok(out)
        }
        (Some(a), Some(b)) => {
            let mid = n / 2;
            let c = generate_key_between(Some(a), Some(b))?;
            let mut out = generate_n_keys_between(Some(a), Some(&c), mid)?;
            out.push(c.clone());
            out.extend(generate_n_keys_between(Some(&c), Some(b), n - mid - 1)?);
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn between(a: Option<&str>, b: Option<&str>) -> String {
        generate_key_between(a, b).expect("bounds should be valid")
    }

    #[test]
    fn test_open_bounds() {
        assert_eq!(between(None, None), "a0");
        assert_eq!(between(Some("a0"), None), "a1");
        assert_eq!(between(None, Some("a0")), "Zz");
        assert_eq!(between(Some("az"), None), "b00");
        assert_eq!(between(None, Some("b00")), "az");
    }

    #[test]
    fn test_between_adjacent_keys() {
        assert_eq!(between(Some("a0"), Some("a1")), "a0V");
        assert_eq!(between(Some("a1"), Some("a2")), "a1V");
        assert_eq!(between(Some("a0V"), Some("a1")), "a0l");
        assert_eq!(between(Some("Zz"), Some("a0")), "ZzV");
        assert_eq!(between(Some("a0"), Some("a0V")), "a0G");
    }

    #[test]
    fn test_result_is_strictly_between() {
        let cases = [
            (Some("a0"), Some("a1")),
            (Some("a0"), Some("a0V")),
            (Some("Zz"), Some("a0")),
            (Some("a1"), Some("b00")),
            (None, Some("a0G")),
            (Some("b00"), None),
        ];
        for (a, b) in cases {
            let k = between(a, b);
            if let Some(a) = a {
                assert!(a < k.as_str(), "{a} < {k}");
            }
            if let Some(b) = b {
                assert!(k.as_str() < b, "{k} < {b}");
            }
            validate_key(&k).expect("generated key should be valid");
        }
    }

    #[test]
    fn test_repeated_insertion_toward_lower_never_collides() {
        let lower = "a0".to_string();
        let mut upper = "a1".to_string();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let k = between(Some(&lower), Some(&upper));
            assert!(lower < k && k < upper);
            assert!(seen.insert(k.clone()), "duplicate key {k}");
            upper = k;
        }
    }

    #[test]
    fn test_repeated_insertion_toward_upper_never_collides() {
        let mut lower = "a0".to_string();
        let upper = "a1".to_string();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let k = between(Some(&lower), Some(&upper));
            assert!(lower < k && k < upper);
            assert!(seen.insert(k.clone()), "duplicate key {k}");
            lower = k;
        }
    }

    #[test]
    fn test_appending_and_prepending_stay_sorted() {
        let mut keys = vec![between(None, None)];
        for _ in 0..200 {
            let last = keys.last().cloned();
            keys.push(between(last.as_deref(), None));
        }
        for _ in 0..200 {
            let first = keys.first().cloned();
            keys.insert(0, between(None, first.as_deref()));
        }
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_out_of_order_bounds_are_rejected() {
        assert!(matches!(
            generate_key_between(Some("a1"), Some("a0")),
            Err(PositionError::OutOfOrder { .. })
        ));
        assert!(matches!(
            generate_key_between(Some("a1"), Some("a1")),
            Err(PositionError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        for bad in ["", "a", "a10", "!0", "a0!", "aé", "a0é", SMALLEST_INTEGER] {
            assert!(
                matches!(validate_key(bad), Err(PositionError::InvalidKey(_))),
                "{bad:?} should be invalid"
            );
        }
        assert!(generate_key_between(Some("a10"), None).is_err());
        assert!(generate_key_between(Some("aé"), None).is_err());
        assert!(generate_key_between(None, Some("bé0")).is_err());
    }

    #[test]
    fn test_generate_n_keys() {
        assert!(generate_n_keys_between(None, None, 0).unwrap().is_empty());
        assert_eq!(
            generate_n_keys_between(None, None, 3).unwrap(),
            vec!["a0", "a1", "a2"]
        );
        assert_eq!(
            generate_n_keys_between(None, Some("a0"), 2).unwrap(),
            vec!["Zy", "Zz"]
        );

        let keys = generate_n_keys_between(Some("a0"), Some("a1"), 7).unwrap();
        assert_eq!(keys.len(), 7);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys.first().unwrap().as_str() > "a0");
        assert!(keys.last().unwrap().as_str() < "a1");
    }
}
