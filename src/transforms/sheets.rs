//! A1 notation helpers for spreadsheet values.

/// Zero-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    /// Parses `B2`, `$B$2` or `Sheet1!B2` (the sheet name is ignored).
    pub fn parse(a1: &str) -> Option<Self> {
        let cell = a1.rsplit('!').next()?.replace('$', "");
        let split = cell.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = cell.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let col = letters
            .chars()
            .try_fold(0usize, |acc, c| {
                let v = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
                acc.checked_mul(26)?.checked_add(v)
            })?
            - 1;
        let row: usize = digits.parse().ok()?;
        if row == 0 {
            return None;
        }
        Some(Self { row: row - 1, col })
    }
}

/// Top-left corner of a range such as `Sheet1!B2:D10`.
pub fn range_origin(range: &str) -> Option<CellRef> {
    let start = range.split(':').next()?;
    // a bare sheet name means the range starts at A1
    if !start.chars().any(|c| c.is_ascii_digit()) {
        return Some(CellRef { row: 0, col: 0 });
    }
    CellRef::parse(start)
}

/// Looks up `cell` in a values grid returned for a range starting at `origin`.
pub fn lookup<'a>(values: &'a [Vec<String>], origin: CellRef, cell: CellRef) -> Option<&'a str> {
    let row = cell.row.checked_sub(origin.row)?;
    let col = cell.col.checked_sub(origin.col)?;
    values.get(row)?.get(col).map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_a1() {
        assert_eq!(CellRef::parse("A1"), Some(CellRef { row: 0, col: 0 }));
        assert_eq!(CellRef::parse("b3"), Some(CellRef { row: 2, col: 1 }));
        assert_eq!(CellRef::parse("AA10"), Some(CellRef { row: 9, col: 26 }));
        assert_eq!(CellRef::parse("Sheet1!$C$4"), Some(CellRef { row: 3, col: 2 }));
    }

    #[test]
    fn rejects_bad_refs() {
        assert_eq!(CellRef::parse("A0"), None);
        assert_eq!(CellRef::parse("12"), None);
        assert_eq!(CellRef::parse("A"), None);
        assert_eq!(CellRef::parse("A-1"), None);
    }

    #[test]
    fn range_origins() {
        assert_eq!(range_origin("Sheet1!B2:D10"), Some(CellRef { row: 1, col: 1 }));
        assert_eq!(range_origin("Sheet1"), Some(CellRef { row: 0, col: 0 }));
    }

    #[test]
    fn lookup_relative_to_origin() {
        let values = vec![
            vec!["Team".to_string(), "Score".to_string()],
            vec!["Home".to_string(), "3".to_string()],
        ];
        let origin = range_origin("B2:C3").unwrap();
        assert_eq!(lookup(&values, origin, CellRef::parse("C3").unwrap()), Some("3"));
        assert_eq!(lookup(&values, origin, CellRef::parse("B2").unwrap()), Some("Team"));
        assert_eq!(lookup(&values, origin, CellRef::parse("A1").unwrap()), None);
        assert_eq!(lookup(&values, origin, CellRef::parse("D3").unwrap()), None);
    }
}
