//! Parse the historical-data table markup into raw rows.
//!
//! Both layouts render the same column order: date, last, open, max, min,
//! volume, change. Some instruments (mostly currency pairs) omit the volume
//! column.

use scraper::{ElementRef, Html, Selector};

use crate::normalize::dot_decimal;
use crate::types::RawObservation;

/// Parse `<tr>` rows of a table's outer HTML, in document order.
///
/// Header rows (no `<td>`) and rows with too few cells are skipped. Cell text
/// has its decimal commas rewritten to dots.
pub fn parse_history_table(html: &str) -> Vec<RawObservation> {
    let fragment = Html::parse_fragment(html);
    let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("td")) else {
        return Vec::new();
    };

    fragment
        .select(&row_sel)
        .filter_map(|row| {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|cell| dot_decimal(&cell_text(&cell)))
                .collect();
            row_from_cells(cells)
        })
        .collect()
}

fn row_from_cells(cells: Vec<String>) -> Option<RawObservation> {
    let with_volume = match cells.len() {
        n if n >= 7 => true,
        6 => false,
        _ => return None,
    };

    let mut cells = cells.into_iter();
    let mut next = || cells.next().unwrap_or_default();
    let date_text = next();
    let last_text = next();
    let open_text = next();
    let max_text = next();
    let min_text = next();
    let volume_text = if with_volume { next() } else { String::new() };
    let change_text = next();

    Some(RawObservation {
        date_text,
        last_text,
        open_text,
        max_text,
        min_text,
        volume_text,
        change_text,
    })
}

/// Text content with whitespace collapsed.
fn cell_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
        <table data-test="historical-data-table">
          <thead>
            <tr><th>Data</th><th>Ostatnio</th><th>Otwarcie</th><th>Max.</th><th>Min.</th><th>Wol.</th><th>Zmiana%</th></tr>
          </thead>
          <tbody>
            <tr><td><time>05.03.2021</time></td><td>1,1912</td><td>1,1967</td><td>1,1975</td><td>1,1894</td><td></td><td>-0,46%</td></tr>
            <tr><td>04.03.2021</td><td>2.034,50</td><td>2.041,10</td><td>2.050,00</td><td>2.030,00</td><td>182,4K</td><td>0,12%</td></tr>
          </tbody>
        </table>"#;

    #[test]
    fn test_parse_rows_in_order() {
        let rows = parse_history_table(TABLE);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date_text, "05.03.2021");
        assert_eq!(rows[0].last_text, "1.1912");
        assert_eq!(rows[0].volume_text, "");
        assert_eq!(rows[0].change_text, "-0.46%");
        assert_eq!(rows[1].last_text, "2.034.50");
        assert_eq!(rows[1].volume_text, "182.4K");
    }

    #[test]
    fn test_six_column_table_has_no_volume() {
        let html = "<table><tbody><tr><td>05.03.2021</td><td>4,5</td><td>4,4</td><td>4,6</td><td>4,3</td><td>1,2%</td></tr></tbody></table>";
        let rows = parse_history_table(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].volume_text, "");
        assert_eq!(rows[0].change_text, "1.2%");
    }

    #[test]
    fn test_short_rows_and_garbage_skipped() {
        assert!(parse_history_table("<table><tr><td>Brak danych</td></tr></table>").is_empty());
        assert!(parse_history_table("not a table").is_empty());
    }
}
