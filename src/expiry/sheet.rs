//! Exchange calendar spreadsheet parsing.
//!
//! The calendar download is an Excel workbook with a few title rows above the
//! real header. The first worksheet is flattened into a grid of strings, then
//! the product code and last trade columns are pulled out by name.

use std::io::Cursor;

use calamine::{Data, DataType, Reader, open_workbook_auto_from_rs};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::domain::CalendarRow;
use crate::symbols::{expand_one_digit_year, month_from_code};

/// Title rows above the column header.
pub const SHEET_HEADER_ROW: usize = 3;

const PRODUCT_CODE_COLUMN: &str = "product code";
const LAST_TRADE_COLUMN: &str = "last trade";

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%b-%Y", "%d %b %Y", "%m/%d/%y"];

const XLSX_MAGIC: &[u8] = b"PK\x03\x04";
const XLS_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

/// A worksheet flattened to text cells.
pub type Grid = Vec<Vec<String>>;

/// Read the first worksheet of a workbook, or a delimited text file.
pub fn read_grid(bytes: &[u8]) -> Result<Grid, String> {
    if bytes.starts_with(XLSX_MAGIC) || bytes.starts_with(XLS_MAGIC) {
        read_workbook(bytes)
    } else {
        read_delimited(bytes)
    }
}

fn read_workbook(bytes: &[u8]) -> Result<Grid, String> {
    let mut workbook =
        open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(|e| format!("not a workbook: {e}"))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "workbook has no worksheets".to_string())?
        .map_err(|e| format!("unreadable worksheet: {e}"))?;

    // The range starts at the first used cell; pad it back to A1 so row and
    // column positions match the sheet.
    let (first_row, first_col) = range.start().unwrap_or((0, 0));
    let mut grid: Grid = vec![Vec::new(); first_row as usize];
    for row in range.rows() {
        let mut cells = vec![String::new(); first_col as usize];
        cells.extend(row.iter().map(cell_text));
        grid.push(cells);
    }
    Ok(grid)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| cell.to_string()),
        Data::Empty => String::new(),
        _ => cell.to_string(),
    }
}

fn read_delimited(bytes: &[u8]) -> Result<Grid, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    reader
        .records()
        .map(|r| {
            r.map(|record| record.iter().map(str::to_string).collect())
                .map_err(|e| format!("malformed sheet row: {e}"))
        })
        .collect()
}

/// Extract calendar rows for `root` from a flattened sheet.
///
/// Product codes are rebuilt as `root + month code + 2-digit year`: the sheet's
/// own root spelling is not reliable. Single-digit years are expanded around
/// `reference_year`. Rows without a usable code or date are skipped.
pub fn calendar_rows(root: &str, grid: &Grid, reference_year: i32) -> Result<Vec<CalendarRow>, String> {
    let header = grid
        .get(SHEET_HEADER_ROW)
        .ok_or_else(|| format!("sheet has fewer than {} rows", SHEET_HEADER_ROW + 1))?;
    let columns: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();

    let find = |name: &str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| format!("missing '{name}' column"))
    };
    let code_idx = find(PRODUCT_CODE_COLUMN)?;
    let date_idx = find(LAST_TRADE_COLUMN)?;

    let mut out = Vec::new();
    for row in grid.iter().skip(SHEET_HEADER_ROW + 1) {
        let (Some(code), Some(date)) = (row.get(code_idx), row.get(date_idx)) else {
            continue;
        };
        let Some(product_code) = canonical_code(root, code, reference_year) else {
            if !code.trim().is_empty() {
                debug!(root, code = code.as_str(), "unrecognised product code");
            }
            continue;
        };
        let Some(last_trade_date) = parse_sheet_date(date) else {
            debug!(root, code = code.as_str(), date = date.as_str(), "unparseable last trade date");
            continue;
        };
        out.push(CalendarRow {
            product_code,
            last_trade_date,
        });
    }
    Ok(out)
}

fn canonical_code(root: &str, code: &str, reference_year: i32) -> Option<String> {
    let code = code.trim().to_ascii_uppercase();
    let digits = code.bytes().rev().take_while(|b| b.is_ascii_digit()).count();
    if !(1..=2).contains(&digits) || code.len() <= digits {
        return None;
    }
    let (head, year) = code.split_at(code.len() - digits);
    let month = head.chars().last()?;
    month_from_code(month)?;

    let yy = if digits == 1 {
        let d: i32 = year.parse().ok()?;
        expand_one_digit_year(d, reference_year) % 100
    } else {
        year.parse().ok()?
    };
    Some(format!("{root}{month}{yy:02}"))
}

fn parse_sheet_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(body: &str) -> Grid {
        let text = format!(
            "E-mini S&P 500 Futures,,\nCalendar,,\n,,\nContract Month,Product Code,Last Trade\n{body}"
        );
        read_grid(text.as_bytes()).unwrap()
    }

    #[test]
    fn rebuilds_codes_from_canonical_root() {
        let grid = sheet("Dec 2024,ESZ4,12/20/2024\nMar 2025,E1H5,2025-03-21\n");
        let rows = calendar_rows("ES", &grid, 2024).unwrap();
        assert_eq!(
            rows,
            vec![
                CalendarRow {
                    product_code: "ESZ24".to_string(),
                    last_trade_date: NaiveDate::from_ymd_opt(2024, 12, 20).unwrap(),
                },
                CalendarRow {
                    product_code: "ESH25".to_string(),
                    last_trade_date: NaiveDate::from_ymd_opt(2025, 3, 21).unwrap(),
                },
            ]
        );
    }

    #[test]
    fn two_digit_sheet_years_are_kept() {
        let grid = sheet("Jun 2031,CLM31,20-May-2031\n");
        let rows = calendar_rows("CL", &grid, 2024).unwrap();
        assert_eq!(rows[0].product_code, "CLM31");
        assert_eq!(rows[0].last_trade_date, NaiveDate::from_ymd_opt(2031, 5, 20).unwrap());
    }

    #[test]
    fn skips_rows_without_code_or_date() {
        let grid = sheet(",,\nDec 2024,ESZ4,TBD\nFootnote,,\n");
        let rows = calendar_rows("ES", &grid, 2024).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn missing_columns_are_reported() {
        let grid = read_grid(b"a\nb\nc\nFoo,Bar\n1,2\n").unwrap();
        let err = calendar_rows("ES", &grid, 2024).unwrap_err();
        assert!(err.contains("product code"));
    }

    #[test]
    fn short_sheet_is_rejected() {
        let grid = read_grid(b"only,one\n").unwrap();
        assert!(calendar_rows("ES", &grid, 2024).is_err());
    }

    /// Minimal `.xlsx` with one worksheet. `cells` are `(ref, xml)` pairs;
    /// style 1 is the built-in short date format.
    fn xlsx(rows: &[(u32, &[(&str, &str)])]) -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        const MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
        const REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
        const PKG: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

        let mut sheet_data = String::new();
        for (r, cells) in rows {
            sheet_data.push_str(&format!("<row r=\"{r}\">"));
            for (cell_ref, xml) in *cells {
                sheet_data.push_str(&format!("<c r=\"{cell_ref}\"{xml}</c>"));
            }
            sheet_data.push_str("</row>");
        }

        let parts = [
            (
                "[Content_Types].xml",
                String::from(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
                     <Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
                     <Default Extension=\"xml\" ContentType=\"application/xml\"/>\
                     <Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>\
                     <Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>\
                     <Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>\
                     </Types>"
                ),
            ),
            (
                "_rels/.rels",
                format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Relationships xmlns=\"{PKG}\">\
                     <Relationship Id=\"rId1\" Type=\"{REL}/officeDocument\" Target=\"xl/workbook.xml\"/></Relationships>"
                ),
            ),
            (
                "xl/workbook.xml",
                format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><workbook xmlns=\"{MAIN}\" xmlns:r=\"{REL}\">\
                     <sheets><sheet name=\"Calendar\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>"
                ),
            ),
            (
                "xl/_rels/workbook.xml.rels",
                format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Relationships xmlns=\"{PKG}\">\
                     <Relationship Id=\"rId1\" Type=\"{REL}/worksheet\" Target=\"worksheets/sheet1.xml\"/>\
                     <Relationship Id=\"rId2\" Type=\"{REL}/styles\" Target=\"styles.xml\"/></Relationships>"
                ),
            ),
            (
                "xl/styles.xml",
                format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><styleSheet xmlns=\"{MAIN}\">\
                     <cellXfs count=\"2\"><xf numFmtId=\"0\"/><xf numFmtId=\"14\" applyNumberFormat=\"1\"/></cellXfs></styleSheet>"
                ),
            ),
            (
                "xl/worksheets/sheet1.xml",
                format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?><worksheet xmlns=\"{MAIN}\"><sheetData>{sheet_data}</sheetData></worksheet>"
                ),
            ),
        ];

        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            for (name, body) in &parts {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    fn text(s: &str) -> String {
        format!(" t=\"inlineStr\"><is><t>{s}</t></is>")
    }

    #[test]
    fn reads_workbook_with_date_cells() {
        let (title, sub, month, code, last) = (
            text("E-mini S&amp;P 500 Futures"),
            text("Product Calendar"),
            text("Contract Month"),
            text("Product Code"),
            text("Last Trade"),
        );
        let (dec, esz4) = (text("Dec 2024"), text("ESZ4"));
        // 2024-12-20 as an Excel serial date.
        let serial = " s=\"1\"><v>45646</v>".to_string();

        let bytes = xlsx(&[
            (1, &[("A1", title.as_str())][..]),
            (2, &[("A2", sub.as_str())][..]),
            (4, &[("A4", month.as_str()), ("B4", code.as_str()), ("C4", last.as_str())][..]),
            (5, &[("A5", dec.as_str()), ("B5", esz4.as_str()), ("C5", serial.as_str())][..]),
        ]);

        let grid = read_grid(&bytes).unwrap();
        assert_eq!(grid[4][2], "2024-12-20");
        let rows = calendar_rows("ES", &grid, 2024).unwrap();
        assert_eq!(
            rows,
            vec![CalendarRow {
                product_code: "ESZ24".to_string(),
                last_trade_date: NaiveDate::from_ymd_opt(2024, 12, 20).unwrap(),
            }]
        );
    }

    #[test]
    fn workbook_positions_count_from_a1() {
        // Blank first row and column: the header is still the fourth sheet row.
        let (title, sub, code, last) = (
            text("Calendar"),
            text("Updated daily"),
            text("Product Code"),
            text("Last Trade"),
        );
        let (clz4, date) = (text("CLZ4"), text("11/20/2024"));
        let bytes = xlsx(&[
            (2, &[("B2", title.as_str())][..]),
            (3, &[("B3", sub.as_str())][..]),
            (4, &[("B4", code.as_str()), ("C4", last.as_str())][..]),
            (5, &[("B5", clz4.as_str()), ("C5", date.as_str())][..]),
        ]);

        let grid = read_grid(&bytes).unwrap();
        assert_eq!(grid[SHEET_HEADER_ROW][1], "Product Code");
        assert_eq!(grid[SHEET_HEADER_ROW][0], "");
        let rows = calendar_rows("CL", &grid, 2024).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].product_code, "CLZ24");
        assert_eq!(rows[0].last_trade_date, NaiveDate::from_ymd_opt(2024, 11, 20).unwrap());
    }

    #[test]
    fn workbook_magic_routes_to_calamine() {
        let err = read_grid(b"PK\x03\x04garbage").unwrap_err();
        assert!(err.contains("not a workbook"));
    }
}
