use chrono::{Local, NaiveDateTime};
use fantoccini::Locator;
use tracing::{error, info, warn};

use crate::browser::{BrowserOutcome, Session};

const ROWS_SELECTOR: &str = "table.tabla_no_renovados tbody tr";
const DUE_FORMAT: &str = "%d/%m/%y %H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanState {
    Overdue,
    OnTime,
}

#[derive(Debug, PartialEq, Eq)]
pub struct LoanReport {
    pub title: String,
    pub due_text: String,
    pub state: LoanState,
}

/// Read the results table and log each loan's due date with its state.
/// Absence of the table is normal (the renewal flow may have stopped early).
pub async fn report_loan_status(session: &Session) {
    match collect_rows(session).await {
        Ok(None) => info!("no loan status table found"),
        Ok(Some(rows)) => {
            let now = Local::now().naive_local();
            info!("current time: {}", now.format(DUE_FORMAT));
            for report in summarize(&rows, now) {
                let state = match report.state {
                    LoanState::Overdue => "OVERDUE",
                    LoanState::OnTime => "on time",
                };
                info!("{} -> due {} -> {}", report.title, report.due_text, state);
            }
        }
        Err(err) => {
            session.dump_debug("status-exception").await;
            error!("error checking loan status: {err}");
        }
    }
}

/// Classify rows against `now`. Unparseable due dates are logged and
/// skipped without aborting the remaining rows.
pub fn summarize(rows: &[(String, String)], now: NaiveDateTime) -> Vec<LoanReport> {
    rows.iter()
        .filter_map(|(title, due_text)| match parse_due(due_text) {
            Ok(due) => Some(LoanReport {
                title: title.clone(),
                due_text: due_text.trim().to_string(),
                state: classify(due, now),
            }),
            Err(err) => {
                error!("could not parse due date '{due_text}' for '{title}': {err}");
                None
            }
        })
        .collect()
}

fn parse_due(text: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text.trim(), DUE_FORMAT)
}

fn classify(due: NaiveDateTime, now: NaiveDateTime) -> LoanState {
    if due < now {
        LoanState::Overdue
    } else {
        LoanState::OnTime
    }
}

async fn collect_rows(session: &Session) -> Result<Option<Vec<(String, String)>>, BrowserOutcome> {
    info!("checking current loan status");
    session.enter_top().await?;

    let rows = session.client.find_all(Locator::Css(ROWS_SELECTOR)).await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let mut collected = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let cells = row.find_all(Locator::Css("td")).await?;
        if cells.is_empty() {
            warn!("row {} has no cells, skipping", index + 1);
            continue;
        }
        let Some(due_cell) = cells.get(2) else {
            warn!("row {} has fewer than three cells, skipping", index + 1);
            continue;
        };
        let title = cells[0].text().await?.trim().to_string();
        let due_text = due_cell.text().await?.trim().to_string();
        collected.push((title, due_text));
    }
    Ok(Some(collected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn row(title: &str, due: &str) -> (String, String) {
        (title.to_string(), due.to_string())
    }

    #[test]
    fn parses_the_portal_due_format() {
        assert_eq!(parse_due("05/09/25 14:30"), Ok(at(2025, 9, 5, 14, 30)));
        assert_eq!(parse_due("  05/09/25 14:30  "), Ok(at(2025, 9, 5, 14, 30)));
        assert!(parse_due("tomorrow").is_err());
        assert!(parse_due("2025-09-05 14:30").is_err());
    }

    #[test]
    fn earlier_than_now_is_overdue() {
        let now = at(2026, 1, 15, 12, 0);
        assert_eq!(classify(at(2026, 1, 15, 11, 59), now), LoanState::Overdue);
    }

    #[test]
    fn equal_or_later_is_on_time() {
        let now = at(2026, 1, 15, 12, 0);
        assert_eq!(classify(now, now), LoanState::OnTime);
        assert_eq!(classify(at(2026, 1, 16, 9, 0), now), LoanState::OnTime);
    }

    #[test]
    fn malformed_rows_are_skipped_without_losing_the_rest() {
        let now = at(2026, 1, 15, 12, 0);
        let rows = vec![
            row("Cien años de soledad", "14/01/26 20:00"),
            row("Pedro Páramo", "not a date"),
            row("Rayuela", "20/01/26 20:00"),
        ];
        let reports = summarize(&rows, now);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].title, "Cien años de soledad");
        assert_eq!(reports[0].state, LoanState::Overdue);
        assert_eq!(reports[1].title, "Rayuela");
        assert_eq!(reports[1].state, LoanState::OnTime);
    }

    #[test]
    fn empty_table_yields_an_empty_report() {
        let now = at(2026, 1, 15, 12, 0);
        assert!(summarize(&[], now).is_empty());
    }
}
