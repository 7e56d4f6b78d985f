use std::sync::OnceLock;
use std::time::Duration;

use fantoccini::elements::Element;
use fantoccini::Locator;
use regex::Regex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserOutcome, Session};
use crate::find::{self, Deadline, Target};
use crate::interact;
use crate::login;

const LOANS_LINK_XPATH: &str =
    "//dt[normalize-space()='Préstamos']/following-sibling::dd[1]//a";

const LOANS_LINK_BUDGET: Duration = Duration::from_secs(25);
const NAVIGATION_BUDGET: Duration = Duration::from_secs(10);
const READY_BUDGET: Duration = Duration::from_secs(20);
const RENEW_CLICK_BUDGET: Duration = Duration::from_secs(20);
const DIALOG_BUDGET: Duration = Duration::from_secs(15);
const PAGE_SETTLE: Duration = Duration::from_secs(2);

/// Renew every outstanding loan. Nothing here is fatal to the run: each
/// failure is dumped and logged, then control returns to the caller so the
/// status report still gets a chance.
pub async fn renew_loans(session: &Session) {
    match renew_steps(session).await {
        Ok(()) => {}
        Err(err) => {
            let tag = match &err {
                BrowserOutcome::Timeout(_) => "renew-timeout",
                BrowserOutcome::NotFound(_) => "renew-noselem",
                _ => "renew-exception",
            };
            session.dump_debug(tag).await;
            match &err {
                BrowserOutcome::Timeout(_) | BrowserOutcome::NotFound(_) => {
                    warn!("could not complete loan renewal: {err}");
                    info!(
                        "this may mean no loans are renewable, the loans section is \
                         unavailable, or the page structure changed"
                    );
                }
                _ => error!("unexpected error during loan renewal: {err}"),
            }
        }
    }
}

async fn renew_steps(session: &Session) -> Result<(), BrowserOutcome> {
    info!("accessing the account page");
    session.enter_top().await?;
    login::click_account_menu(session).await;

    info!("checking for loans");
    let loans_link = find::find_anywhere(
        session,
        &Target::xpath(LOANS_LINK_XPATH),
        Deadline::after(LOANS_LINK_BUDGET),
    )
    .await?;

    let label = loans_link.text().await?;
    let loans = parse_loan_count(&label);
    if loans == 0 {
        info!("no active loans found");
        return Ok(());
    }
    info!("found {loans} loan(s), navigating to the loans page");

    let old_url = session.current_url().await?;
    interact::safe_click(session, &loans_link).await?;
    if !session
        .wait_for_staleness(&loans_link, Deadline::after(NAVIGATION_BUDGET))
        .await
    {
        debug!("loans link never went stale; the page may have updated in place");
    }
    session
        .wait_for_url_change(&old_url, Deadline::after(NAVIGATION_BUDGET))
        .await?;
    session.wait_page_ready(Deadline::after(READY_BUDGET)).await?;
    session.enter_top().await?;
    sleep(PAGE_SETTLE).await;

    info!("looking for the 'Renovar todos' control");
    let mut clicked = false;
    for target in renew_all_targets() {
        match interact::click_target(session, &target, RENEW_CLICK_BUDGET, true).await {
            Ok(()) => {
                clicked = true;
                break;
            }
            Err(err) if err.retryable() => debug!("candidate {target} failed: {err}"),
            Err(err) => return Err(err),
        }
    }
    if !clicked {
        info!("no 'Renovar todos' control found; items may not be renewable or the UI changed");
        return Ok(());
    }
    info!("clicked 'Renovar todos'");

    confirm_dialog(session).await
}

/// Candidate locators for the bulk-renewal control, in priority order.
fn renew_all_targets() -> Vec<Target> {
    vec![
        Target::link_text("Renovar todos"),
        Target::partial_link_text("Renovar"),
        Target::css("a.btn-renovar-todos"),
        Target::xpath("//a[contains(., 'Renovar todos') or contains(., 'Renovar todo')]"),
    ]
}

async fn confirm_dialog(session: &Session) -> Result<(), BrowserOutcome> {
    info!("waiting for the confirmation dialog");
    let popup = match find::wait_for(
        session,
        &Target::css(".swal2-popup.swal2-show"),
        DIALOG_BUDGET,
    )
    .await
    {
        Ok(popup) => popup,
        Err(err) if err.retryable() => {
            // Some flows confirm silently.
            info!("no confirmation dialog detected; continuing");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    info!("renewal result: {}", dialog_message(session, &popup).await);

    let confirm = session.client.find(Locator::Css("button.swal2-confirm")).await?;
    interact::safe_click(session, &confirm).await?;
    info!("confirmed the renewal dialog");
    Ok(())
}

/// The message element id varies across SweetAlert2 versions; fall back to
/// the dialog's full text when neither id is present.
async fn dialog_message(session: &Session, popup: &Element) -> String {
    for id in ["swal2-content", "swal2-html-container"] {
        if let Ok(element) = session.client.find(Locator::Id(id)).await {
            if let Ok(text) = element.text().await {
                return text;
            }
        }
    }
    popup.text().await.unwrap_or_default()
}

/// "0" means no loans; any digit run means that many; anything else that is
/// non-empty is read conservatively as "at least one loan" rather than
/// failing the flow over odd markup.
fn parse_loan_count(text: &str) -> u32 {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    let digits = DIGITS.get_or_init(|| Regex::new(r"\d+").expect("literal pattern"));

    let text = text.trim();
    match digits.find(text) {
        Some(run) => run.as_str().parse().unwrap_or(1),
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loan_count_zero_is_zero() {
        assert_eq!(parse_loan_count("0"), 0);
    }

    #[test]
    fn loan_count_takes_the_first_digit_run() {
        assert_eq!(parse_loan_count("2"), 2);
        assert_eq!(parse_loan_count("12 libros"), 12);
        assert_eq!(parse_loan_count("Préstamos (3)"), 3);
        assert_eq!(parse_loan_count("  7  "), 7);
    }

    #[test]
    fn loan_count_unparseable_text_means_at_least_one() {
        assert_eq!(parse_loan_count("—"), 1);
        assert_eq!(parse_loan_count("varios"), 1);
        assert_eq!(parse_loan_count(""), 1);
    }

    #[test]
    fn renew_candidates_prefer_the_exact_link_text() {
        let targets = renew_all_targets();
        assert_eq!(targets[0], Target::link_text("Renovar todos"));
        assert_eq!(targets[2], Target::css("a.btn-renovar-todos"));
        assert_eq!(targets.len(), 4);
    }
}
