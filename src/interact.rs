use std::time::Duration;

use fantoccini::elements::Element;
use fantoccini::Locator;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::browser::{BrowserOutcome, Session};
use crate::find::{self, Deadline, Target, PHASE_CAP};

const CLICK_ATTEMPTS: u32 = 4;
const BACKOFF_UNIT: Duration = Duration::from_millis(500);
const ATTEMPT_CAP: Duration = Duration::from_secs(6);
const CONSENT_SETTLE: Duration = Duration::from_secs(2);

/// Affirmative labels tried in order, Spanish first to match the portal's
/// locale, then the English fallbacks.
pub const CONSENT_LABELS: [&str; 9] = [
    "Aceptar todo",
    "Aceptar",
    "Acepto",
    "Entendido",
    "OK",
    "Accept all",
    "Accept",
    "Allow",
    "I agree",
];

/// Click an element we already hold: center it in the viewport, try a native
/// click, and fall back to a script click when something intercepts it.
/// No retry here; re-locating on failure is the caller's job.
pub async fn safe_click(session: &Session, element: &Element) -> Result<(), BrowserOutcome> {
    let handle = serde_json::to_value(element)?;
    session
        .execute("arguments[0].scrollIntoView({block: 'center'});", vec![handle.clone()])
        .await?;
    if let Err(err) = element.click().await {
        debug!("native click failed ({err}), falling back to a script click");
        session.execute("arguments[0].click();", vec![handle]).await?;
    }
    Ok(())
}

/// Locate the target fresh and click it, retrying with a linearly growing
/// backoff. The page re-renders nodes after some actions, so a reference
/// held across attempts would go stale; each attempt searches from scratch.
pub async fn click_target(
    session: &Session,
    target: &Target,
    budget: Duration,
    search_in_frames: bool,
) -> Result<(), BrowserOutcome> {
    let mut last = None;
    for attempt in 1..=CLICK_ATTEMPTS {
        let deadline = Deadline::after(budget.min(ATTEMPT_CAP));
        match locate_and_click(session, target, deadline, search_in_frames).await {
            Ok(()) => return Ok(()),
            Err(err) if err.retryable() => {
                debug!("click attempt {attempt} on {target} failed: {err}");
                last = Some(err);
                sleep(BACKOFF_UNIT * attempt).await;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| BrowserOutcome::NotFound(target.to_string())))
}

async fn locate_and_click(
    session: &Session,
    target: &Target,
    deadline: Deadline,
    search_in_frames: bool,
) -> Result<(), BrowserOutcome> {
    let element = if search_in_frames {
        find::find_anywhere(session, target, deadline).await?
    } else {
        session.enter_top().await?;
        find::wait_for(session, target, deadline.phase(PHASE_CAP)).await?
    };

    // Interactability probe only; a covered element still gets the script
    // fallback inside safe_click.
    let _ = element.is_displayed().await;
    let _ = element.is_enabled().await;

    safe_click(session, &element).await
}

/// Best-effort cookie banner dismissal. A missing or already-dismissed
/// banner is not an error.
pub async fn dismiss_consent(session: &Session) -> Result<bool, BrowserOutcome> {
    for label in CONSENT_LABELS {
        let xpath = consent_xpath(label);
        let matches = session.client.find_all(Locator::XPath(&xpath)).await?;
        let Some(element) = matches.into_iter().next() else {
            continue;
        };
        if safe_click(session, &element).await.is_ok() {
            info!("dismissed the consent banner via '{label}'");
            sleep(CONSENT_SETTLE).await;
            return Ok(true);
        }
    }
    Ok(false)
}

fn consent_xpath(label: &str) -> String {
    format!("//button[contains(., '{label}')]|//a[contains(., '{label}')]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_xpath_matches_buttons_and_links() {
        let xpath = consent_xpath("Aceptar");
        assert_eq!(
            xpath,
            "//button[contains(., 'Aceptar')]|//a[contains(., 'Aceptar')]"
        );
    }

    #[test]
    fn consent_labels_try_the_portal_locale_first() {
        assert_eq!(CONSENT_LABELS[0], "Aceptar todo");
        let first_english = CONSENT_LABELS
            .iter()
            .position(|label| *label == "Accept all")
            .unwrap();
        let last_spanish = CONSENT_LABELS
            .iter()
            .position(|label| *label == "Entendido")
            .unwrap();
        assert!(last_spanish < first_english);
    }
}
