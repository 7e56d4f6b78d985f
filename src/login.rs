use std::time::Duration;

use fantoccini::key::Key;
use fantoccini::Locator;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::browser::{BrowserOutcome, Session};
use crate::config::Config;
use crate::find::{self, Deadline, Target, FRAME_SELECTOR};
use crate::interact;

pub const PORTAL_URL: &str = "https://hercules.itam.mx/";

const READY_BUDGET: Duration = Duration::from_secs(30);
const MENU_BUDGET: Duration = Duration::from_secs(30);
const MENU_CANDIDATE_CAP: Duration = Duration::from_secs(6);
const CREDENTIAL_BUDGET: Duration = Duration::from_secs(25);
const REDIRECT_SETTLE: Duration = Duration::from_secs(1);

/// Log into the library account. Any failure here is fatal to the run:
/// a debug dump is written, the error logged and re-raised.
pub async fn login(session: &Session, config: &Config) -> Result<(), BrowserOutcome> {
    match login_steps(session, config).await {
        Ok(()) => {
            info!("login successful");
            Ok(())
        }
        Err(err) => {
            let tag = match &err {
                BrowserOutcome::Timeout(_) | BrowserOutcome::NotFound(_) => "login-timeout",
                _ => "login-exception",
            };
            session.dump_debug(tag).await;
            error!("login failed: {err}");
            Err(err)
        }
    }
}

async fn login_steps(session: &Session, config: &Config) -> Result<(), BrowserOutcome> {
    info!("navigating to the library portal");
    session.goto(PORTAL_URL).await?;
    session.wait_page_ready(Deadline::after(READY_BUDGET)).await?;

    match interact::dismiss_consent(session).await {
        Ok(true) => {}
        Ok(false) => debug!("no consent banner to dismiss"),
        Err(err) => debug!("consent sweep failed, continuing: {err}"),
    }

    info!("looking for the 'Mi cuenta' control");
    if !click_account_menu(session).await {
        return Err(BrowserOutcome::Timeout(
            "'Mi cuenta' control (maybe behind a modal or inside an iframe)".to_string(),
        ));
    }

    info!("entering credentials");
    let user_field = find::find_anywhere(
        session,
        &Target::id("bor_id"),
        Deadline::after(CREDENTIAL_BUDGET),
    )
    .await?;
    user_field.clear().await?;
    user_field.send_keys(&config.username).await?;

    let pass_field = find::find_anywhere(
        session,
        &Target::id("bor_verification"),
        Deadline::after(CREDENTIAL_BUDGET),
    )
    .await?;
    pass_field.clear().await?;
    pass_field.send_keys(&config.password).await?;

    info!("submitting login form");
    let enter = String::from(char::from(Key::Enter));
    if let Err(err) = pass_field.send_keys(&enter).await {
        debug!("enter key had no effect ({err}), invoking the form submit directly");
        let handle = serde_json::to_value(&pass_field)?;
        session
            .execute("arguments[0].form && arguments[0].form.submit();", vec![handle])
            .await?;
    }

    session.enter_top().await?;
    session.wait_page_ready(Deadline::after(READY_BUDGET)).await?;
    // Let any client-side redirect land before poking at the account page.
    sleep(REDIRECT_SETTLE).await;

    // Some deployments only show the account page after a second click;
    // its absence means login already completed.
    click_account_menu(session).await;

    Ok(())
}

/// Locator variants for the account-menu control, in priority order.
fn account_menu_targets() -> Vec<Target> {
    vec![
        Target::xpath("//a[contains(normalize-space(.), 'Mi cuenta')]"),
        Target::xpath(
            "//a[contains(translate(normalize-space(.), 'CUENTA', 'cuenta'), 'mi cuenta')]",
        ),
        Target::xpath("//a[@href and (contains(., 'Mi cuenta') or contains(., 'Cuenta'))]"),
        Target::xpath("//button[contains(normalize-space(.), 'Mi cuenta')]"),
    ]
}

/// Find and click 'Mi cuenta' whether it sits in the top document or inside
/// a frame. Best-effort: every miss is swallowed and reported as `false`.
pub async fn click_account_menu(session: &Session) -> bool {
    let deadline = Deadline::after(MENU_BUDGET);
    if session.enter_top().await.is_err() {
        return false;
    }

    for target in account_menu_targets() {
        match find::wait_for(session, &target, deadline.phase(MENU_CANDIDATE_CAP)).await {
            Ok(element) => {
                if interact::safe_click(session, &element).await.is_ok() {
                    return true;
                }
            }
            Err(err) => debug!("candidate {target} not present in the top document: {err}"),
        }
    }

    // Sweep direct frames without further waiting; the control is either
    // rendered by now or not there at all.
    let Ok(frames) = session.client.find_all(Locator::Css(FRAME_SELECTOR)).await else {
        return false;
    };
    for index in 0..frames.len() {
        if session.enter_top().await.is_err() {
            return false;
        }
        let Ok(current) = session.client.find_all(Locator::Css(FRAME_SELECTOR)).await else {
            continue;
        };
        let Some(frame) = current.into_iter().nth(index) else {
            continue;
        };
        if frame.enter_frame().await.is_err() {
            continue;
        }
        for target in account_menu_targets() {
            let Ok(matches) = session.client.find_all(target.as_locator()).await else {
                continue;
            };
            if let Some(element) = matches.into_iter().next() {
                if interact::safe_click(session, &element).await.is_ok() {
                    return true;
                }
            }
        }
    }

    let _ = session.enter_top().await;
    false
}
