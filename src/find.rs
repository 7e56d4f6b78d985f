use std::fmt;
use std::time::{Duration, Instant};

use async_recursion::async_recursion;
use fantoccini::elements::Element;
use fantoccini::Locator;

use crate::browser::{BrowserOutcome, Session};

/// Cap on any single bounded wait inside a larger search, so one missing
/// frame cannot consume the whole budget.
pub const PHASE_CAP: Duration = Duration::from_secs(5);

/// The portal nests login/account UI at most one frame deep.
pub const MAX_FRAME_DEPTH: usize = 2;

pub const FRAME_SELECTOR: &str = "iframe, frame";

/// An absolute point in time that a whole operation must finish by. Threading
/// this through nested waits keeps total elapsed time bounded instead of
/// letting per-call timeouts stack up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline(Instant::now() + budget)
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Budget for one sub-wait: whatever is left, capped at `cap`.
    pub fn phase(&self, cap: Duration) -> Duration {
        self.remaining().min(cap)
    }
}

/// Strategy + selector describing how to find one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(String),
    Css(String),
    LinkText(String),
    XPath(String),
}

impl Target {
    pub fn id(selector: &str) -> Self {
        Target::Id(selector.to_string())
    }

    pub fn css(selector: &str) -> Self {
        Target::Css(selector.to_string())
    }

    pub fn link_text(text: &str) -> Self {
        Target::LinkText(text.to_string())
    }

    pub fn xpath(expression: &str) -> Self {
        Target::XPath(expression.to_string())
    }

    /// The wire protocol has no partial-link-text strategy, so lower it to
    /// an XPath containment match over anchors.
    pub fn partial_link_text(text: &str) -> Self {
        Target::XPath(format!("//a[contains(., '{text}')]"))
    }

    pub fn as_locator(&self) -> Locator<'_> {
        match self {
            Target::Id(selector) => Locator::Id(selector),
            Target::Css(selector) => Locator::Css(selector),
            Target::LinkText(text) => Locator::LinkText(text),
            Target::XPath(expression) => Locator::XPath(expression),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(selector) => write!(f, "id={selector}"),
            Target::Css(selector) => write!(f, "css={selector}"),
            Target::LinkText(text) => write!(f, "link-text={text}"),
            Target::XPath(expression) => write!(f, "xpath={expression}"),
        }
    }
}

/// One bounded wait for the target in the currently focused document.
pub async fn wait_for(
    session: &Session,
    target: &Target,
    budget: Duration,
) -> Result<Element, BrowserOutcome> {
    session
        .client
        .wait()
        .at_most(budget)
        .for_element(target.as_locator())
        .await
        .map_err(BrowserOutcome::from)
}

/// Search the top document, then embedded frames up to `MAX_FRAME_DEPTH`
/// levels deep, for the target. On success the session stays focused on the
/// document where the match lives, so a follow-up action hits the right
/// scope without searching again.
pub async fn find_anywhere(
    session: &Session,
    target: &Target,
    deadline: Deadline,
) -> Result<Element, BrowserOutcome> {
    session.enter_top().await?;
    match wait_for(session, target, deadline.phase(PHASE_CAP)).await {
        Ok(element) => return Ok(element),
        Err(err) if err.retryable() => {}
        Err(err) => return Err(err),
    }

    let mut path = Vec::new();
    if let Some(element) = search_frames(session, target, deadline, &mut path, MAX_FRAME_DEPTH).await? {
        return Ok(element);
    }

    session.enter_top().await?;
    Err(BrowserOutcome::NotFound(format!(
        "{target} (searched the top document and frames {MAX_FRAME_DEPTH} levels deep)"
    )))
}

/// Probe every frame reachable from the current focus, depth-first. Frames
/// are addressed by index path from the top document because entering a
/// frame invalidates sibling references.
#[async_recursion]
async fn search_frames(
    session: &Session,
    target: &Target,
    deadline: Deadline,
    path: &mut Vec<usize>,
    depth_left: usize,
) -> Result<Option<Element>, BrowserOutcome> {
    if depth_left == 0 || deadline.expired() {
        return Ok(None);
    }

    let frame_count = session
        .client
        .find_all(Locator::Css(FRAME_SELECTOR))
        .await?
        .len();

    for index in 0..frame_count {
        if deadline.expired() {
            return Ok(None);
        }

        path.push(index);
        // A frame that refuses focus (cross-origin, mid-reload) is skipped.
        if focus_path(session, path).await.is_ok() {
            match wait_for(session, target, deadline.phase(PHASE_CAP)).await {
                Ok(element) => return Ok(Some(element)),
                Err(err) if err.retryable() => {
                    if let Some(element) =
                        search_frames(session, target, deadline, path, depth_left - 1).await?
                    {
                        return Ok(Some(element));
                    }
                }
                Err(err) => {
                    path.pop();
                    return Err(err);
                }
            }
        }
        path.pop();
    }

    Ok(None)
}

/// Re-enter the frame chain from the top document down to `path`.
async fn focus_path(session: &Session, path: &[usize]) -> Result<(), BrowserOutcome> {
    session.enter_top().await?;
    for &index in path {
        let frames = session.client.find_all(Locator::Css(FRAME_SELECTOR)).await?;
        let frame = frames.into_iter().nth(index).ok_or_else(|| {
            BrowserOutcome::NotFound(format!("frame #{index} disappeared mid-search"))
        })?;
        let _ = frame.enter_frame().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_phase_caps_at_ceiling() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert_eq!(deadline.phase(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn deadline_phase_never_exceeds_remaining() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let phase = deadline.phase(Duration::from_secs(120));
        assert!(phase <= Duration::from_secs(60));
        assert!(phase > Duration::from_secs(59));
    }

    #[test]
    fn deadline_expires_with_zero_budget() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert_eq!(deadline.phase(Duration::from_secs(5)), Duration::ZERO);
    }

    #[test]
    fn partial_link_text_lowers_to_xpath() {
        let target = Target::partial_link_text("Renovar");
        assert_eq!(target, Target::XPath("//a[contains(., 'Renovar')]".to_string()));
    }

    #[test]
    fn locator_mapping_preserves_strategy() {
        match Target::id("bor_id").as_locator() {
            Locator::Id(selector) => assert_eq!(selector, "bor_id"),
            other => panic!("expected an id locator, got {other:?}"),
        }
        match Target::link_text("Renovar todos").as_locator() {
            Locator::LinkText(text) => assert_eq!(text, "Renovar todos"),
            other => panic!("expected a link-text locator, got {other:?}"),
        }
    }

    #[test]
    fn display_names_the_strategy() {
        assert_eq!(Target::css("a.btn").to_string(), "css=a.btn");
        assert_eq!(Target::id("bor_id").to_string(), "id=bor_id");
    }
}
