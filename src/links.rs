//! Download-link interception decisions.
//!
//! A click is handled when interception is enabled, it was made with the left
//! button, and the nearest anchor at or above the clicked element points to a
//! download-only URL scheme.

use crate::notify::Unsubscribe;
use crate::settings::SettingsStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Schemes no browser can open itself.
pub const DOWNLOAD_ONLY_SCHEMES: [&str; 5] = ["magnet", "thunder", "flashget", "qqdl", "ed2k"];

/// Mouse button number of the primary button.
pub const LEFT_MOUSE_BUTTON: i16 = 0;

/// How many parents above the clicked element are inspected.
pub const MAX_ANCESTOR_DEPTH: usize = 10;

/// `true` if `url` uses a download-only scheme, compared case-insensitively.
///
/// Only the scheme is inspected: ed2k links carry `|` where a host would be,
/// which a full URL parser rejects.
#[must_use]
pub fn is_download_only_url(url: &str) -> bool {
    let Some((scheme, _)) = url.trim().split_once(':') else {
        return false;
    };
    let well_formed = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    well_formed
        && DOWNLOAD_ONLY_SCHEMES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(scheme))
}

/// Minimal view of a document element.
pub trait ElementNode: Sized {
    /// The link target when this element is an anchor.
    fn anchor_href(&self) -> Option<String>;

    fn parent_element(&self) -> Option<Self>;
}

/// Nearest anchor at or above `start`, looking at most
/// [`MAX_ANCESTOR_DEPTH`] parents up.
pub fn find_anchor_ancestor<N: ElementNode>(start: Option<N>) -> Option<N> {
    let mut node = start;
    let mut remaining = MAX_ANCESTOR_DEPTH;
    while let Some(current) = node {
        if current.anchor_href().is_some() {
            return Some(current);
        }
        if remaining == 0 {
            return None;
        }
        remaining -= 1;
        node = current.parent_element();
    }
    None
}

/// Decides which clicks become new download tasks. Follows the
/// `should_handle_download_links` setting for as long as it lives.
pub struct LinkInterceptor {
    enabled: Arc<AtomicBool>,
    subscription: Unsubscribe,
}

impl LinkInterceptor {
    /// Must be called from within a tokio runtime.
    pub fn new(settings: &SettingsStore) -> Self {
        let enabled = Arc::new(AtomicBool::new(
            settings.current().should_handle_download_links,
        ));
        let flag = Arc::clone(&enabled);
        let subscription = settings.subscribe_with(move |config| {
            flag.store(config.should_handle_download_links, Ordering::SeqCst);
        });
        Self {
            enabled,
            subscription,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether a link to `url` should be turned into a task.
    #[must_use]
    pub fn should_handle(&self, url: &str) -> bool {
        self.is_enabled() && is_download_only_url(url)
    }

    /// URL to hand to task creation for this click, if it should be
    /// intercepted. The caller then suppresses the default navigation.
    pub fn intercept<N: ElementNode>(&self, button: i16, target: Option<N>) -> Option<String> {
        if !self.is_enabled() || button != LEFT_MOUSE_BUTTON {
            return None;
        }
        let href = find_anchor_ancestor(target)?.anchor_href()?;
        if !is_download_only_url(&href) {
            return None;
        }
        debug!("intercepting download link");
        Some(href)
    }
}

impl Drop for LinkInterceptor {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
