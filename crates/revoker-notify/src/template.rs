//! Renders the key-compromise notification body.
//!
//! The serial list is capped at `max_listed`: beyond that the template
//! shows a count of the remainder instead of every serial, so an account
//! with thousands of affected certificates doesn't produce an unreadable
//! email.

use revoker_core::Serial;
use serde::Serialize;
use tera::{Context, Tera};

use crate::error::NotifyError;

const KEY_COMPROMISE_TEMPLATE: &str = "key_compromise";
const KEY_COMPROMISE_SOURCE: &str = include_str!("../templates/key_compromise.txt.tera");

pub const DEFAULT_MAX_SERIALS_LISTED: usize = 100;

#[derive(Serialize)]
struct KeyCompromiseContext<'a> {
    serials: Vec<&'a str>,
    more_count: usize,
    comment: &'a str,
}

/// Loads the bundled templates into a fresh `Tera` instance.
///
/// # Errors
/// Returns [`NotifyError::Template`] if a bundled template fails to parse
/// — this would be a packaging defect, not a runtime condition.
pub fn build_tera() -> Result<Tera, NotifyError> {
    let mut tera = Tera::default();
    tera.add_raw_template(KEY_COMPROMISE_TEMPLATE, KEY_COMPROMISE_SOURCE)?;
    Ok(tera)
}

/// Renders the key-compromise notice body for `serials`, truncated to
/// `max_listed` entries.
///
/// # Errors
/// Returns [`NotifyError::Template`] on a render failure.
pub fn render_key_compromise(
    tera: &Tera,
    serials: &[Serial],
    comment: &str,
    max_listed: usize,
) -> Result<String, NotifyError> {
    let shown: Vec<&str> = serials.iter().take(max_listed).map(Serial::as_str).collect();
    let more_count = serials.len().saturating_sub(shown.len());
    let ctx = Context::from_serialize(KeyCompromiseContext { serials: shown, more_count, comment })?;
    Ok(tera.render(KEY_COMPROMISE_TEMPLATE, &ctx)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serial(n: u8) -> Serial {
        Serial::parse(format!("{n:036x}")).unwrap()
    }

    #[test]
    fn lists_all_serials_under_the_cap() {
        let tera = build_tera().unwrap();
        let serials = vec![serial(1), serial(2)];
        let body = render_key_compromise(&tera, &serials, "", DEFAULT_MAX_SERIALS_LISTED).unwrap();
        assert!(body.contains(serials[0].as_str()));
        assert!(body.contains(serials[1].as_str()));
        assert!(!body.contains("more certificate"));
    }

    #[test]
    fn truncates_beyond_the_cap() {
        let tera = build_tera().unwrap();
        let serials: Vec<Serial> = (0..5).map(serial).collect();
        let body = render_key_compromise(&tera, &serials, "", 3).unwrap();
        assert!(body.contains(serials[2].as_str()));
        assert!(!body.contains(serials[3].as_str()));
        assert!(body.contains("...and 2 more certificates."));
    }

    #[test]
    fn includes_comment_when_present() {
        let tera = build_tera().unwrap();
        let body = render_key_compromise(&tera, &[serial(1)], "incident-1234", 10).unwrap();
        assert!(body.contains("incident-1234"));
    }
}
