//! HTML helpers: visible text, outbound links, social profile classification.

use scraper::{Html, Selector};
use sourcing_shared::FieldUpdate;
use url::Url;

/// Elements whose text never renders.
const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template", "head", "svg"];

/// Visible page text with whitespace collapsed to single spaces.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut words: Vec<&str> = Vec::new();

    for node in doc.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_TAGS.contains(&e.name()))
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }

    words.join(" ")
}

/// Absolute `http(s)` links on a page, fragment stripped.
pub fn links(html: &str, base_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").unwrap();
    let mut out = Vec::new();

    for el in doc.select(&link_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:")
        {
            continue;
        }
        if let Ok(mut resolved) = base_url.join(href) {
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            resolved.set_fragment(None);
            out.push(resolved.to_string());
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Social profiles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialKind {
    LinkedinCompany,
    LinkedinPerson,
    Facebook,
    Instagram,
    Twitter,
    Youtube,
}

/// Classify a URL as a social profile. Share widgets and unrelated pages
/// on the same hosts return `None`.
pub fn classify_social(link: &str) -> Option<SocialKind> {
    let url = Url::parse(link).ok()?;
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = url.path().to_lowercase();

    if path.contains("sharer") || path.contains("/share") || path.starts_with("/intent") {
        return None;
    }

    let on = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

    if on("linkedin.com") {
        if path.starts_with("/company/") {
            return Some(SocialKind::LinkedinCompany);
        }
        if path.starts_with("/in/") {
            return Some(SocialKind::LinkedinPerson);
        }
        return None;
    }
    if on("facebook.com") {
        return Some(SocialKind::Facebook);
    }
    if on("instagram.com") {
        return Some(SocialKind::Instagram);
    }
    if on("twitter.com") || on("x.com") {
        return Some(SocialKind::Twitter);
    }
    if on("youtube.com") || on("youtu.be") {
        return Some(SocialKind::Youtube);
    }
    None
}

/// First profile seen per social network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocialLinks {
    pub linkedin_company: Option<String>,
    pub linkedin_person: Option<String>,
    pub facebook: Option<String>,
    pub instagram: Option<String>,
    pub twitter: Option<String>,
    pub youtube: Option<String>,
}

impl SocialLinks {
    /// Record `link` if it is a profile for a network not seen yet.
    pub fn absorb(&mut self, link: &str) {
        let Some(kind) = classify_social(link) else {
            return;
        };
        let slot = match kind {
            SocialKind::LinkedinCompany => &mut self.linkedin_company,
            SocialKind::LinkedinPerson => &mut self.linkedin_person,
            SocialKind::Facebook => &mut self.facebook,
            SocialKind::Instagram => &mut self.instagram,
            SocialKind::Twitter => &mut self.twitter,
            SocialKind::Youtube => &mut self.youtube,
        };
        if slot.is_none() {
            *slot = Some(link.to_string());
        }
    }

    /// Number of networks found.
    pub fn count(&self) -> usize {
        [
            &self.linkedin_company,
            &self.linkedin_person,
            &self.facebook,
            &self.instagram,
            &self.twitter,
            &self.youtube,
        ]
        .iter()
        .filter(|s| s.is_some())
        .count()
    }

    pub fn into_updates(self) -> Vec<FieldUpdate> {
        let mut updates = Vec::new();
        if let Some(v) = self.linkedin_company {
            updates.push(FieldUpdate::LinkedinCompanyUrl(v));
        }
        if let Some(v) = self.linkedin_person {
            updates.push(FieldUpdate::OwnerLinkedinUrl(v));
        }
        if let Some(v) = self.facebook {
            updates.push(FieldUpdate::FacebookUrl(v));
        }
        if let Some(v) = self.instagram {
            updates.push(FieldUpdate::InstagramUrl(v));
        }
        if let Some(v) = self.twitter {
            updates.push(FieldUpdate::TwitterUrl(v));
        }
        if let Some(v) = self.youtube {
            updates.push(FieldUpdate::YoutubeUrl(v));
        }
        updates
    }
}
