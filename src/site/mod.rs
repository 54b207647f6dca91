//! Site profiles and the catalog used to resolve them per request.

pub mod field_path;
pub mod profile;

pub use field_path::{FieldPath, Segment};
pub use profile::{
    ContentFilter, InputTarget, NewConversationRule, ResponseRules, Sentinel, SiteProfile,
    Transport, UiParsing, UiPriority,
};

use std::sync::Arc;

/// Ordered, immutable set of site profiles loaded once per session.
#[derive(Debug, Clone, Default)]
pub struct SiteCatalog {
    profiles: Vec<Arc<SiteProfile>>,
}

impl SiteCatalog {
    pub fn new(profiles: Vec<SiteProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(Arc::new).collect(),
        }
    }

    /// First profile whose endpoints match `url`.
    pub fn match_url(&self, url: &str) -> Option<Arc<SiteProfile>> {
        self.profiles
            .iter()
            .find(|profile| profile.matches_url(url))
            .cloned()
    }

    pub fn by_hostname(&self, hostname: &str) -> Option<Arc<SiteProfile>> {
        self.profiles
            .iter()
            .find(|profile| profile.hostname.eq_ignore_ascii_case(hostname))
            .cloned()
    }

    pub fn by_id(&self, id: &str) -> Option<Arc<SiteProfile>> {
        self.profiles.iter().find(|profile| profile.id == id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SiteProfile>> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
