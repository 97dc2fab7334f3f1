//! Horizon tags: coarse time buckets attached to captured items.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    Week,
    Month,
    Quarter,
    Year,
}

/// Scan order. Legacy markers come first and win over any canonical marker in the same text.
const MARKERS: [(&str, Horizon); 6] = [
    ("#3мес", Horizon::Quarter),
    ("#полгода", Horizon::Year),
    ("#неделя", Horizon::Week),
    ("#месяц", Horizon::Month),
    ("#квартал", Horizon::Quarter),
    ("#год", Horizon::Year),
];

impl Horizon {
    pub const ALL: [Horizon; 4] = [
        Horizon::Week,
        Horizon::Month,
        Horizon::Quarter,
        Horizon::Year,
    ];

    /// Canonical storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Horizon::Week => "week",
            Horizon::Month => "month",
            Horizon::Quarter => "quarter",
            Horizon::Year => "year",
        }
    }

    /// User-facing hashtag.
    pub fn marker(self) -> &'static str {
        match self {
            Horizon::Week => "#неделя",
            Horizon::Month => "#месяц",
            Horizon::Quarter => "#квартал",
            Horizon::Year => "#год",
        }
    }

    /// Accepts a canonical name or a canonical marker, nothing else.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|h| tag == h.as_str() || tag == h.marker())
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Find the horizon tag mentioned in free text, normalizing legacy aliases.
pub fn resolve(text: &str) -> Option<Horizon> {
    let lowered = text.to_lowercase();
    MARKERS
        .iter()
        .find(|(marker, _)| lowered.contains(marker))
        .map(|(_, horizon)| *horizon)
}

#[cfg(test)]
mod tests {
    use super::{Horizon, resolve};

    #[test]
    fn canonical_markers_resolve_to_their_tag() {
        assert_eq!(resolve("купить молоко #неделя"), Some(Horizon::Week));
        assert_eq!(resolve("#месяц отчёт"), Some(Horizon::Month));
        assert_eq!(resolve("план #квартал"), Some(Horizon::Quarter));
        assert_eq!(resolve("цели на #год"), Some(Horizon::Year));
    }

    #[test]
    fn legacy_markers_are_normalized() {
        assert_eq!(resolve("ремонт #3мес"), Some(Horizon::Quarter));
        assert_eq!(resolve("курс #полгода"), Some(Horizon::Year));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(resolve("СДЕЛАТЬ #НЕДЕЛЯ"), Some(Horizon::Week));
        assert_eq!(resolve("#3МЕС"), Some(Horizon::Quarter));
    }

    #[test]
    fn legacy_marker_wins_over_canonical_marker() {
        assert_eq!(resolve("#неделя и #3мес"), Some(Horizon::Quarter));
        assert_eq!(resolve("#неделя #полгода"), Some(Horizon::Year));
        assert_eq!(resolve("#полгода #3мес"), Some(Horizon::Quarter));
    }

    #[test]
    fn canonical_order_breaks_ties() {
        assert_eq!(resolve("#год потом #неделя"), Some(Horizon::Week));
        assert_eq!(resolve("#квартал #месяц"), Some(Horizon::Month));
    }

    #[test]
    fn text_without_markers_resolves_to_none() {
        assert_eq!(resolve("просто мысль"), None);
        assert_eq!(resolve(""), None);
        assert_eq!(resolve("неделя без решётки"), None);
    }

    #[test]
    fn from_tag_accepts_names_and_markers_only() {
        assert_eq!(Horizon::from_tag("week"), Some(Horizon::Week));
        assert_eq!(Horizon::from_tag(" #Квартал "), Some(Horizon::Quarter));
        assert_eq!(Horizon::from_tag("#3мес"), None);
        assert_eq!(Horizon::from_tag("someday"), None);
    }
}
