//! Title denylist heuristic
//!
//! Runs before any download. A single hit is enough to mark content unsafe.

/// Terms that flag a title on their own, matched as case-insensitive substrings
pub const DEFAULT_TERMS: &[&str] = &[
    // Violence / gore
    "gore",
    "gory",
    "blood",
    "bloody",
    "decapitated",
    "beheaded",
    "disemboweled",
    "torture",
    "tortured",
    "torturing",
    "execution",
    "brutal",
    "violent",
    "violence",
    "kill",
    "killing",
    "murder",
    "slaughter",
    "massacre",
    "suicide",
    "self harm",
    "self-harm",
    "hang myself",
    "kill myself",
    "end my life",
    // Horror / monsters
    "horror",
    "terrifying",
    "scary",
    "nightmare",
    "nightmare fuel",
    "creepypasta",
    "creepy",
    "disturbing",
    "cursed",
    "jumpscare",
    "jump scare",
    "killer clown",
    "serial killer",
    "zombie",
    "zombies",
    "demon",
    "demons",
    "possession",
    "exorcism",
    "haunted",
    "poltergeist",
    // Weapons
    "gun",
    "guns",
    "shooting",
    "school shooting",
    "mass shooting",
    "knife",
    "knives",
    "machete",
    "chainsaw",
    "beheading",
    // Adult content
    "nsfw",
    "18+",
    "not for kids",
    "not for children",
    "adults only",
    "sex",
    "sexual",
    "porn",
    "nude",
    "naked",
];

/// Appended when two or more distinct terms match
pub const SUMMARY_REASON: &str = "title strongly suggests horror/gore/violent or adult content";

/// Case-insensitive substring matcher over a fixed denylist
#[derive(Debug, Clone)]
pub struct TitleScanner {
    terms: Vec<String>,
}

impl Default for TitleScanner {
    fn default() -> Self {
        Self::with_terms(DEFAULT_TERMS.iter().copied())
    }
}

impl TitleScanner {
    /// Scanner over exactly `terms`; blanks and duplicates are dropped
    pub fn with_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for term in terms {
            let term = term.as_ref().trim().to_lowercase();
            if !term.is_empty() && !out.contains(&term) {
                out.push(term);
            }
        }
        Self { terms: out }
    }

    /// Default denylist plus `extra`
    pub fn extended<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra: Vec<String> = extra.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self::with_terms(
            DEFAULT_TERMS
                .iter()
                .map(|s| s.to_string())
                .chain(extra),
        )
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Reasons for `title`, in denylist order; empty when clean or absent
    pub fn scan(&self, title: Option<&str>) -> Vec<String> {
        let Some(title) = title else {
            return Vec::new();
        };
        let lower = title.to_lowercase();

        let mut reasons: Vec<String> = self
            .terms
            .iter()
            .filter(|term| lower.contains(term.as_str()))
            .map(|term| format!("title contains dangerous term: \"{}\"", term))
            .collect();

        if reasons.len() >= 2 {
            reasons.push(SUMMARY_REASON.to_string());
        }
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_terms_plus_summary() {
        let scanner = TitleScanner::with_terms(["scary", "horror", "creepy"]);
        let reasons = scanner.scan(Some("SCARY HORROR CREEPY compilation"));
        assert_eq!(
            reasons,
            vec![
                "title contains dangerous term: \"scary\"",
                "title contains dangerous term: \"horror\"",
                "title contains dangerous term: \"creepy\"",
                SUMMARY_REASON,
            ]
        );
    }

    #[test]
    fn test_default_list_on_same_title() {
        let reasons = TitleScanner::default().scan(Some("SCARY HORROR CREEPY compilation"));
        assert_eq!(reasons.len(), 4);
        assert_eq!(reasons.last().map(String::as_str), Some(SUMMARY_REASON));
    }

    #[test]
    fn test_single_term_has_no_summary() {
        let reasons = TitleScanner::default().scan(Some("Zombie tag at recess"));
        assert_eq!(reasons, vec!["title contains dangerous term: \"zombie\""]);
    }

    #[test]
    fn test_clean_or_missing_title() {
        let scanner = TitleScanner::default();
        assert!(scanner.scan(Some("Counting songs for toddlers")).is_empty());
        assert!(scanner.scan(Some("")).is_empty());
        assert!(scanner.scan(None).is_empty());
    }

    #[test]
    fn test_extended_terms_dedup() {
        let scanner = TitleScanner::extended(["Clown", "gore", "  "]);
        assert_eq!(scanner.terms().len(), DEFAULT_TERMS.len() + 1);
        assert_eq!(scanner.scan(Some("clown school")).len(), 1);
    }
}
