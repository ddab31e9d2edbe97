use crate::pattern::Pattern;

/// The compiled, ordered collection of patterns effective for one root.
///
/// Immutable once built; a refresh replaces the whole set atomically via the
/// owning root entry, so queries never observe a half-applied set.
#[derive(Debug, Default)]
pub struct RuleSet {
    patterns: Vec<Pattern>,
}

/// Outcome of a single path query.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub ignored: bool,
    /// The pattern that decided the verdict, when any pattern matched.
    pub matched: Option<Pattern>,
}

impl Verdict {
    pub fn not_ignored() -> Self {
        Self {
            ignored: false,
            matched: None,
        }
    }
}

impl RuleSet {
    pub fn new(mut patterns: Vec<Pattern>) -> Self {
        patterns.sort_by_key(|pattern| pattern.source_order);
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Answers whether `relative_path` is ignored, reproducing ignore-file
    /// precedence: the last matching pattern in source order wins, and an
    /// ignored ancestor directory cannot be overridden by a negated pattern
    /// on one of its descendants.
    pub fn matches(&self, relative_path: &str, is_dir: bool) -> Verdict {
        let components: Vec<&str> = relative_path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Verdict::not_ignored();
        }

        // Prefixes are evaluated shortest-first: once a directory on the way
        // down is ignored, everything beneath it is ignored too.
        for end in 1..=components.len() {
            let is_dir_here = end < components.len() || is_dir;
            let mut last: Option<&Pattern> = None;
            for pattern in &self.patterns {
                if pattern.dir_only && !is_dir_here {
                    continue;
                }
                if pattern.matches(&components[..end]) {
                    last = Some(pattern);
                }
            }
            match last {
                Some(pattern) if !pattern.negated => {
                    return Verdict {
                        ignored: true,
                        matched: Some(pattern.clone()),
                    };
                }
                Some(pattern) if end == components.len() => {
                    return Verdict {
                        ignored: false,
                        matched: Some(pattern.clone()),
                    };
                }
                // A negated match on an ancestor re-includes that directory;
                // keep descending.
                _ => {}
            }
        }
        Verdict::not_ignored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::compile;

    fn ruleset(lines: &str) -> RuleSet {
        let (patterns, _) = compile(lines, 0);
        RuleSet::new(patterns)
    }

    #[test]
    fn empty_set_ignores_nothing() {
        let rules = ruleset("");
        assert!(rules.is_empty());
        assert!(!rules.matches("src/main.rs", false).ignored);
    }

    #[test]
    fn anchored_pattern_only_matches_at_root() {
        let rules = ruleset("/foo.txt\n");
        assert!(rules.matches("foo.txt", false).ignored);
        assert!(!rules.matches("sub/foo.txt", false).ignored);
    }

    #[test]
    fn unanchored_pattern_matches_anywhere() {
        let rules = ruleset("foo.txt\n");
        assert!(rules.matches("foo.txt", false).ignored);
        assert!(rules.matches("sub/foo.txt", false).ignored);
    }

    #[test]
    fn last_match_wins() {
        let rules = ruleset("*.log\n!important.log\n");
        assert!(rules.matches("debug.log", false).ignored);
        assert!(!rules.matches("important.log", false).ignored);

        let reversed = ruleset("!important.log\n*.log\n");
        assert!(reversed.matches("important.log", false).ignored);
    }

    #[test]
    fn negation_cannot_resurrect_under_ignored_directory() {
        let rules = ruleset("build/\n!build/keep.txt\n");
        let verdict = rules.matches("build/keep.txt", false);
        assert!(verdict.ignored);
        assert_eq!(verdict.matched.map(|p| p.raw), Some("build/".to_string()));
    }

    #[test]
    fn directory_only_pattern_skips_files() {
        let rules = ruleset("cache/\n");
        assert!(rules.matches("cache", true).ignored);
        assert!(!rules.matches("cache", false).ignored);
        // contents of a matched directory are ignored transitively
        assert!(rules.matches("cache/entry.bin", false).ignored);
    }

    #[test]
    fn non_directory_pattern_still_excludes_directory_contents() {
        let rules = ruleset("build\n");
        assert!(rules.matches("build", false).ignored);
        assert!(rules.matches("build/out.o", false).ignored);
    }

    #[test]
    fn double_star_spans_directories() {
        let rules = ruleset("a/**/b\n");
        assert!(rules.matches("a/b", true).ignored);
        assert!(rules.matches("a/x/b", true).ignored);
        assert!(rules.matches("a/x/y/b", true).ignored);
        assert!(!rules.matches("a/x", true).ignored);
    }

    #[test]
    fn trailing_double_star_spares_the_directory_itself() {
        let rules = ruleset("vendor/**\n");
        assert!(!rules.matches("vendor", true).ignored);
        assert!(rules.matches("vendor/lib.rs", false).ignored);
        assert!(rules.matches("vendor/deep/lib.rs", false).ignored);
    }

    #[test]
    fn negated_ancestor_reincludes_descendants() {
        let rules = ruleset("build\n!build\n");
        assert!(!rules.matches("build/out.o", false).ignored);
    }

    #[test]
    fn verdict_reports_the_deciding_pattern() {
        let rules = ruleset("*.tmp\n!keep.tmp\n");
        let ignored = rules.matches("junk.tmp", false);
        assert_eq!(ignored.matched.map(|p| p.raw), Some("*.tmp".to_string()));
        let kept = rules.matches("keep.tmp", false);
        assert!(!kept.ignored);
        assert_eq!(kept.matched.map(|p| p.raw), Some("!keep.tmp".to_string()));
    }

    #[test]
    fn concrete_scenario_from_decoration_queries() {
        let rules = ruleset("node_modules/\n*.tmp\n!keep.tmp\n");
        assert!(rules.matches("node_modules/x.js", false).ignored);
        assert!(rules.matches("a.tmp", false).ignored);
        assert!(!rules.matches("keep.tmp", false).ignored);
        assert!(!rules.matches("src/app.ts", false).ignored);
    }

    #[test]
    fn repeated_separators_are_tolerated() {
        let rules = ruleset("*.tmp\n");
        assert!(rules.matches("a//b.tmp", false).ignored);
    }

    #[test]
    fn root_itself_is_never_ignored() {
        let rules = ruleset("*\n");
        assert!(!rules.matches("", true).ignored);
    }
}
