// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use glob::Pattern;
use regex::Regex;

use crate::tail::error::{Error, Result};

/// A single rule for skipping discovered paths.
#[derive(Debug, Clone)]
pub enum ExcludeRule {
    /// Matches the whole path, the same way include patterns do
    Glob(Pattern),
    /// Matches if found anywhere in the path
    Regex(Regex),
}

impl ExcludeRule {
    pub fn glob(pattern: &str) -> Result<Self> {
        Pattern::new(pattern)
            .map(ExcludeRule::Glob)
            .map_err(|e| Error::InvalidExclude(format!("{}: {}", pattern, e)))
    }

    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(ExcludeRule::Regex)
            .map_err(|e| Error::InvalidExclude(format!("{}: {}", pattern, e)))
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self {
            ExcludeRule::Glob(p) => p.matches_path(path),
            ExcludeRule::Regex(r) => r.is_match(&path.to_string_lossy()),
        }
    }
}

impl std::fmt::Display for ExcludeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExcludeRule::Glob(p) => write!(f, "glob {}", p.as_str()),
            ExcludeRule::Regex(r) => write!(f, "regex {}", r.as_str()),
        }
    }
}

/// Ordered exclude rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct ExcludeRuleSet {
    rules: Vec<ExcludeRule>,
}

impl ExcludeRuleSet {
    pub fn new(rules: Vec<ExcludeRule>) -> Self {
        Self { rules }
    }

    /// Build from glob patterns followed by regular expressions.
    pub fn build<G, R>(globs: G, regexes: R) -> Result<Self>
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let mut rules = Vec::new();
        for g in globs {
            rules.push(ExcludeRule::glob(g.as_ref())?);
        }
        for r in regexes {
            rules.push(ExcludeRule::regex(r.as_ref())?);
        }
        Ok(Self { rules })
    }

    pub fn push(&mut self, rule: ExcludeRule) {
        self.rules.push(rule);
    }

    /// The first rule that excludes `path`, if any.
    pub fn matches(&self, path: &Path) -> Option<&ExcludeRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}
