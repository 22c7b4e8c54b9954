// ── Validation report ──
//
// Produced once per batch by the target validator and read-only afterward.
// Severity is not decided here: callers render the report as blocking
// errors or advisory warnings.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::target::{Category, Target};
use crate::diagnostics::Diagnostics;

/// A target that exists but cannot take the requested action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsupportedTarget {
    pub id: String,
    pub reason: String,
}

/// Findings for one category.
///
/// Each checked id lands in exactly one of `clean`, `nonexistent`, or
/// `unsupported`. `duplicates` and `cross_listed` are warnings that overlap
/// with those three.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub clean: Vec<String>,
    pub nonexistent: Vec<String>,
    pub unsupported: Vec<UnsupportedTarget>,
    pub duplicates: Vec<String>,
    pub cross_listed: Vec<String>,
}

impl CategoryReport {
    pub fn has_problems(&self) -> bool {
        !self.nonexistent.is_empty() || !self.unsupported.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.duplicates.is_empty() || !self.cross_listed.is_empty()
    }

    fn is_blocked(&self, id: &str) -> bool {
        self.nonexistent.iter().any(|n| n == id) || self.unsupported.iter().any(|u| u.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationReport {
    categories: BTreeMap<Category, CategoryReport>,
}

impl ValidationReport {
    pub(crate) fn from_categories(categories: BTreeMap<Category, CategoryReport>) -> Self {
        Self { categories }
    }

    pub fn category(&self, category: &Category) -> Option<&CategoryReport> {
        self.categories.get(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = (&Category, &CategoryReport)> {
        self.categories.iter()
    }

    /// Any target missing or unsupported.
    pub fn has_problems(&self) -> bool {
        self.categories.values().any(CategoryReport::has_problems)
    }

    /// Any duplicate or cross-listed id.
    pub fn has_warnings(&self) -> bool {
        self.categories.values().any(CategoryReport::has_warnings)
    }

    /// `true` when the target was found missing or unsupported.
    pub fn is_blocked(&self, target: &Target) -> bool {
        self.categories
            .get(&target.category)
            .is_some_and(|r| r.is_blocked(&target.id))
    }

    /// Keep only targets that passed validation.
    pub fn retain_executable(&self, targets: Vec<Target>) -> Vec<Target> {
        targets.into_iter().filter(|t| !self.is_blocked(t)).collect()
    }

    /// Render the report. Missing and unsupported targets become errors
    /// when `problems_are_errors`, warnings otherwise; duplicates and
    /// cross-listed ids are always warnings.
    pub fn diagnostics(&self, problems_are_errors: bool) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let mut problem = |summary: String, detail: String| {
            if problems_are_errors {
                diags.add_error(summary, detail);
            } else {
                diags.add_warning(summary, detail);
            }
        };

        for (category, report) in &self.categories {
            if !report.nonexistent.is_empty() {
                problem(
                    format!("{} {category} target(s) not found", report.nonexistent.len()),
                    report.nonexistent.join(", "),
                );
            }
            for unsupported in &report.unsupported {
                problem(
                    format!("{category}:{} cannot take this action", unsupported.id),
                    unsupported.reason.clone(),
                );
            }
        }

        for (category, report) in &self.categories {
            if !report.duplicates.is_empty() {
                diags.add_warning(
                    format!("duplicate {category} target(s)"),
                    format!(
                        "{} listed more than once; each runs once",
                        report.duplicates.join(", ")
                    ),
                );
            }
        }

        let cross_listed: BTreeSet<&str> = self
            .categories
            .values()
            .flat_map(|r| r.cross_listed.iter().map(String::as_str))
            .collect();
        if !cross_listed.is_empty() {
            diags.add_warning(
                "target(s) listed under more than one category",
                cross_listed.into_iter().collect::<Vec<_>>().join(", "),
            );
        }

        diags
    }
}
