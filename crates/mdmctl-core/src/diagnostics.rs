// ── Operator-facing diagnostics ──
//
// A flat list of warnings and errors accumulated while preparing or running
// an operation. Callers decide how to render them; an error-severity entry
// means "do not proceed".

use serde::Serialize;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, summary: impl Into<String>, detail: impl Into<String>) {
        self.0.push(Diagnostic {
            severity,
            summary: summary.into(),
            detail: detail.into(),
        });
    }

    pub fn add_error(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Error, summary, detail);
    }

    pub fn add_warning(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Warning, summary, detail);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn has_error(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut diags = Diagnostics::new();
        diags.add_warning("duplicate target", "dev-1 listed twice");
        assert!(!diags.has_error());
        assert_eq!(diags.warnings().count(), 1);

        diags.add_error("target not found", "dev-2");
        assert!(diags.has_error());
        assert_eq!(diags.errors().count(), 1);
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn extend_appends_in_order() {
        let mut a = Diagnostics::new();
        a.add_warning("first", "");
        let mut b = Diagnostics::new();
        b.add_error("second", "");
        a.extend(b);
        let summaries: Vec<_> = a.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, ["first", "second"]);
    }
}
