//! Convention rules. All of these surface as warnings or notes; none of
//! them block an action.

use crate::action::{Action, EvalContext, Rule, RuleCategory, Severity, Verdict};

const MAX_FILE_LINES: usize = 500;

const CODE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "css", "html", "vue", "svelte"];

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "rs", "py", "go"];

fn extension(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(_, ext)| ext)
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split_once('.').map(|(stem, _)| stem).unwrap_or(name)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Naming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Warns when a new web-code file is not kebab-case.
pub struct KebabCaseRule;

impl Rule for KebabCaseRule {
    fn id(&self) -> &str {
        "convention.kebab-case"
    }
    fn name(&self) -> &str {
        "Kebab-case file names"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Convention
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        let Action::FileWrite { file_path, .. } = action else {
            return Verdict::allow(self.id());
        };
        let Some(ext) = extension(file_path) else {
            return Verdict::allow(self.id());
        };
        if !CODE_EXTENSIONS.contains(&ext) {
            return Verdict::allow(self.id());
        }
        let stem = file_stem(file_path);
        let kebab = !stem.is_empty()
            && stem
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if kebab {
            Verdict::allow(self.id())
        } else {
            Verdict::warn(
                self.id(),
                format!("file name '{stem}' is not kebab-case"),
            )
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File size
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Warns on files written with more than 500 lines.
pub struct FileSizeRule;

impl Rule for FileSizeRule {
    fn id(&self) -> &str {
        "convention.file-size"
    }
    fn name(&self) -> &str {
        "File size"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Convention
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        let Action::FileWrite { content, file_path } = action else {
            return Verdict::allow(self.id());
        };
        let lines = content.lines().count();
        if lines > MAX_FILE_LINES {
            Verdict::warn(
                self.id(),
                format!("'{file_path}' has {lines} lines (guideline {MAX_FILE_LINES})"),
            )
            .with_suggestion("consider splitting the file by responsibility")
        } else {
            Verdict::allow(self.id())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Test presence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Notes when source files pile up in a session with no test touched.
pub struct TestPresenceRule;

impl TestPresenceRule {
    fn looks_like_test(path: &str) -> bool {
        path.contains(".test.")
            || path.contains(".spec.")
            || path.contains("/tests/")
            || path.contains("/test/")
            || path.ends_with("_test.rs")
            || path.ends_with("_test.go")
    }
}

impl Rule for TestPresenceRule {
    fn id(&self) -> &str {
        "convention.test-presence"
    }
    fn name(&self) -> &str {
        "Tests accompany source changes"
    }
    fn severity(&self) -> Severity {
        Severity::Info
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Convention
    }

    fn evaluate(&self, action: &Action, ctx: &EvalContext) -> Verdict {
        let Action::FileWrite { file_path, .. } = action else {
            return Verdict::allow(self.id());
        };
        let is_source = extension(file_path)
            .map(|e| SOURCE_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if !is_source || Self::looks_like_test(file_path) {
            return Verdict::allow(self.id());
        }
        let source_changes = ctx
            .files_modified
            .iter()
            .filter(|f| {
                extension(f)
                    .map(|e| SOURCE_EXTENSIONS.contains(&e))
                    .unwrap_or(false)
            })
            .count();
        let any_tests = ctx.files_modified.iter().any(|f| Self::looks_like_test(f));
        if source_changes >= 3 && !any_tests {
            Verdict::warn(
                self.id(),
                format!("{source_changes} source files changed with no test touched"),
            )
        } else {
            Verdict::allow(self.id())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logging hygiene
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Warns on debug-print statements left in written code.
pub struct LoggingHygieneRule;

const DEBUG_MARKERS: &[&str] = &["console.log(", "console.debug(", "dbg!(", "println!(\"DEBUG"];

impl Rule for LoggingHygieneRule {
    fn id(&self) -> &str {
        "convention.logging-hygiene"
    }
    fn name(&self) -> &str {
        "No debug prints"
    }
    fn severity(&self) -> Severity {
        Severity::Warning
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Convention
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        let Action::FileWrite { content, file_path } = action else {
            return Verdict::allow(self.id());
        };
        let is_source = extension(file_path)
            .map(|e| SOURCE_EXTENSIONS.contains(&e))
            .unwrap_or(false);
        if !is_source {
            return Verdict::allow(self.id());
        }
        match DEBUG_MARKERS.iter().find(|m| content.contains(**m)) {
            Some(marker) => Verdict::warn(
                self.id(),
                format!("debug statement '{}' left in '{file_path}'", marker.trim_end_matches('(')),
            ),
            None => Verdict::allow(self.id()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Import ordering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Notes when relative imports precede external imports in JS/TS files.
pub struct ImportOrderRule;

impl Rule for ImportOrderRule {
    fn id(&self) -> &str {
        "convention.import-order"
    }
    fn name(&self) -> &str {
        "External imports before relative"
    }
    fn severity(&self) -> Severity {
        Severity::Info
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Convention
    }

    fn evaluate(&self, action: &Action, _ctx: &EvalContext) -> Verdict {
        let Action::FileWrite { content, file_path } = action else {
            return Verdict::allow(self.id());
        };
        let is_js = extension(file_path)
            .map(|e| matches!(e, "ts" | "tsx" | "js" | "jsx"))
            .unwrap_or(false);
        if !is_js {
            return Verdict::allow(self.id());
        }

        let mut seen_relative = false;
        for line in content.lines() {
            let line = line.trim_start();
            if !line.starts_with("import ") {
                continue;
            }
            let relative = line.contains("'./") || line.contains("\"./")
                || line.contains("'../") || line.contains("\"../");
            if relative {
                seen_relative = true;
            } else if seen_relative {
                return Verdict::warn(
                    self.id(),
                    format!("external import after relative imports in '{file_path}'"),
                );
            }
        }
        Verdict::allow(self.id())
    }
}
