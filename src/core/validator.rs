//! Static Validator: a pattern scan over a candidate skill's source that blocks
//! promotion before the Dynamic Sandbox ever runs it (§4.8).
//!
//! Grounded in the teacher's `content_safety::default_dangerous_patterns`, widened
//! from "any error on this skill" to per-match, line-addressable violations.

use serde::Serialize;

/// One forbidden pattern and the human-readable reason it's forbidden.
struct Rule {
    id: &'static str,
    pattern: &'static str,
    description: &'static str,
}

const DENYLIST: &[Rule] = &[
    Rule { id: "import-os", pattern: "import os", description: "imports the 'os' module (process/filesystem control)" },
    Rule { id: "import-subprocess", pattern: "import subprocess", description: "imports 'subprocess' (arbitrary process execution)" },
    Rule { id: "import-sys", pattern: "import sys", description: "imports 'sys' (interpreter/process control)" },
    Rule { id: "import-socket", pattern: "import socket", description: "imports 'socket' (raw network access)" },
    Rule { id: "import-ctypes", pattern: "import ctypes", description: "imports 'ctypes' (native memory access)" },
    Rule { id: "call-eval", pattern: "eval(", description: "calls eval() — dynamic code execution" },
    Rule { id: "call-exec", pattern: "exec(", description: "calls exec() — dynamic code execution" },
    Rule { id: "call-compile", pattern: "compile(", description: "calls compile() — dynamic code compilation" },
    Rule { id: "call-system", pattern: "system(", description: "calls system() — shell command execution" },
    Rule { id: "call-popen", pattern: "popen(", description: "calls popen() — subprocess spawn" },
    Rule { id: "call-dunder-import", pattern: "__import__(", description: "calls __import__() — dynamic module loading" },
    Rule { id: "shell-rm-rf", pattern: "rm -rf", description: "contains a recursive force-delete shell fragment" },
    Rule { id: "shell-sudo", pattern: "sudo", description: "contains a privilege-escalation shell fragment" },
    Rule { id: "shell-chmod-777", pattern: "chmod 777", description: "contains a world-writable permission change" },
    Rule { id: "shell-chown", pattern: "chown", description: "contains an ownership-change shell fragment" },
];

/// One forbidden pattern found in the candidate's source.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Violation {
    pub rule_id: String,
    pub description: String,
    pub line: usize,
    pub snippet: String,
}

/// Result of scanning one candidate file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StaticAnalysisOutcome {
    pub is_safe: bool,
    pub violations: Vec<Violation>,
}

/// Scans `source` for every denylisted import/call/shell-fragment, resolving
/// each match to its 1-indexed line number and a trimmed snippet. Pure and
/// synchronous — expected to return in milliseconds on typical skill files.
pub fn scan_source(source: &str) -> StaticAnalysisOutcome {
    let mut violations = Vec::new();

    for (idx, line) in source.lines().enumerate() {
        for rule in DENYLIST {
            if line.contains(rule.pattern) {
                violations.push(Violation {
                    rule_id: rule.id.to_string(),
                    description: rule.description.to_string(),
                    line: idx + 1,
                    snippet: line.trim().to_string(),
                });
            }
        }
    }

    StaticAnalysisOutcome {
        is_safe: violations.is_empty(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_source_is_safe() {
        let outcome = scan_source("def run():\n    return 'ok'\n");
        assert!(outcome.is_safe);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn flags_subprocess_import_with_line_and_snippet() {
        let outcome = scan_source("import subprocess\n\ndef run():\n    pass\n");
        assert!(!outcome.is_safe);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].rule_id, "import-subprocess");
        assert_eq!(outcome.violations[0].line, 1);
        assert_eq!(outcome.violations[0].snippet, "import subprocess");
    }

    #[test]
    fn flags_multiple_independent_violations() {
        let outcome = scan_source("import os\neval(user_input)\n");
        assert_eq!(outcome.violations.len(), 2);
        assert!(outcome.violations.iter().any(|v| v.rule_id == "import-os"));
        assert!(outcome.violations.iter().any(|v| v.rule_id == "call-eval"));
    }

    #[test]
    fn benign_word_containing_substring_still_flags_conservatively() {
        // The scanner is a textual pattern match, not a parser: "system(" inside
        // a comment still flags. This is intentional — false positives are safer
        // than false negatives for an admission gate.
        let outcome = scan_source("# calls system(cmd) under the hood\n");
        assert!(!outcome.is_safe);
    }
}
