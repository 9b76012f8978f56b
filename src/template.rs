//! Script templates with `{{ .NAME }}` placeholders

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

/// A single action body: `.NAME` with optional surrounding whitespace
#[allow(clippy::expect_used)]
static ACTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*$").expect("constant regex pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template references undefined variable {name:?}")]
    Undefined { name: String },

    #[error("malformed template near {snippet:?}: {reason}")]
    Malformed { snippet: String, reason: &'static str },
}

/// Variables available to a template
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable (builder style)
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Render a template, substituting every `{{ .NAME }}` action
///
/// Values are inserted verbatim. Anything between `{{` and `}}` that is not
/// a single `.NAME` reference is rejected, as is an unclosed `{{`.
pub fn render(template: &str, vars: &Vars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let end = tail.find("}}").ok_or_else(|| TemplateError::Malformed {
            snippet: snippet(tail),
            reason: "unclosed action",
        })?;
        let action = &tail[2..end];

        let caps = ACTION_PATTERN
            .captures(action)
            .ok_or_else(|| TemplateError::Malformed {
                snippet: snippet(&tail[..end + 2]),
                reason: "expected a variable reference like {{ .NAME }}",
            })?;
        let name = &caps[1];

        let value = vars.get(name).ok_or_else(|| TemplateError::Undefined {
            name: name.to_string(),
        })?;
        out.push_str(value);

        rest = &tail[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn snippet(s: &str) -> String {
    s.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_variables() {
        let vars = Vars::new()
            .set("WORK_DIR", "kubeone")
            .set("NODE_ID", "2");

        let out = render(
            "sudo kubeadm init --config=./{{ .WORK_DIR }}/cfg/master_{{.NODE_ID}}.yaml",
            &vars,
        )
        .unwrap();

        assert_eq!(out, "sudo kubeadm init --config=./kubeone/cfg/master_2.yaml");
    }

    #[test]
    fn test_shell_braces_are_left_alone() {
        let out = render("echo ${HOME} { x; }", &Vars::new()).unwrap();
        assert_eq!(out, "echo ${HOME} { x; }");
    }

    #[test]
    fn test_undefined_variable() {
        let err = render("mkdir -p {{ .WORK_DIR }}", &Vars::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Undefined {
                name: "WORK_DIR".to_string()
            }
        );
    }

    #[test]
    fn test_unclosed_action_is_malformed() {
        let err = render("echo {{ .WORK_DIR", &Vars::new().set("WORK_DIR", "x")).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::Malformed {
                reason: "unclosed action",
                ..
            }
        ));
    }

    #[test]
    fn test_non_variable_action_is_malformed() {
        let err = render("{{ if .X }}", &Vars::new().set("X", "1")).unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { .. }));
        assert!(err.to_string().contains("{{ if .X }}"));
    }
}
