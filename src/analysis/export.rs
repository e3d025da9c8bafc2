//! Web server configuration export.
//!
//! Renders the active rules as Apache or Nginx directives so a site can serve
//! its redirects without this engine in front. 410 rules and rules with
//! conditions have no equivalent directive and are left out; conditional rules
//! are listed as comments.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::types::{RedirectStatus, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Htaccess,
    Nginx,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "htaccess" | "apache" => Ok(ExportFormat::Htaccess),
            "nginx" => Ok(ExportFormat::Nginx),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// Render `rules` (expected in matching order) in the given format.
pub fn export_rules(rules: &[Rule], format: ExportFormat, generated_at: DateTime<Utc>) -> String {
    match format {
        ExportFormat::Htaccess => export_htaccess(rules, generated_at),
        ExportFormat::Nginx => export_nginx(rules, generated_at),
    }
}

fn exportable(rules: &[Rule]) -> (Vec<&Rule>, Vec<&Rule>) {
    rules
        .iter()
        .filter(|r| !r.status.is_gone() && !r.target.is_empty())
        .partition(|r| r.conditions.is_empty())
}

fn skipped_comments(out: &mut String, skipped: &[&Rule]) {
    for rule in skipped {
        let _ = writeln!(out, "# skipped rule {} ({}): has conditions", rule.id, rule.source);
    }
}

pub fn export_htaccess(rules: &[Rule], generated_at: DateTime<Utc>) -> String {
    let (rules, skipped) = exportable(rules);
    let mut out = String::new();
    let _ = writeln!(out, "# Generated redirect rules");
    let _ = writeln!(out, "# Generated on {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out);
    let _ = writeln!(out, "RewriteEngine On");
    let _ = writeln!(out);

    let (exact, patterns): (Vec<&Rule>, Vec<&Rule>) = rules.into_iter().partition(|r| !r.is_regex);

    if !exact.is_empty() {
        let _ = writeln!(out, "# Simple redirects");
        for rule in exact {
            let _ = writeln!(out, "Redirect {} {} {}", rule.status.code(), rule.source, rule.target);
        }
        let _ = writeln!(out);
    }

    if !patterns.is_empty() {
        let _ = writeln!(out, "# Regex redirects");
        for rule in patterns {
            let _ = writeln!(
                out,
                "RewriteRule {} {} [R={},L]",
                anchored(&rule.source),
                rule.target,
                rule.status.code()
            );
        }
        let _ = writeln!(out);
    }

    skipped_comments(&mut out, &skipped);
    out
}

pub fn export_nginx(rules: &[Rule], generated_at: DateTime<Utc>) -> String {
    let (rules, skipped) = exportable(rules);
    let mut out = String::new();
    let _ = writeln!(out, "# Generated redirect rules");
    let _ = writeln!(out, "# Generated on {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out);

    for rule in rules {
        let code = rule.status.code();
        if !rule.is_regex {
            let _ = writeln!(out, "location = {} {{ return {} {}; }}", rule.source, code, rule.target);
            continue;
        }

        let pattern = anchored(&rule.source);
        match rule.status {
            RedirectStatus::MovedPermanently => {
                let _ = writeln!(out, "rewrite {} {} permanent;", pattern, rule.target);
            }
            RedirectStatus::Found => {
                let _ = writeln!(out, "rewrite {} {} redirect;", pattern, rule.target);
            }
            _ => {
                let _ = writeln!(out, "location ~ {} {{ return {} {}; }}", pattern, code, rule.target);
            }
        }
    }

    skipped_comments(&mut out, &skipped);
    out
}

/// Wrap a pattern in `^...$` unless it is already anchored.
fn anchored(source: &str) -> String {
    let start = if source.starts_with('^') { "" } else { "^" };
    let end = if source.ends_with('$') { "" } else { "$" };
    format!("{}{}{}", start, source, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::{Condition, Provenance};

    fn rule(id: u64, source: &str, target: &str, status: RedirectStatus, is_regex: bool) -> Rule {
        let now = Utc::now();
        Rule {
            id,
            source: source.into(),
            target: target.into(),
            status,
            is_regex,
            is_active: true,
            expires_at: None,
            group: None,
            hit_count: 0,
            last_hit: None,
            provenance: Provenance::Manual,
            note: String::new(),
            conditions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn sample() -> Vec<Rule> {
        let mut conditional = rule(5, "/mobile", "/m", RedirectStatus::Found, false);
        conditional.conditions.push(Condition::new("device_type", "equals", "mobile"));
        vec![
            rule(1, "/old", "/new", RedirectStatus::MovedPermanently, false),
            rule(2, "/gone", "", RedirectStatus::Gone, false),
            rule(3, "^/blog/(.+)$", "/articles/$1", RedirectStatus::MovedPermanently, true),
            rule(4, "/tmp/(.*)", "/t/$1", RedirectStatus::TemporaryRedirect, true),
            conditional,
        ]
    }

    #[test]
    fn test_htaccess() {
        let out = export_htaccess(&sample(), Utc::now());
        assert!(out.contains("RewriteEngine On"));
        assert!(out.contains("Redirect 301 /old /new"));
        assert!(out.contains("RewriteRule ^/blog/(.+)$ /articles/$1 [R=301,L]"));
        assert!(out.contains("RewriteRule ^/tmp/(.*)$ /t/$1 [R=307,L]"));
        assert!(!out.contains("/gone"));
        assert!(out.contains("# skipped rule 5 (/mobile)"));
    }

    #[test]
    fn test_nginx() {
        let out = export_nginx(&sample(), Utc::now());
        assert!(out.contains("location = /old { return 301 /new; }"));
        assert!(out.contains("rewrite ^/blog/(.+)$ /articles/$1 permanent;"));
        assert!(out.contains("location ~ ^/tmp/(.*)$ { return 307 /t/$1; }"));
        assert!(!out.contains("/gone"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("Apache".parse::<ExportFormat>(), Ok(ExportFormat::Htaccess));
        assert_eq!("nginx".parse::<ExportFormat>(), Ok(ExportFormat::Nginx));
        assert!("caddy".parse::<ExportFormat>().is_err());
    }
}
