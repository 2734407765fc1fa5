//! CARDS generation: a predecessor's run configuration with per-job overrides.
//!
//! Each override `KEY=VALUE` rewrites the token following `KEY` (optionally
//! separated by `:` or `=`) on every line where `KEY` appears as a whole word.
//! `HEADLINE` is always set and replaces everything to the end of its line.
//! Keys that do not occur in the template are ignored.

use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;

use crate::error::{PostboxError, Result};
use crate::models::Sid;

/// Key whose value spans the rest of the line; tagged with the job id.
pub const HEADLINE_KEY: &str = "HEADLINE";

/// Overrides in application order; a repeated key keeps its last value.
pub type Overrides = IndexMap<String, String>;

/// Parse a comma-separated `KEY=VALUE` list. An empty string yields no overrides.
pub fn parse_overrides(params: &str) -> std::result::Result<Overrides, String> {
    let mut overrides = Overrides::new();
    for pair in params.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("override {:?} is not KEY=VALUE", pair))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            return Err(format!("override {:?} has an empty key or value", pair));
        }
        overrides.insert(key.to_string(), value.to_string());
    }
    Ok(overrides)
}

/// Render a CARDS file for job `sid` from the template at `template_path`.
pub fn render(template_path: &Path, overrides: &Overrides, sid: Sid) -> Result<String> {
    let template = fs::read_to_string(template_path).map_err(|e| {
        PostboxError::Config(format!(
            "cannot read CARDS template {}: {}",
            template_path.display(),
            e
        ))
    })?;
    render_text(&template, overrides, sid)
}

/// Render and write the result to `destination`.
pub fn render_to(
    template_path: &Path,
    destination: &Path,
    overrides: &Overrides,
    sid: Sid,
) -> Result<()> {
    let cards = render(template_path, overrides, sid)?;
    fs::write(destination, cards).map_err(|e| PostboxError::io(destination, e))
}

/// Apply `overrides` plus the job headline to template text.
pub fn render_text(template: &str, overrides: &Overrides, sid: Sid) -> Result<String> {
    let mut all = overrides.clone();
    all.insert(HEADLINE_KEY.to_string(), format!("SID{}", sid));

    let mut text = template.to_string();
    for (key, value) in &all {
        let pattern = key_pattern(key)?;
        text = replace_per_line(&text, &pattern, value);
    }
    Ok(text)
}

fn key_pattern(key: &str) -> Result<Regex> {
    let value = if key == HEADLINE_KEY {
        r"(\S.*)$"
    } else {
        r"(\S+)"
    };
    let pattern = format!(
        r"^(.*?(?:^|\s){}(?:\s*[:=]\s*|\s+)){}",
        regex::escape(key),
        value
    );
    Regex::new(&pattern)
        .map_err(|e| PostboxError::Config(format!("bad CARDS key {:?}: {}", key, e)))
}

fn replace_per_line(text: &str, pattern: &Regex, value: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let (body, ending) = match line.strip_suffix('\n') {
            Some(body) => match body.strip_suffix('\r') {
                Some(body) => (body, "\r\n"),
                None => (body, "\n"),
            },
            None => (line, ""),
        };
        let replaced = pattern.replace(body, |caps: &Captures<'_>| format!("{}{}", &caps[1], value));
        out.push_str(&replaced);
        out.push_str(ending);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEMPLATE: &str = "\
HEADLINE: old model name  with spaces
 TEFF = 20000.  LOGG = 3.9
 HYDROGEN 0.70  HELIUM 0.29
-TEFF = 99999.
 TEFFMAX 30000.
 VELPAR: VFINAL=1500. RMAX=100.
";

    fn overrides(params: &str) -> Overrides {
        parse_overrides(params).unwrap()
    }

    #[test]
    fn test_parse_overrides() {
        let parsed = overrides("TEFF=22000., LOGG = 4.0,,");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["TEFF"], "22000.");
        assert_eq!(parsed["LOGG"], "4.0");
        assert!(overrides("").is_empty());
        assert!(parse_overrides("TEFF").is_err());
        assert!(parse_overrides("=3").is_err());
    }

    #[test]
    fn test_headline_always_injected() {
        let out = render_text(TEMPLATE, &Overrides::new(), 43).unwrap();
        assert_eq!(out.lines().next(), Some("HEADLINE: SID43"));
    }

    #[test]
    fn test_replaces_only_next_token() {
        let out = render_text(TEMPLATE, &overrides("TEFF=22000.,HELIUM=0.30"), 1).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], " TEFF = 22000.  LOGG = 3.9");
        assert_eq!(lines[2], " HYDROGEN 0.70  HELIUM 0.30");
    }

    #[test]
    fn test_key_must_be_a_whole_word() {
        let out = render_text(TEMPLATE, &overrides("TEFF=22000."), 1).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        // Commented-out card and longer key are untouched.
        assert_eq!(lines[3], "-TEFF = 99999.");
        assert_eq!(lines[4], " TEFFMAX 30000.");
    }

    #[test]
    fn test_key_inside_line_with_equals() {
        let out = render_text(TEMPLATE, &overrides("VFINAL=2000."), 1).unwrap();
        assert!(out.contains(" VELPAR: VFINAL=2000. RMAX=100.\n"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let out = render_text(TEMPLATE, &overrides("XRAY=1"), 7).unwrap();
        let expected = TEMPLATE.replacen("old model name  with spaces", "SID7", 1);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_render_to_writes_destination() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("CARDS_old");
        let dest = dir.path().join("CARDS");
        fs::write(&template, TEMPLATE).unwrap();

        render_to(&template, &dest, &overrides("LOGG=4.1"), 12).unwrap();
        let written = fs::read_to_string(&dest).unwrap();
        assert!(written.starts_with("HEADLINE: SID12\n"));
        assert!(written.contains("LOGG = 4.1"));
    }

    #[test]
    fn test_missing_template_is_config_error() {
        let err = render(Path::new("/nonexistent/CARDS"), &Overrides::new(), 1).unwrap_err();
        assert!(matches!(err, PostboxError::Config(_)));
    }
}
