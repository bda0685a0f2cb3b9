//! Placeholder substitution for email templates.
//!
//! Templates use `$name` or `${name}` markers. Substitution is permissive: a
//! placeholder with no matching variable is left in the output verbatim, so a
//! partially personalized email is still sendable. `$$` escapes a literal `$`.

use std::collections::{BTreeSet, HashMap};

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Substitute every `$name` / `${name}` whose name appears in `vars`.
/// Unknown names stay as literal markers.
pub fn render(content: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(content.len());
    let mut chars = content.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek().copied() {
            // "$$" escapes to a single "$"
            Some((_, '$')) => {
                chars.next();
                out.push('$');
            }
            Some((start, '{')) => {
                if let Some((name, end)) = braced_name(content, start) {
                    match vars.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('$');
                            out.push_str(&content[start..=end]);
                        }
                    }
                    // skip past the closing brace
                    while let Some((i, _)) = chars.peek().copied() {
                        if i > end {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    out.push('$');
                }
            }
            Some((start, c2)) if is_ident_start(c2) => {
                let mut end = start;
                while let Some((i, c3)) = chars.peek().copied() {
                    if is_ident_continue(c3) {
                        end = i;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &content[start..=end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('$');
                        out.push_str(name);
                    }
                }
            }
            // lone "$" at end of input or before a non-identifier char
            _ => out.push('$'),
        }
    }

    out
}

/// Parse `{name}` starting at the `{` byte offset. Returns the name and the
/// offset of the closing brace.
fn braced_name(content: &str, brace: usize) -> Option<(&str, usize)> {
    let rest = &content[brace + 1..];
    let close = rest.find('}')?;
    let name = &rest[..close];
    let mut cs = name.chars();
    let first = cs.next()?;
    if !is_ident_start(first) || !cs.all(is_ident_continue) {
        return None;
    }
    Some((name, brace + 1 + close))
}

/// Distinct placeholder names in `content`, sorted. Display/bookkeeping only;
/// rendering never validates against this list.
pub fn extract(content: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    let mut chars = content.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            continue;
        }
        match chars.peek().copied() {
            Some((_, '$')) => {
                chars.next();
            }
            Some((start, '{')) => {
                if let Some((name, end)) = braced_name(content, start) {
                    names.insert(name.to_string());
                    while let Some((i, _)) = chars.peek().copied() {
                        if i > end {
                            break;
                        }
                        chars.next();
                    }
                }
            }
            Some((start, c2)) if is_ident_start(c2) => {
                let mut end = start;
                while let Some((i, c3)) = chars.peek().copied() {
                    if is_ident_continue(c3) {
                        end = i;
                        chars.next();
                    } else {
                        break;
                    }
                }
                names.insert(content[start..=end].to_string());
            }
            _ => {}
        }
    }

    names.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholders() {
        let rendered = render(
            "Hello $name, welcome to $company!",
            &vars(&[("name", "John"), ("company", "Acme")]),
        );
        assert_eq!(rendered, "Hello John, welcome to Acme!");
    }

    #[test]
    fn leaves_missing_placeholders_literal() {
        let rendered = render(
            "Hi $first_name, from $company",
            &vars(&[("first_name", "Ana")]),
        );
        assert_eq!(rendered, "Hi Ana, from $company");
    }

    #[test]
    fn braced_form() {
        let rendered = render(
            "Dear ${first_name}${last_name}",
            &vars(&[("first_name", "Ana")]),
        );
        assert_eq!(rendered, "Dear Ana${last_name}");
    }

    #[test]
    fn dollar_escape_and_lone_dollar() {
        let rendered = render("Price: $$5 and $ sign", &vars(&[]));
        assert_eq!(rendered, "Price: $5 and $ sign");
    }

    #[test]
    fn malformed_brace_left_alone() {
        let rendered = render("broken ${not closed", &vars(&[("not", "x")]));
        assert_eq!(rendered, "broken ${not closed");
    }

    #[test]
    fn substitution_happens_exactly_once() {
        // A substituted value containing a marker is not re-expanded.
        let rendered = render("$a", &vars(&[("a", "$b"), ("b", "nope")]));
        assert_eq!(rendered, "$b");
    }

    #[test]
    fn extract_finds_both_forms_once() {
        let names = extract("Hi $name, ${name} works at $company. Pay $$9.");
        assert_eq!(names, vec!["company".to_string(), "name".to_string()]);
    }

    #[test]
    fn extract_empty_template() {
        assert!(extract("no markers here").is_empty());
    }
}
