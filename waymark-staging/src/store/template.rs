//! SQL template substitution.
//!
//! Templated DDL and statements use a small token language:
//! - `%p` expands to the schema prefix,
//! - `%t` to the data tablespace,
//! - `%i` to the index tablespace,
//! - `%m` to `UNLOGGED` when unlogged tables are requested,
//! - any other `%x` passes through unchanged.
//!
//! A brace-delimited region `{...}` survives only if at least one token
//! inside it produced a non-empty value; otherwise the region is erased.
//! So `CREATE TABLE t (...) {TABLESPACE %t}` keeps the tablespace clause
//! only when a tablespace is configured. Substitution runs once at startup
//! on every templated string.

use waymark_core::MiddleConfig;

/// Values substituted into SQL templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    pub prefix: String,
    pub data_tablespace: Option<String>,
    pub index_tablespace: Option<String>,
    pub unlogged: bool,
}

impl TemplateVars {
    pub fn from_config(config: &MiddleConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            data_tablespace: config.data_tablespace.clone(),
            index_tablespace: config.index_tablespace.clone(),
            unlogged: config.unlogged,
        }
    }
}

/// Expand every template token in `template`.
#[must_use]
pub fn expand(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut open_brace: Option<usize> = None;
    let mut copied = false;

    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                open_brace = Some(out.len());
                copied = false;
            }
            '}' => {
                if !copied {
                    if let Some(pos) = open_brace {
                        out.truncate(pos);
                    }
                }
                open_brace = None;
            }
            '%' => {
                let substituted: Option<&str> = match chars.peek() {
                    Some('p') => Some(vars.prefix.as_str()),
                    Some('t') => Some(vars.data_tablespace.as_deref().unwrap_or("")),
                    Some('i') => Some(vars.index_tablespace.as_deref().unwrap_or("")),
                    Some('m') => Some(if vars.unlogged { "UNLOGGED" } else { "" }),
                    _ => None,
                };
                match substituted {
                    Some(value) => {
                        chars.next();
                        if !value.is_empty() {
                            out.push_str(value);
                            copied = true;
                        }
                    }
                    None => out.push('%'),
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vars(prefix: &str, data: Option<&str>, index: Option<&str>, unlogged: bool) -> TemplateVars {
        TemplateVars {
            prefix: prefix.to_owned(),
            data_tablespace: data.map(str::to_owned),
            index_tablespace: index.map(str::to_owned),
            unlogged,
        }
    }

    #[rstest]
    fn substitutes_the_prefix() {
        let expanded = expand("SELECT * FROM %p_nodes", &vars("osm", None, None, false));
        assert_eq!(expanded, "SELECT * FROM osm_nodes");
    }

    #[rstest]
    fn keeps_brace_regions_with_a_substituted_token() {
        let expanded = expand("Hello{ dear %t}!", &vars("", Some("John"), None, false));
        assert_eq!(expanded, "Hello dear John!");
    }

    #[rstest]
    fn erases_brace_regions_without_a_substituted_token() {
        let expanded = expand("Hello{ dear %t}!", &vars("", None, None, false));
        assert_eq!(expanded, "Hello!");
    }

    #[rstest]
    fn unlogged_token_expands_conditionally() {
        let on = expand("CREATE %m TABLE t", &vars("", None, None, true));
        assert_eq!(on, "CREATE UNLOGGED TABLE t");
        let off = expand("CREATE %m TABLE t", &vars("", None, None, false));
        assert_eq!(off, "CREATE  TABLE t");
    }

    #[rstest]
    fn full_ddl_template_expands() {
        let template = "CREATE %m TABLE %p_nodes (id int8 PRIMARY KEY \
                        {USING INDEX TABLESPACE %i}) {TABLESPACE %t}";
        let expanded = expand(template, &vars("osm", Some("slim_data"), None, true));
        assert_eq!(
            expanded,
            "CREATE UNLOGGED TABLE osm_nodes (id int8 PRIMARY KEY ) TABLESPACE slim_data"
        );
    }

    #[rstest]
    #[case("plain text without tokens")]
    #[case("SELECT 1")]
    fn idempotent_on_token_free_strings(#[case] input: &str) {
        let v = vars("osm", Some("d"), Some("i"), true);
        assert_eq!(expand(input, &v), input);
        assert_eq!(expand(&expand(input, &v), &v), input);
    }

    #[rstest]
    fn unrecognised_percent_tokens_pass_through() {
        let expanded = expand("100%x and 50%%", &vars("osm", None, None, false));
        assert_eq!(expanded, "100%x and 50%%");
    }

    #[rstest]
    fn substitution_outside_braces_does_not_rescue_a_region() {
        let expanded = expand("%p{ TABLESPACE %t}", &vars("osm", None, None, false));
        assert_eq!(expanded, "osm");
    }
}
