//! Inline script naming and `!inline` references.

use crate::config::DefaultTs;
use std::collections::HashSet;

/// Prefix of a string value that points at a sibling file.
pub const INLINE_PREFIX: &str = "!inline ";

const INLINE_SCRIPT: &str = "inline_script";

pub fn inline_ref(path: &str) -> String {
    format!("{}{}", INLINE_PREFIX, path)
}

/// Target of an `!inline` reference.
pub fn parse_inline_ref(value: &str) -> Option<&str> {
    value.strip_prefix(INLINE_PREFIX).map(str::trim)
}

/// File extension of a script language. Plain `ts` is reserved for the
/// configured default runtime.
pub fn language_extension(language: &str, default_ts: DefaultTs) -> &'static str {
    if language == default_ts.language() || language == "bunnative" {
        return "ts";
    }
    match language {
        "python3" => "py",
        "bun" => "bun.ts",
        "deno" => "deno.ts",
        "go" => "go",
        "bash" => "sh",
        "powershell" => "ps1",
        "postgresql" => "pg.sql",
        "mysql" => "my.sql",
        "bigquery" => "bq.sql",
        "oracledb" => "odb.sql",
        "snowflake" => "sf.sql",
        "mssql" => "ms.sql",
        "graphql" => "gql",
        "nativets" => "native.ts",
        "frontend" => "frontend.js",
        "php" => "php",
        "rust" => "rs",
        "csharp" => "cs",
        "nu" => "nu",
        "ansible" => "playbook.yml",
        "java" => "java",
        "duckdb" => "duckdb.sql",
        _ => "no_ext",
    }
}

/// Language of a script content path; inverse of [`language_extension`].
pub fn language_from_path(path: &str, default_ts: DefaultTs) -> Option<&'static str> {
    const BY_SUFFIX: &[(&str, &str)] = &[
        (".bun.ts", "bun"),
        (".deno.ts", "deno"),
        (".native.ts", "nativets"),
        (".fetch.ts", "nativets"),
        (".pg.sql", "postgresql"),
        (".my.sql", "mysql"),
        (".bq.sql", "bigquery"),
        (".odb.sql", "oracledb"),
        (".sf.sql", "snowflake"),
        (".ms.sql", "mssql"),
        (".duckdb.sql", "duckdb"),
        (".playbook.yml", "ansible"),
        (".frontend.js", "frontend"),
        (".py", "python3"),
        (".go", "go"),
        (".sh", "bash"),
        (".ps1", "powershell"),
        (".gql", "graphql"),
        (".php", "php"),
        (".rs", "rust"),
        (".cs", "csharp"),
        (".nu", "nu"),
        (".java", "java"),
    ];
    if let Some((_, lang)) = BY_SUFFIX.iter().find(|(s, _)| path.ends_with(s)) {
        return Some(lang);
    }
    if path.ends_with(".ts") {
        return Some(default_ts.language());
    }
    None
}

/// Deterministic names for inline scripts of one artifact.
///
/// Names derive from the summary; duplicates get a suffix from a counter
/// shared across all names of the artifact.
#[derive(Debug)]
pub struct PathAssigner {
    default_ts: DefaultTs,
    counter: usize,
    seen: HashSet<String>,
}

impl PathAssigner {
    pub fn new(default_ts: DefaultTs) -> Self {
        Self {
            default_ts,
            counter: 0,
            seen: HashSet::new(),
        }
    }

    /// Returns the base path (ending with `.`) and the extension.
    pub fn assign(&mut self, summary: Option<&str>, language: &str) -> (String, String) {
        let mut name = summary
            .map(|s| s.to_lowercase().replace(' ', "_"))
            .unwrap_or_default();
        let mut original = name.clone();
        if name.is_empty() {
            original = INLINE_SCRIPT.to_string();
            name = format!("{}_0", INLINE_SCRIPT);
        }
        while self.seen.contains(&name) {
            self.counter += 1;
            name = format!("{}_{}", original, self.counter);
        }
        self.seen.insert(name.clone());

        let ext = language_extension(language, self.default_ts);
        (format!("{}.{}.", name, INLINE_SCRIPT), ext.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_from_summary() {
        let mut assigner = PathAssigner::new(DefaultTs::Bun);
        let (base, ext) = assigner.assign(Some("Fetch Users"), "python3");
        assert_eq!(base, "fetch_users.inline_script.");
        assert_eq!(ext, "py");
    }

    #[test]
    fn test_default_names_and_shared_counter() {
        let mut assigner = PathAssigner::new(DefaultTs::Bun);
        assert_eq!(assigner.assign(None, "bun").0, "inline_script_0.inline_script.");
        assert_eq!(assigner.assign(None, "bun").0, "inline_script_1.inline_script.");
        assert_eq!(assigner.assign(Some("a"), "bun").0, "a.inline_script.");
        assert_eq!(assigner.assign(Some("a"), "bun").0, "a_2.inline_script.");
        assert_eq!(assigner.assign(Some(""), "bun").0, "inline_script_3.inline_script.");
    }

    #[test]
    fn test_language_extensions() {
        assert_eq!(language_extension("bun", DefaultTs::Bun), "ts");
        assert_eq!(language_extension("deno", DefaultTs::Bun), "deno.ts");
        assert_eq!(language_extension("bun", DefaultTs::Deno), "bun.ts");
        assert_eq!(language_extension("bunnative", DefaultTs::Deno), "ts");
        assert_eq!(language_extension("postgresql", DefaultTs::Bun), "pg.sql");
        assert_eq!(language_extension("ansible", DefaultTs::Bun), "playbook.yml");
        assert_eq!(language_extension("cobol", DefaultTs::Bun), "no_ext");
    }

    #[test]
    fn test_language_from_path() {
        assert_eq!(language_from_path("f/a.pg.sql", DefaultTs::Bun), Some("postgresql"));
        assert_eq!(language_from_path("f/a.ts", DefaultTs::Deno), Some("deno"));
        assert_eq!(language_from_path("f/a.bun.ts", DefaultTs::Deno), Some("bun"));
        assert_eq!(language_from_path("f/a.yaml", DefaultTs::Bun), None);
    }

    #[test]
    fn test_inline_refs() {
        assert_eq!(inline_ref("a.inline_script.ts"), "!inline a.inline_script.ts");
        assert_eq!(parse_inline_ref("!inline a.ts"), Some("a.ts"));
        assert_eq!(parse_inline_ref("print(1)"), None);
    }
}
