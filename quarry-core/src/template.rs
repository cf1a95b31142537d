use once_cell::sync::OnceCell;
use regex::Regex;
use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::{Arc, LazyLock, Mutex},
};

static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?s)'[^']*'|"[^"]*""#).unwrap());
static PARAMETER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\p{Alphabetic}\w{0,127})").unwrap());

/// A named parameter found in a SQL template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlParameter {
    /// Ordinal, assigned in first-seen order starting from 0.
    pub index: usize,
    pub name: String,
}

/// Driver specific placeholder strategy.
///
/// The placeholder written into the final SQL and the key used to bind a value
/// are two separate operations: some drivers bind by the placeholder itself
/// (`$1`) while others bind by the bare name.
pub trait ParameterCustomizer: Send + Sync {
    /// Placeholder substituted in the final SQL.
    fn parameter_name(&self, parameter: &SqlParameter) -> String;
    /// Key handed to `Statement::bind` for this parameter.
    fn argument_name(&self, parameter: &SqlParameter) -> String {
        parameter.name.clone()
    }
}

/// `$1`, `$2`, ... bound by the placeholder itself.
#[derive(Default, Debug, Clone, Copy)]
pub struct PostgresCustomizer;
impl ParameterCustomizer for PostgresCustomizer {
    fn parameter_name(&self, parameter: &SqlParameter) -> String {
        format!("${}", parameter.index + 1)
    }
    fn argument_name(&self, parameter: &SqlParameter) -> String {
        self.parameter_name(parameter)
    }
}

/// `?name`, bound by name.
#[derive(Default, Debug, Clone, Copy)]
pub struct MySqlCustomizer;
impl ParameterCustomizer for MySqlCustomizer {
    fn parameter_name(&self, parameter: &SqlParameter) -> String {
        format!("?{}", parameter.name)
    }
}

/// `@name`, bound by name. Also the fallback for unknown dialects.
#[derive(Default, Debug, Clone, Copy)]
pub struct SqlServerCustomizer;
impl ParameterCustomizer for SqlServerCustomizer {
    fn parameter_name(&self, parameter: &SqlParameter) -> String {
        format!("@{}", parameter.name)
    }
}

pub type DefaultCustomizer = SqlServerCustomizer;

/// Bare `?`, bound by ordinal (`"0"`, `"1"`, ...).
///
/// Only sound for templates where every name appears once, repeated names
/// would need one binding per occurrence.
#[derive(Default, Debug, Clone, Copy)]
pub struct PositionalCustomizer;
impl ParameterCustomizer for PositionalCustomizer {
    fn parameter_name(&self, _parameter: &SqlParameter) -> String {
        "?".into()
    }
    fn argument_name(&self, parameter: &SqlParameter) -> String {
        parameter.index.to_string()
    }
}

/// Parsed, immutable form of a SQL text containing `:name` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    text: String,
    parameters: Vec<SqlParameter>,
    arguments: HashMap<String, String>,
    sql: String,
}

impl SqlTemplate {
    pub fn parse(sql: &str, customizer: &dyn ParameterCustomizer) -> Self {
        let text = COMMENT.replace_all(sql, "").trim().to_string();
        let mut masked = sql.to_string();
        mask(&mut masked, &COMMENT);
        mask(&mut masked, &QUOTED);
        let mut parameters = Vec::<SqlParameter>::new();
        let mut occurrences = Vec::new();
        for captures in PARAMETER.captures_iter(&masked) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let Some(name) = captures.get(1) else {
                continue;
            };
            // `a::text` is a cast
            if whole.start() > 0 && masked.as_bytes()[whole.start() - 1] == b':' {
                continue;
            }
            let name = name.as_str();
            let index = match parameters.iter().position(|p| p.name == name) {
                Some(index) => index,
                None => {
                    parameters.push(SqlParameter {
                        index: parameters.len(),
                        name: name.to_string(),
                    });
                    parameters.len() - 1
                }
            };
            occurrences.push((whole.range(), index));
        }
        let sql = if occurrences.is_empty() {
            text.clone()
        } else {
            let mut result = String::with_capacity(sql.len() + occurrences.len() * 4);
            let mut last = 0;
            for (range, index) in &occurrences {
                result.push_str(&sql[last..range.start]);
                result.push_str(&customizer.parameter_name(&parameters[*index]));
                last = range.end;
            }
            result.push_str(&sql[last..]);
            result.trim().to_string()
        };
        let arguments = parameters
            .iter()
            .map(|p| (p.name.clone(), customizer.argument_name(p)))
            .collect();
        Self {
            text,
            parameters,
            arguments,
            sql,
        }
    }

    /// The source text with block comments removed and trimmed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Rewritten SQL, ready for the driver.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Distinct parameters in ordinal order.
    pub fn parameters(&self) -> &[SqlParameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&SqlParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Binding key of the parameter `name`.
    pub fn argument_name(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).map(String::as_str)
    }
}

impl Display for SqlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Replaces every match with spaces, keeping byte offsets stable.
fn mask(text: &mut String, regex: &Regex) {
    let ranges: Vec<_> = regex.find_iter(text).map(|m| m.range()).collect();
    for range in ranges {
        let spaces = " ".repeat(range.len());
        text.replace_range(range, &spaces);
    }
}

/// Parsed templates keyed by their source text, each parsed at most once.
pub struct SqlTemplates {
    customizer: Arc<dyn ParameterCustomizer>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Arc<SqlTemplate>>>>>,
}

impl SqlTemplates {
    pub fn new(customizer: Arc<dyn ParameterCustomizer>) -> Self {
        Self {
            customizer,
            cache: Default::default(),
        }
    }

    pub fn customizer(&self) -> &Arc<dyn ParameterCustomizer> {
        &self.customizer
    }

    pub fn get(&self, sql: &str) -> Arc<SqlTemplate> {
        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.entry(sql.to_string()).or_default().clone()
        };
        cell.get_or_init(|| {
            log::debug!("Parsing template {}", crate::truncate_long!(sql));
            Arc::new(SqlTemplate::parse(sql, self.customizer.as_ref()))
        })
        .clone()
    }
}
