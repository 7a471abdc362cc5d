use std::collections::HashMap;

use crate::error::{Error, Result};

/// A scalar bound to a query placeholder or an execution setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
}

impl ParamValue {
    /// Render as a SQL literal for substitution into a query template.
    /// Strings are single-quoted with `\` and `'` escaped; integers render
    /// bare.
    pub(crate) fn render_literal(&self) -> String {
        match self {
            ParamValue::Int(n) => n.to_string(),
            ParamValue::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        _ => out.push(c),
                    }
                }
                out.push('\'');
                out
            }
        }
    }

    /// Render as a plain string, for settings passed to the server.
    pub(crate) fn render_plain(&self) -> String {
        match self {
            ParamValue::Int(n) => n.to_string(),
            ParamValue::Str(s) => s.clone(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value as i64)
    }
}

pub type Params = HashMap<String, ParamValue>;

/// Substitute `%(name)s` placeholders in `template` with bound values,
/// producing the final query. `%%` renders a literal percent sign.
///
/// Substitution is all-or-nothing: every placeholder must resolve, and the
/// result is fully literal. Values are rendered type-aware so string
/// parameters cannot break out of their literal.
pub fn substitute(template: &str, params: &Params) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some('(') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(')') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::Template(format!(
                                "unterminated placeholder '%({name}'"
                            )))
                        }
                    }
                }
                match chars.next() {
                    Some('s') => {}
                    other => {
                        return Err(Error::Template(format!(
                            "placeholder '%({name})' must end in 's', found {other:?}"
                        )))
                    }
                }
                let value = params
                    .get(&name)
                    .ok_or(Error::UnknownParameter { name })?;
                out.push_str(&value.render_literal());
            }
            other => {
                return Err(Error::Template(format!(
                    "unsupported conversion after '%': {other:?}"
                )))
            }
        }
    }

    Ok(out)
}
