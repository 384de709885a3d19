//! KST text reader
//!
//! KST is a line-oriented record format: values are separated by `,`,
//! records end with `;`, `[ ... ]` encloses an array and `"..."` quotes a
//! string. A `#` outside a string starts a comment that runs to the end of
//! the line. Inside an array `;` separates rows and reads like `,`.

/// A single KST value
#[derive(Debug, Clone, PartialEq)]
pub enum KstValue {
    Text(String),
    Array(Vec<KstValue>),
}

impl KstValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            KstValue::Text(text) => Some(text),
            KstValue::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&[KstValue]> {
        match self {
            KstValue::Array(values) => Some(values),
            KstValue::Text(_) => None,
        }
    }

    /// Empty text or an empty array
    pub fn is_empty(&self) -> bool {
        match self {
            KstValue::Text(text) => text.is_empty(),
            KstValue::Array(values) => values.is_empty(),
        }
    }
}

pub type KstRecord = Vec<KstValue>;

/// Value being accumulated between separators
#[derive(Default)]
struct PendingValue {
    raw: String,
    quoted: Option<String>,
    array: Option<KstValue>,
}

impl PendingValue {
    fn is_blank(&self) -> bool {
        self.raw.trim().is_empty() && self.quoted.is_none() && self.array.is_none()
    }

    fn take(&mut self, line: usize) -> Result<KstValue, String> {
        let raw = std::mem::take(&mut self.raw);
        let raw = raw.trim();
        match (self.quoted.take(), self.array.take()) {
            (None, None) => Ok(KstValue::Text(raw.to_string())),
            (Some(text), None) if raw.is_empty() => Ok(KstValue::Text(text)),
            (None, Some(array)) if raw.is_empty() => Ok(array),
            _ => Err(format!("unexpected text next to a value on line {}", line)),
        }
    }
}

/// Split KST text into records
pub fn parse(input: &str) -> Result<Vec<KstRecord>, String> {
    let mut records = Vec::new();
    // Bottom entry is the current record; each open array pushes one more
    let mut stack: Vec<Vec<KstValue>> = vec![Vec::new()];
    let mut pending = PendingValue::default();
    let mut line = 1;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if pending.quoted.is_some() || pending.array.is_some() || !pending.raw.trim().is_empty() {
                    return Err(format!("unexpected quote on line {}", line));
                }
                pending.quoted = Some(read_quoted(&mut chars, &mut line)?);
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            ',' => {
                let value = pending.take(line)?;
                push_value(&mut stack, value);
            }
            ';' => {
                let value = pending.take(line)?;
                push_value(&mut stack, value);
                if stack.len() == 1 {
                    records.push(std::mem::take(&mut stack[0]));
                }
            }
            '[' => {
                if !pending.is_blank() {
                    return Err(format!("unexpected '[' on line {}", line));
                }
                pending.raw.clear();
                stack.push(Vec::new());
            }
            ']' => {
                if stack.len() == 1 {
                    return Err(format!("unbalanced ']' on line {}", line));
                }
                if !pending.is_blank() {
                    let value = pending.take(line)?;
                    push_value(&mut stack, value);
                }
                pending.raw.clear();
                let values = stack.pop().unwrap_or_default();
                pending.array = Some(KstValue::Array(values));
            }
            '\n' => {
                line += 1;
                pending.raw.push(c);
            }
            _ => pending.raw.push(c),
        }
    }

    if stack.len() > 1 {
        return Err("unbalanced '[' at end of input".to_string());
    }
    if !pending.is_blank() || !stack[0].is_empty() {
        return Err(format!("missing record terminator on line {}", line));
    }
    Ok(records)
}

fn push_value(stack: &mut [Vec<KstValue>], value: KstValue) {
    if let Some(top) = stack.last_mut() {
        top.push(value);
    }
}

fn read_quoted(chars: &mut std::str::Chars<'_>, line: &mut usize) -> Result<String, String> {
    let start = *line;
    let mut text = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(text),
            '\\' => match chars.next() {
                Some(escaped) => text.push(escaped),
                None => break,
            },
            '\n' => {
                *line += 1;
                text.push(c);
            }
            _ => text.push(c),
        }
    }
    Err(format!("unterminated string starting on line {}", start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> KstValue {
        KstValue::Text(s.to_string())
    }

    #[test]
    fn test_records_and_values() {
        let records = parse("QueryPlan, 1;\n# comment\nSIMILARITY; # trailing\n").unwrap();
        assert_eq!(records, vec![vec![text("QueryPlan"), text("1")], vec![text("SIMILARITY")]]);
    }

    #[test]
    fn test_arrays_and_quotes() {
        let records = parse(r#"[ "a, b", c; d ], [], "say \"hi\"";"#).unwrap();
        assert_eq!(
            records,
            vec![vec![
                KstValue::Array(vec![text("a, b"), text("c"), text("d")]),
                KstValue::Array(vec![]),
                text("say \"hi\""),
            ]]
        );
        assert!(records[0][1].is_empty());
    }

    #[test]
    fn test_nested_arrays() {
        let records = parse("[[1, 2], [3]];").unwrap();
        let outer = records[0][0].as_array().unwrap();
        assert_eq!(outer.len(), 2);
        assert_eq!(outer[1], KstValue::Array(vec![text("3")]));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("a, b").unwrap_err().contains("terminator"));
        assert!(parse("[a, b;").unwrap_err().contains("unbalanced"));
        assert!(parse("a];").unwrap_err().contains("unbalanced"));
        assert!(parse("\"open;").unwrap_err().contains("unterminated"));
        assert!(parse("x\"y\";").is_err());
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("  # nothing here\n").unwrap().is_empty());
    }
}
