// src/gcode/parser.rs - line-oriented G-code parser
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GCodeError {
    #[error("Malformed command '{line}': {reason}")]
    Malformed { line: String, reason: String },
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Invalid parameter {param} for {command}: {reason}")]
    InvalidParameter {
        command: String,
        param: String,
        reason: String,
    },
    #[error("Missing parameter {param} for {command}")]
    MissingParameter { command: String, param: String },
    #[error("Unknown heater '{0}'")]
    UnknownHeater(String),
}

/// A single parsed command.
///
/// Classic commands (`G4 P1`, `M104 S200`) store each word as a one-letter
/// parameter. Extended commands (`SET_HEATER_TEMPERATURE HEATER=bed TARGET=60`)
/// store `KEY=VALUE` pairs with upper-cased keys.
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeCommand {
    pub command: String,
    pub parameters: HashMap<String, String>,
    /// Everything after the command word, comments stripped.
    pub raw_args: String,
}

impl GCodeCommand {
    pub fn get(&self, param: &str) -> Option<&str> {
        self.parameters.get(param).map(String::as_str)
    }

    pub fn get_f64(&self, param: &str) -> Result<Option<f64>, GCodeError> {
        match self.get(param) {
            None => Ok(None),
            Some(value) => value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| GCodeError::InvalidParameter {
                    command: self.command.clone(),
                    param: param.to_string(),
                    reason: format!("'{}' is not a number", value),
                }),
        }
    }

    pub fn require_f64(&self, param: &str) -> Result<f64, GCodeError> {
        self.get_f64(param)?.ok_or_else(|| GCodeError::MissingParameter {
            command: self.command.clone(),
            param: param.to_string(),
        })
    }

    fn is_classic(command: &str) -> bool {
        let mut chars = command.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {
                let rest = chars.as_str();
                !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c == '.')
            }
            _ => false,
        }
    }
}

/// Parse one line. Blank lines and comment-only lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<GCodeCommand>, GCodeError> {
    let code = match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let code = code.trim();
    if code.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match code.find(char::is_whitespace) {
        Some(idx) => (&code[..idx], code[idx..].trim()),
        None => (code, ""),
    };
    let command = word.to_ascii_uppercase();
    if !command.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(GCodeError::Malformed {
            line: line.trim().to_string(),
            reason: format!("invalid command word '{}'", word),
        });
    }

    let parameters = if command == "M117" {
        HashMap::new()
    } else if GCodeCommand::is_classic(&command) {
        parse_classic_words(line, rest)?
    } else {
        parse_extended_params(line, rest)?
    };

    Ok(Some(GCodeCommand {
        command,
        parameters,
        raw_args: rest.to_string(),
    }))
}

/// Parse every line of a script.
pub fn parse_script(script: &str) -> Result<Vec<GCodeCommand>, GCodeError> {
    let mut commands = Vec::new();
    for line in script.lines() {
        if let Some(cmd) = parse_line(line)? {
            commands.push(cmd);
        }
    }
    Ok(commands)
}

fn parse_classic_words(line: &str, rest: &str) -> Result<HashMap<String, String>, GCodeError> {
    let mut params = HashMap::new();
    for word in rest.split_whitespace() {
        let mut chars = word.chars();
        let letter = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase(),
            _ => {
                return Err(GCodeError::Malformed {
                    line: line.trim().to_string(),
                    reason: format!("unexpected word '{}'", word),
                });
            }
        };
        params.insert(letter.to_string(), chars.as_str().to_string());
    }
    Ok(params)
}

fn parse_extended_params(line: &str, rest: &str) -> Result<HashMap<String, String>, GCodeError> {
    let mut params = HashMap::new();
    let mut remaining = rest.trim_start();
    while !remaining.is_empty() {
        let eq = remaining.find('=').ok_or_else(|| GCodeError::Malformed {
            line: line.trim().to_string(),
            reason: format!("expected KEY=VALUE near '{}'", remaining),
        })?;
        let key = remaining[..eq].trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(GCodeError::Malformed {
                line: line.trim().to_string(),
                reason: format!("invalid parameter name '{}'", key),
            });
        }
        let after = &remaining[eq + 1..];
        let (value, tail) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted.find('"').ok_or_else(|| GCodeError::Malformed {
                line: line.trim().to_string(),
                reason: "unterminated quote".to_string(),
            })?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after.find(char::is_whitespace) {
                Some(idx) => (&after[..idx], &after[idx..]),
                None => (after, ""),
            }
        };
        params.insert(key.to_ascii_uppercase(), value.to_string());
        remaining = tail.trim_start();
    }
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_command_words() {
        let cmd = parse_line("g4 p1 ; keep alive").unwrap().unwrap();
        assert_eq!(cmd.command, "G4");
        assert_eq!(cmd.get("P"), Some("1"));
        assert_eq!(cmd.require_f64("P").unwrap(), 1.0);
    }

    #[test]
    fn test_extended_command_with_quotes() {
        let cmd = parse_line("RESPOND MSG=\"printer went idle\" TYPE=echo")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.command, "RESPOND");
        assert_eq!(cmd.get("MSG"), Some("printer went idle"));
        assert_eq!(cmd.get("TYPE"), Some("echo"));

        let cmd = parse_line("set_heater_temperature heater=extruder target=0")
            .unwrap()
            .unwrap();
        assert_eq!(cmd.command, "SET_HEATER_TEMPERATURE");
        assert_eq!(cmd.get("HEATER"), Some("extruder"));
        assert_eq!(cmd.get_f64("TARGET").unwrap(), Some(0.0));
    }

    #[test]
    fn test_m117_keeps_raw_message() {
        let cmd = parse_line("M117 Hello there: 100%").unwrap().unwrap();
        assert!(cmd.parameters.is_empty());
        assert_eq!(cmd.raw_args, "Hello there: 100%");
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   ; just a comment").unwrap(), None);
        let script = "G4 P1\n\n; note\nM117 done\n";
        assert_eq!(parse_script(script).unwrap().len(), 2);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(parse_line("G4 =1"), Err(GCodeError::Malformed { .. })));
        assert!(matches!(parse_line("RESPOND MSG"), Err(GCodeError::Malformed { .. })));
        assert!(matches!(parse_line("RESPOND MSG=\"open"), Err(GCodeError::Malformed { .. })));
        assert!(matches!(parse_line("{oops}"), Err(GCodeError::Malformed { .. })));
    }

    #[test]
    fn test_bad_number_parameter() {
        let cmd = parse_line("M104 Shot").unwrap().unwrap();
        assert!(matches!(cmd.get_f64("S"), Err(GCodeError::InvalidParameter { .. })));
        assert!(matches!(cmd.require_f64("T"), Err(GCodeError::MissingParameter { .. })));
    }
}
