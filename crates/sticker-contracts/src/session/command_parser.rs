use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, GRID_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};
use crate::grid::GridSpec;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionCommand {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl SessionCommand {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Grid carried by a `/grid` command, already clamped to the allowed range.
    pub fn grid(&self) -> Option<GridSpec> {
        let rows = self.command_args.get("rows").and_then(Value::as_i64)?;
        let cols = self.command_args.get("cols").and_then(Value::as_i64)?;
        Some(GridSpec::clamped(rows, cols))
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

/// Joins shell-style words so a quoted path with spaces survives intact.
fn parse_single_path_arg(arg: &str) -> String {
    let words = shell_words::split(arg)
        .unwrap_or_else(|_| arg.split_whitespace().map(str::to_string).collect());
    words
        .into_iter()
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_grid_args(arg: &str) -> Option<(i64, i64)> {
    let normalized = arg.to_ascii_lowercase().replace(['x', ','], " ");
    let mut parts = normalized.split_whitespace();
    let rows = parts.next()?.parse::<i64>().ok()?;
    let cols = parts.next()?.parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((rows, cols))
}

pub fn parse_command(text: &str) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let key = if action == "login" { "password" } else { "mode" };
                let mut parsed = SessionCommand::new(action, text);
                parsed
                    .command_args
                    .insert(key.to_string(), Value::String(arg.to_string()));
                return parsed;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut parsed = SessionCommand::new(action, text);
                parsed.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return parsed;
            }

            if command == GRID_COMMAND.command {
                let Some((rows, cols)) = parse_grid_args(arg) else {
                    let mut parsed = SessionCommand::new("invalid", text);
                    parsed.command_args.insert(
                        "reason".to_string(),
                        Value::String("/grid expects two numbers: <rows> <cols>".to_string()),
                    );
                    return parsed;
                };
                let mut parsed = SessionCommand::new(GRID_COMMAND.action, text);
                parsed
                    .command_args
                    .insert("rows".to_string(), Value::Number(rows.into()));
                parsed
                    .command_args
                    .insert("cols".to_string(), Value::Number(cols.into()));
                return parsed;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return SessionCommand::new(action, text);
            }

            let mut parsed = SessionCommand::new("unknown", text);
            parsed
                .command_args
                .insert("command".to_string(), Value::String(command));
            parsed
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return parsed;
        }
    }

    // A bare line is taken as the image to upload, like dropping a file.
    let mut parsed = SessionCommand::new("upload", text);
    parsed.command_args.insert(
        "path".to_string(),
        Value::String(parse_single_path_arg(raw_trimmed)),
    );
    parsed
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_command;

    #[test]
    fn parse_login_keeps_raw_password() {
        let parsed = parse_command("/login  hunter 2 ");
        assert_eq!(parsed.action, "login");
        assert_eq!(parsed.command_args["password"], json!("hunter 2"));
    }

    #[test]
    fn parse_mode_command() {
        let parsed = parse_command("/mode christmas-hat");
        assert_eq!(parsed.action, "set_mode");
        assert_eq!(parsed.arg_str("mode"), Some("christmas-hat"));
    }

    #[test]
    fn parse_upload_quoted_path() {
        let parsed = parse_command("/upload \"/tmp/my fox.png\"");
        assert_eq!(parsed.action, "upload");
        assert_eq!(parsed.command_args["path"], json!("/tmp/my fox.png"));
    }

    #[test]
    fn bare_line_is_an_upload() {
        let parsed = parse_command("  ./fox.jpg ");
        assert_eq!(parsed.action, "upload");
        assert_eq!(parsed.arg_str("path"), Some("./fox.jpg"));
    }

    #[test]
    fn download_and_zip_allow_missing_dir() {
        let download = parse_command("/download");
        assert_eq!(download.action, "download");
        assert_eq!(download.arg_str("path"), None);

        let zip = parse_command("/zip out/packs");
        assert_eq!(zip.action, "zip");
        assert_eq!(zip.arg_str("path"), Some("out/packs"));
    }

    #[test]
    fn parse_grid_variants_and_clamp() {
        let spaced = parse_command("/grid 4 6");
        assert_eq!(spaced.action, "set_grid");
        let grid = spaced.grid().expect("grid");
        assert_eq!((grid.rows(), grid.cols()), (4, 6));

        let crossed = parse_command("/grid 6x4").grid().expect("grid");
        assert_eq!((crossed.rows(), crossed.cols()), (6, 4));

        let clamped = parse_command("/grid 0 99").grid().expect("grid");
        assert_eq!((clamped.rows(), clamped.cols()), (1, 10));
    }

    #[test]
    fn parse_grid_rejects_garbage() {
        let parsed = parse_command("/grid four six");
        assert_eq!(parsed.action, "invalid");
        assert!(parsed.grid().is_none());
        assert_eq!(parse_command("/grid 1 2 3").action, "invalid");
    }

    #[test]
    fn parse_no_arg_commands() {
        for (input, action) in [
            ("/generate", "generate"),
            ("/back", "back"),
            ("/status", "status"),
            ("/HELP", "help"),
            ("/quit", "quit"),
        ] {
            assert_eq!(parse_command(input).action, action);
        }
        assert_eq!(parse_command("   ").action, "noop");
    }

    #[test]
    fn parse_unknown_command() {
        let parsed = parse_command("/magic foo bar");
        assert_eq!(parsed.action, "unknown");
        assert_eq!(parsed.command_args["command"], json!("magic"));
        assert_eq!(parsed.command_args["arg"], json!("foo bar"));
    }
}
