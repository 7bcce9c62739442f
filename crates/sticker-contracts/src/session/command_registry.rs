#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "login",
        action: "login",
    },
    CommandSpec {
        command: "mode",
        action: "set_mode",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        action: "upload",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
    CommandSpec {
        command: "zip",
        action: "zip",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "back",
        action: "back",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
];

pub(crate) const GRID_COMMAND: CommandSpec = CommandSpec {
    command: "grid",
    action: "set_grid",
};

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/login <password>",
    "/upload <path>",
    "/mode <sticker-pack|christmas-hat>",
    "/generate",
    "/grid <rows> <cols>",
    "/download [dir]",
    "/zip [dir]",
    "/back",
    "/status",
    "/help",
    "/quit",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_lists_every_command() {
        let tables = [RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS, NO_ARG_COMMANDS, &[GRID_COMMAND]];
        for spec in tables.iter().flat_map(|table| table.iter()) {
            let slash = format!("/{}", spec.command);
            assert!(
                SESSION_HELP_COMMANDS
                    .iter()
                    .any(|line| line.split_whitespace().next() == Some(slash.as_str())),
                "{slash} missing from help"
            );
        }
    }
}
