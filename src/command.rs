//! Command-line parsing

/// Help information for a command
#[derive(Debug, Clone)]
pub struct CommandHelp {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

/// Parsed command from the process arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Help,
    Status,
    Init {
        tenant_id: String,
        client_id: String,
    },
    Authorize,
    Login {
        code: String,
    },
    Refresh {
        user_id: String,
        refresh_token: String,
    },
    Message {
        user_id: String,
        message_id: String,
    },
    Thread {
        user_id: String,
        conversation_id: String,
    },
    Draft {
        user_id: String,
        subject: String,
        to: String,
        body: String,
    },
    PatchDraft {
        user_id: String,
        message_id: String,
        subject: String,
        body: String,
    },
    Reply {
        user_id: String,
        message_id: String,
    },
    LogSent {
        user_id: String,
        message_id: String,
        original_reply: String,
        sent_content: String,
    },
    FineTune,
    FineTuneStatus {
        job_id: String,
    },
    Preferences {
        user_id: String,
    },
    SetPreferences {
        user_id: String,
        preferences: String,
    },
}

/// Parse the arguments after the program name.
///
/// Returns an error message naming the expected usage when the command is
/// unknown or has the wrong number of arguments.
pub fn parse_command(args: &[String]) -> Result<ParsedCommand, String> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(ParsedCommand::Help);
    };

    let command = match name.as_str() {
        "help" | "--help" | "-h" => ParsedCommand::Help,
        "status" => {
            operands::<0>(name, rest)?;
            ParsedCommand::Status
        }
        "init" => {
            let [tenant_id, client_id] = operands::<2>(name, rest)?;
            ParsedCommand::Init {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
            }
        }
        "authorize" => {
            operands::<0>(name, rest)?;
            ParsedCommand::Authorize
        }
        "login" => {
            let [code] = operands::<1>(name, rest)?;
            ParsedCommand::Login { code: code.clone() }
        }
        "refresh" => {
            let [user_id, refresh_token] = operands::<2>(name, rest)?;
            ParsedCommand::Refresh {
                user_id: user_id.clone(),
                refresh_token: refresh_token.clone(),
            }
        }
        "message" => {
            let [user_id, message_id] = operands::<2>(name, rest)?;
            ParsedCommand::Message {
                user_id: user_id.clone(),
                message_id: message_id.clone(),
            }
        }
        "thread" => {
            let [user_id, conversation_id] = operands::<2>(name, rest)?;
            ParsedCommand::Thread {
                user_id: user_id.clone(),
                conversation_id: conversation_id.clone(),
            }
        }
        "draft" => {
            let [user_id, subject, to, body] = operands::<4>(name, rest)?;
            ParsedCommand::Draft {
                user_id: user_id.clone(),
                subject: subject.clone(),
                to: to.clone(),
                body: body.clone(),
            }
        }
        "patch-draft" => {
            let [user_id, message_id, subject, body] = operands::<4>(name, rest)?;
            ParsedCommand::PatchDraft {
                user_id: user_id.clone(),
                message_id: message_id.clone(),
                subject: subject.clone(),
                body: body.clone(),
            }
        }
        "reply" => {
            let [user_id, message_id] = operands::<2>(name, rest)?;
            ParsedCommand::Reply {
                user_id: user_id.clone(),
                message_id: message_id.clone(),
            }
        }
        "log-sent" => {
            let [user_id, message_id, original_reply, sent_content] = operands::<4>(name, rest)?;
            ParsedCommand::LogSent {
                user_id: user_id.clone(),
                message_id: message_id.clone(),
                original_reply: original_reply.clone(),
                sent_content: sent_content.clone(),
            }
        }
        "fine-tune" => {
            operands::<0>(name, rest)?;
            ParsedCommand::FineTune
        }
        "fine-tune-status" => {
            let [job_id] = operands::<1>(name, rest)?;
            ParsedCommand::FineTuneStatus {
                job_id: job_id.clone(),
            }
        }
        "preferences" => {
            let [user_id] = operands::<1>(name, rest)?;
            ParsedCommand::Preferences {
                user_id: user_id.clone(),
            }
        }
        "set-preferences" => {
            let [user_id, preferences] = operands::<2>(name, rest)?;
            ParsedCommand::SetPreferences {
                user_id: user_id.clone(),
                preferences: preferences.clone(),
            }
        }
        other => return Err(format!("Unknown command: {}", other)),
    };

    Ok(command)
}

/// Exactly `N` operands, or the command's usage line.
fn operands<'a, const N: usize>(name: &str, rest: &'a [String]) -> Result<&'a [String; N], String> {
    rest.try_into().map_err(|_| usage_error(name))
}

fn usage_error(name: &str) -> String {
    match available_commands().iter().find(|c| c.name == name) {
        Some(help) => format!("Usage: graphdraft {}", help.usage),
        None => format!("Unknown command: {}", name),
    }
}

/// Get all available commands for help display
pub fn available_commands() -> Vec<CommandHelp> {
    vec![
        CommandHelp {
            name: "init",
            usage: "init <tenant_id> <client_id>",
            description: "Write a configuration file for an app registration",
        },
        CommandHelp {
            name: "authorize",
            usage: "authorize",
            description: "Print the sign-in URL for delegated mailbox access",
        },
        CommandHelp {
            name: "login",
            usage: "login <code>",
            description: "Exchange an authorization code and store the tokens",
        },
        CommandHelp {
            name: "refresh",
            usage: "refresh <user_id> <refresh_token>",
            description: "Renew an access token with a refresh token",
        },
        CommandHelp {
            name: "message",
            usage: "message <user_id> <message_id>",
            description: "Show a message",
        },
        CommandHelp {
            name: "thread",
            usage: "thread <user_id> <conversation_id>",
            description: "Show the latest messages of a conversation",
        },
        CommandHelp {
            name: "draft",
            usage: "draft <user_id> <subject> <to> <body>",
            description: "Create a draft (comma-separated recipients)",
        },
        CommandHelp {
            name: "patch-draft",
            usage: "patch-draft <user_id> <message_id> <subject> <body>",
            description: "Update a draft's subject and body",
        },
        CommandHelp {
            name: "reply",
            usage: "reply <user_id> <message_id>",
            description: "Generate an AI reply to a message",
        },
        CommandHelp {
            name: "log-sent",
            usage: "log-sent <user_id> <message_id> <original> <sent>",
            description: "Record the reply that was actually sent",
        },
        CommandHelp {
            name: "fine-tune",
            usage: "fine-tune",
            description: "Train the reply model on logged sent replies",
        },
        CommandHelp {
            name: "fine-tune-status",
            usage: "fine-tune-status <job_id>",
            description: "Show the state of a fine-tuning job",
        },
        CommandHelp {
            name: "preferences",
            usage: "preferences <user_id>",
            description: "Show a user's preferences",
        },
        CommandHelp {
            name: "set-preferences",
            usage: "set-preferences <user_id> <json>",
            description: "Merge a JSON object into a user's preferences",
        },
        CommandHelp {
            name: "status",
            usage: "status",
            description: "Check configuration and credential storage",
        },
        CommandHelp {
            name: "help",
            usage: "help",
            description: "Show this help message",
        },
    ]
}
