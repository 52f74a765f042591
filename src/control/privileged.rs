//! Hook execution through su

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::{CommandOutput, HookRunner, run_captured};
use crate::error::ToolError;
use crate::template::ResolvedCommand;

pub struct SuRunner {
    program: String,
}

impl SuRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// `[--login <user>] --command <cmd>`.
///
/// `<cmd>` is the quoted executable followed by the raw argument string, which the
/// target user's shell splits.
pub fn su_args(command: &ResolvedCommand) -> Vec<String> {
    let mut line = shell_words::quote(&command.exec).into_owned();
    if !command.arguments.is_empty() {
        line.push(' ');
        line.push_str(&command.arguments);
    }

    let mut args = Vec::with_capacity(4);
    if let Some(user) = command.user.as_deref().filter(|u| !u.is_empty()) {
        args.extend(["--login".to_string(), user.to_string()]);
    }
    args.extend(["--command".to_string(), line]);
    args
}

impl HookRunner for SuRunner {
    fn run<'a>(
        &'a self,
        command: &'a ResolvedCommand,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<CommandOutput, ToolError>> {
        async move { run_captured(&self.program, &su_args(command), cancel).await }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_as_the_given_user() {
        let cmd = ResolvedCommand {
            exec: "/usr/local/bin/warmup".into(),
            arguments: "--pid 42".into(),
            user: Some("www-data".into()),
            group: None,
        };
        assert_eq!(
            su_args(&cmd),
            [
                "--login",
                "www-data",
                "--command",
                "/usr/local/bin/warmup --pid 42"
            ]
        );
    }

    #[test]
    fn without_user_only_the_command_is_passed() {
        let cmd = ResolvedCommand {
            exec: "/opt/it's here/run".into(),
            ..ResolvedCommand::default()
        };
        assert_eq!(su_args(&cmd), ["--command", r"'/opt/it'\''s here/run'"]);
    }

    #[tokio::test]
    async fn runner_reports_the_tool_output() {
        // echo stands in for su and prints what it was given.
        let runner = SuRunner::new("echo");
        let cmd = ResolvedCommand {
            exec: "hook".into(),
            arguments: "a b".into(),
            ..ResolvedCommand::default()
        };
        let out = runner.run(&cmd, &CancellationToken::new()).await.unwrap();
        assert_eq!(out.stdout, "--command hook a b");
    }
}
