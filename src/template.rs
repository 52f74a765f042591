//! Placeholder substitution for command templates.
//!
//! Load-time markers are `{socket}`, `{address}`, `{user}`, `{group}` and
//! `{pidFile}`. `{pid}` is only known once the daemon is up, so it is replaced in
//! a separate pass right before a hook runs.

use std::path::Path;

use crate::config::CommandTemplate;

/// Values available when a template is resolved at load time.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub address: &'a str,
    pub user: Option<&'a str>,
    pub group: Option<&'a str>,
    pub pid_file: &'a Path,
}

/// A command with every load-time placeholder substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub exec: String,
    pub arguments: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl ResolvedCommand {
    /// Second pass: substitute `{pid}`. Without a pid the marker is left as is.
    pub fn with_pid(&self, pid: Option<i32>) -> Self {
        Self {
            exec: substitute_pid(&self.exec, pid),
            arguments: substitute_pid(&self.arguments, pid),
            user: self.user.clone(),
            group: self.group.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exec.trim().is_empty()
    }

    /// `exec args` as it would read on a command line, for log messages.
    pub fn display(&self) -> String {
        if self.arguments.is_empty() {
            self.exec.clone()
        } else {
            format!("{} {}", self.exec, self.arguments)
        }
    }
}

/// Replace the load-time markers in `value`. An empty value resolves to `None`.
pub fn substitute(value: &str, ctx: &TemplateContext<'_>) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    let pid_file = ctx.pid_file.display().to_string();
    Some(
        value
            .replace("{socket}", ctx.address)
            .replace("{address}", ctx.address)
            .replace("{user}", ctx.user.unwrap_or_default())
            .replace("{group}", ctx.group.unwrap_or_default())
            .replace("{pidFile}", &pid_file),
    )
}

pub fn substitute_pid(value: &str, pid: Option<i32>) -> String {
    match pid {
        Some(pid) => value.replace("{pid}", &pid.to_string()),
        None => value.to_string(),
    }
}

fn is_web_url(exec: &str) -> bool {
    let lower = exec.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Turn a `http(s)://` "executable" into a call of the fetch tool.
pub fn rewrite_web(template: &CommandTemplate, fetch_tool: &str) -> CommandTemplate {
    if !is_web_url(&template.exec) {
        return template.clone();
    }
    let url = template.exec.trim();
    let arguments = if template.arguments.is_empty() {
        format!("-q -S -O- {url}")
    } else {
        format!("{} {url}", template.arguments)
    };
    CommandTemplate {
        exec: fetch_tool.to_string(),
        arguments,
        user: template.user.clone(),
        group: template.group.clone(),
    }
}

/// Resolve the load-time markers of a template using its own credentials.
///
/// Returns `None` for an empty executable, which means "no command".
pub fn resolve(
    template: &CommandTemplate,
    address: &str,
    pid_file: &Path,
) -> Option<ResolvedCommand> {
    let ctx = TemplateContext {
        address,
        user: template.user.as_deref(),
        group: template.group.as_deref(),
        pid_file,
    };
    Some(ResolvedCommand {
        exec: substitute(&template.exec, &ctx)?,
        arguments: substitute(&template.arguments, &ctx).unwrap_or_default(),
        user: template.user.clone(),
        group: template.group.clone(),
    })
}

/// Resolve a hook: web URLs become fetch-tool calls, then markers are substituted.
pub fn resolve_hook(
    template: Option<&CommandTemplate>,
    address: &str,
    pid_file: &Path,
    fetch_tool: &str,
) -> Option<ResolvedCommand> {
    let template = rewrite_web(template?, fetch_tool);
    resolve(&template, address, pid_file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pid_file: &Path) -> TemplateContext<'_> {
        TemplateContext {
            address: "unix:/tmp/a.socket",
            user: Some("www-data"),
            group: Some("www"),
            pid_file,
        }
    }

    #[test]
    fn every_load_time_marker_is_replaced() {
        let pid_file = Path::new("/tmp/a.socket.pid");
        let out = substitute(
            "-b {socket} -a {address} -u {user}:{group} -p {pidFile} -x {pid}",
            &ctx(pid_file),
        )
        .unwrap();
        assert_eq!(
            out,
            "-b unix:/tmp/a.socket -a unix:/tmp/a.socket -u www-data:www -p /tmp/a.socket.pid -x {pid}"
        );
    }

    #[test]
    fn resolution_is_repeatable() {
        let pid_file = Path::new("/tmp/x.pid");
        let first = substitute("{address} {user}", &ctx(pid_file));
        let second = substitute("{address} {user}", &ctx(pid_file));
        assert_eq!(first, second);
    }

    #[test]
    fn empty_template_resolves_to_nothing() {
        assert_eq!(substitute("", &ctx(Path::new("/tmp/x.pid"))), None);
        assert_eq!(
            resolve_hook(
                Some(&CommandTemplate::default()),
                "127.0.0.1:9000",
                Path::new("/tmp/x.pid"),
                "wget"
            ),
            None
        );
        assert_eq!(
            resolve_hook(None, "127.0.0.1:9000", Path::new("/tmp/x.pid"), "wget"),
            None
        );
    }

    #[test]
    fn pid_pass_touches_only_the_pid_marker() {
        let cmd = ResolvedCommand {
            exec: "/bin/kill".into(),
            arguments: "-USR1 {pid} {socket}".into(),
            user: None,
            group: None,
        };
        assert_eq!(cmd.with_pid(Some(4242)).arguments, "-USR1 4242 {socket}");
        assert_eq!(cmd.with_pid(None), cmd);
    }

    #[test]
    fn web_hook_becomes_a_fetch_call() {
        let hook = CommandTemplate::inline("https://example.com/health");
        let resolved = resolve_hook(
            Some(&hook),
            "unix:/tmp/a.socket",
            Path::new("/tmp/a.socket.pid"),
            "wget",
        )
        .unwrap();
        assert_eq!(resolved.exec, "wget");
        assert_eq!(resolved.arguments, "-q -S -O- https://example.com/health");
    }

    #[test]
    fn web_hook_keeps_custom_arguments() {
        let hook = CommandTemplate {
            exec: "HTTP://example.com/warm?sock={socket}".into(),
            arguments: "--timeout=2 -O-".into(),
            ..CommandTemplate::default()
        };
        let rewritten = rewrite_web(&hook, "/usr/bin/wget");
        assert_eq!(rewritten.exec, "/usr/bin/wget");
        assert_eq!(
            rewritten.arguments,
            "--timeout=2 -O- HTTP://example.com/warm?sock={socket}"
        );

        let resolved = resolve(&rewritten, "unix:/tmp/a.socket", Path::new("/tmp/p")).unwrap();
        assert!(resolved.arguments.ends_with("sock=unix:/tmp/a.socket"));
    }

    #[test]
    fn credentials_come_from_the_template() {
        let template = CommandTemplate {
            exec: "/usr/bin/php-cgi".into(),
            arguments: "-b {socket} --as {user}".into(),
            user: Some("blog".into()),
            group: None,
        };
        let resolved = resolve(&template, "127.0.0.1:9000", Path::new("/tmp/p.pid")).unwrap();
        assert_eq!(resolved.arguments, "-b 127.0.0.1:9000 --as blog");
        assert_eq!(resolved.user.as_deref(), Some("blog"));
        assert_eq!(resolved.display(), "/usr/bin/php-cgi -b 127.0.0.1:9000 --as blog");
    }
}
