//! Admin command dispatch. The SSH front end hands us its command
//! vector verbatim; every mutating command is a dry run unless
//! `--write` is present.

use crate::error::{Error, Result};
use crate::project::{OpReport, ProjectService};
use crate::types::{Project, User};

/// Where command output goes. The SSH layer adapts its session to
/// this; tests capture the lines.
pub trait Session: Send {
    fn output(&mut self, line: &str);
    fn error_line(&mut self, line: &str);
}

/// Plain stdout/stderr session for `plinth exec`.
#[derive(Default)]
pub struct StdSession;

impl Session for StdSession {
    fn output(&mut self, line: &str) {
        println!("{line}");
    }

    fn error_line(&mut self, line: &str) {
        eprintln!("{line}");
    }
}

/// Captures output for assertions.
#[derive(Default)]
pub struct BufferSession {
    pub out: Vec<String>,
    pub err: Vec<String>,
}

impl Session for BufferSession {
    fn output(&mut self, line: &str) {
        self.out.push(line.to_string());
    }

    fn error_line(&mut self, line: &str) {
        self.err.push(line.to_string());
    }
}

struct Flags {
    write: bool,
    to: Option<String>,
    keep: Option<usize>,
}

fn parse_flags(args: &[String]) -> Result<Flags> {
    let mut flags = Flags {
        write: false,
        to: None,
        keep: None,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--write" => flags.write = true,
            "--to" => {
                flags.to = Some(
                    iter.next()
                        .ok_or_else(|| Error::validation("`--to` requires a value"))?
                        .clone(),
                );
            }
            "-n" => {
                let value = iter
                    .next()
                    .ok_or_else(|| Error::validation("`-n` requires a value"))?;
                flags.keep = Some(
                    value
                        .parse()
                        .map_err(|_| Error::validation(format!("bad `-n` value: {value}")))?,
                );
            }
            other => return Err(Error::validation(format!("unknown flag: {other}"))),
        }
    }
    Ok(flags)
}

const HELP: &str = "\
Commands: [help, ls, rm, link, unlink, prune, retain, depends, cache, cache-all]
NOTICE: *must* append with `--write` for the changes to persist.

  help                          prints this screen
  ls                            lists projects
  rm projA                      delete projA
  link projA --to projB         symbolic link `projA` to `projB`
  unlink projA                  removes symbolic link for `projA`
  prune prefix                  removes projects matching `prefix` without dependents
  retain prefix -n N            alias to `prune` but keeps newest N projects
  depends projA                 lists all projects linked to `projA`
  cache projA                   clear http cache for `projA`
  cache-all                     clear http cache for all sites (admin)";

/// Runs one admin command; returns the process exit code.
pub async fn dispatch(
    service: &ProjectService,
    user: &User,
    args: &[String],
    sesh: &mut dyn Session,
) -> i32 {
    match run(service, user, args, sesh).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(user = %user.name, err = %err, "command failed");
            sesh.error_line(&err.to_string());
            1
        }
    }
}

async fn run(
    service: &ProjectService,
    user: &User,
    args: &[String],
    sesh: &mut dyn Session,
) -> Result<()> {
    let Some(cmd) = args.first() else {
        sesh.output(HELP);
        return Ok(());
    };

    match cmd.as_str() {
        "help" => {
            sesh.output(HELP);
            Ok(())
        }
        "ls" => ls(service, user, sesh),
        "cache-all" => {
            let flags = parse_flags(&args[1..])?;
            sesh.output("clearing http cache for all sites");
            service.cache_all(user, flags.write)?;
            notice(sesh, flags.write);
            Ok(())
        }
        "rm" | "link" | "unlink" | "prune" | "retain" | "depends" | "cache" => {
            let project_name = args
                .get(1)
                .filter(|a| !a.starts_with('-'))
                .ok_or_else(|| Error::validation(format!("`{cmd}` requires a project name")))?
                .clone();
            let flags = parse_flags(&args[2..])?;
            project_command(service, user, cmd, &project_name, flags, sesh).await
        }
        other => Err(Error::validation(format!("unknown command: {other}"))),
    }
}

async fn project_command(
    service: &ProjectService,
    user: &User,
    cmd: &str,
    project_name: &str,
    flags: Flags,
    sesh: &mut dyn Session,
) -> Result<()> {
    match cmd {
        "rm" => {
            let report = service.rm(user, project_name, flags.write).await?;
            if report.removed_projects.is_empty() {
                sesh.output(&format!(
                    "({project_name}) project record not found for user ({})",
                    user.name
                ));
            } else {
                sesh.output(&format!("({project_name}) removing"));
            }
            narrate_assets(sesh, project_name, &report);
            notice(sesh, flags.write);
        }
        "link" => {
            let to = flags
                .to
                .ok_or_else(|| Error::validation("must provide `--to` flag"))?;
            let report = service.link(user, project_name, &to, flags.write).await?;
            sesh.output(&format!(
                "({project_name}) might have orphaned assets, removing"
            ));
            narrate_assets(sesh, project_name, &report);
            sesh.output(&format!("({project_name}) now points to ({to})"));
            notice(sesh, flags.write);
        }
        "unlink" => {
            service.unlink(user, project_name, flags.write)?;
            sesh.output(&format!("({project_name}) unlinked"));
            notice(sesh, flags.write);
        }
        "prune" | "retain" => {
            let keep = if cmd == "retain" {
                flags.keep.unwrap_or(3)
            } else {
                flags.keep.unwrap_or(0)
            };
            sesh.output(&format!(
                "searching for projects that match prefix ({project_name}) and are not linked to other projects"
            ));
            let report = service.prune(user, project_name, keep, flags.write).await?;
            for (name, links) in &report.skipped_dependents {
                sesh.output(&format!(
                    "project ({name}) has ({links}) projects linked to it, cannot prune"
                ));
            }
            for name in &report.removed_projects {
                sesh.output(&format!("project ({name}) is available to be pruned"));
                narrate_assets(sesh, name, &report);
                sesh.output(&format!("({name}) removing"));
            }
            sesh.output("\nsummary");
            sesh.output("=======");
            for name in &report.removed_projects {
                sesh.output(&format!("project ({name}) removed"));
            }
            notice(sesh, flags.write);
        }
        "depends" => {
            let links = service.depends(user, project_name)?;
            if links.is_empty() {
                sesh.output(&format!("no projects linked to ({project_name})"));
            } else {
                project_table(sesh, &links);
            }
        }
        "cache" => {
            sesh.output(&format!("clearing http cache for {project_name}"));
            service.cache(user, project_name, flags.write)?;
            notice(sesh, flags.write);
        }
        _ => unreachable!("caller matched the command"),
    }
    Ok(())
}

fn ls(service: &ProjectService, user: &User, sesh: &mut dyn Session) -> Result<()> {
    let projects = service.store.find_projects_by_user(&user.id)?;
    if projects.is_empty() {
        sesh.output("no projects found");
        return Ok(());
    }
    project_table(sesh, &projects);
    Ok(())
}

fn project_table(sesh: &mut dyn Session, projects: &[Project]) {
    sesh.output(&format!(
        "{:<24} {:<20} {:<24} {}",
        "Name", "Last Updated", "Links To", "Blocked"
    ));
    for project in projects {
        let links = if project.is_link() {
            project.project_dir.as_str()
        } else {
            ""
        };
        sesh.output(&format!(
            "{:<24} {:<20} {:<24} {}",
            project.name,
            project.updated_at.format("%Y-%m-%d %H:%M:%S"),
            links,
            project.blocked,
        ));
    }
}

/// Per-project asset lines out of a batch report.
fn narrate_assets(sesh: &mut dyn Session, project_name: &str, report: &OpReport) {
    let prefix = format!("{project_name}/");
    let assets: Vec<&String> = report
        .removed_assets
        .iter()
        .filter(|key| key.starts_with(&prefix))
        .collect();
    if assets.is_empty() {
        sesh.output(&format!("no assets found for project ({project_name})"));
        return;
    }
    sesh.output(&format!(
        "found ({}) assets for project ({project_name}), removing",
        assets.len()
    ));
    for key in assets {
        sesh.output(&format!("deleted ({key})"));
    }
}

fn notice(sesh: &mut dyn Session, write: bool) {
    if !write {
        sesh.output("\nNOTICE: changes not committed, use `--write` to save operation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args: Vec<String> = ["--write", "--to", "v1", "-n", "2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let flags = parse_flags(&args).unwrap();
        assert!(flags.write);
        assert_eq!(flags.to.as_deref(), Some("v1"));
        assert_eq!(flags.keep, Some(2));
    }

    #[test]
    fn test_parse_flags_rejects_unknown() {
        let args = vec!["--force".to_string()];
        assert!(parse_flags(&args).is_err());
        let args = vec!["--to".to_string()];
        assert!(parse_flags(&args).is_err());
        let args = vec!["-n".to_string(), "x".to_string()];
        assert!(parse_flags(&args).is_err());
    }
}
