use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

use crate::engine::{Direction, TransferSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    session: remote::SshSession,
    path: String,
}

impl RemotePath {
    pub fn new(session: remote::SshSession, path: impl Into<String>) -> Self {
        let path = path.into();
        // "host:" names the remote home directory
        let path = if path.is_empty() { ".".to_string() } else { path };
        Self { session, path }
    }

    pub fn session(&self) -> &remote::SshSession {
        &self.session
    }

    /// Path on the remote host, verbatim; relative paths resolve against the remote home.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last component of the remote path, used when pulling into a directory.
    pub fn basename(&self) -> Option<&str> {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathType {
    Local(PathBuf),
    Remote(RemotePath),
}

/// Classifies a command line location: `[user@]host[:port]:path` is remote, anything else is
/// a local path.
pub fn parse_path(path: &str) -> anyhow::Result<PathType> {
    let re = regex::Regex::new(
        r"^(?:(?P<user>[^@/:]+)@)?(?P<host>\[[^\]]+\]|[^:\[\]/@]+)(?::(?P<port>\d+))?:(?P<path>.*)$",
    )?;
    let Some(captures) = re.captures(path) else {
        return Ok(PathType::Local(path.into()));
    };
    let user = captures.name("user").map(|m| m.as_str().to_string());
    let host = captures
        .name("host")
        .map(|m| m.as_str().trim_start_matches('[').trim_end_matches(']'))
        .context("remote location without a host")?
        .to_string();
    let port = captures
        .name("port")
        .map(|m| {
            m.as_str()
                .parse::<u16>()
                .with_context(|| format!("invalid port {:?} in {:?}", m.as_str(), path))
        })
        .transpose()?;
    let remote_path = captures.name("path").map_or("", |m| m.as_str());
    Ok(PathType::Remote(RemotePath::new(
        remote::SshSession { user, host, port },
        remote_path,
    )))
}

fn check_user(remote: &RemotePath, default_user: Option<&str>) -> anyhow::Result<()> {
    match (remote.session().user.as_deref(), default_user) {
        (Some(location_user), Some(user)) if location_user != user => Err(anyhow!(
            "user {:?} in {}:{} conflicts with --user {:?}",
            location_user,
            remote.session().host,
            remote.path(),
            user
        )),
        _ => Ok(()),
    }
}

/// Where a pulled file lands: into `<dir>/<remote basename>` when the destination is a
/// directory (or ends with '/'), at the destination itself otherwise.
pub fn resolve_pull_destination(
    local: &Path,
    remote: &RemotePath,
    multiple_sources: bool,
) -> anyhow::Result<PathBuf> {
    let into_directory = local.is_dir() || local.to_string_lossy().ends_with('/');
    if !into_directory {
        if multiple_sources {
            return Err(anyhow!(
                "destination {:?} must be an existing directory when copying multiple sources",
                local
            ));
        }
        return Ok(local.to_path_buf());
    }
    let name = remote.basename().ok_or_else(|| {
        anyhow!(
            "source {:?} does not have a basename to copy into {:?}",
            remote.path(),
            local
        )
    })?;
    Ok(local.join(name))
}

/// Turns the positional arguments into the ordered list of file transfers.
///
/// Exactly one side must be remote: either every source is local and the destination is
/// remote (push), or every source is remote and the destination is local (pull).
pub fn plan_transfers(
    sources: &[String],
    destination: &str,
    default_user: Option<&str>,
    rate_limit: u64,
) -> anyhow::Result<Vec<TransferSpec>> {
    if sources.is_empty() {
        return Err(anyhow!("at least one source and a destination are required"));
    }
    let sources = sources
        .iter()
        .map(|source| parse_path(source))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let multiple_sources = sources.len() > 1;
    match parse_path(destination)? {
        PathType::Remote(remote) => {
            check_user(&remote, default_user)?;
            sources
                .into_iter()
                .map(|source| -> anyhow::Result<TransferSpec> {
                    match source {
                        PathType::Local(local_path) => Ok(TransferSpec {
                            direction: Direction::Push,
                            local_path,
                            remote: remote.session().clone(),
                            remote_path: remote.path().to_string(),
                            rate_limit,
                        }),
                        PathType::Remote(source) => Err(anyhow!(
                            "both {}:{} and {}:{} are remote, one side must be local",
                            source.session(),
                            source.path(),
                            remote.session(),
                            remote.path()
                        )),
                    }
                })
                .collect()
        }
        PathType::Local(local) => sources
            .into_iter()
            .map(|source| -> anyhow::Result<TransferSpec> {
                match source {
                    PathType::Remote(source) => {
                        check_user(&source, default_user)?;
                        Ok(TransferSpec {
                            direction: Direction::Pull,
                            local_path: resolve_pull_destination(
                                &local,
                                &source,
                                multiple_sources,
                            )?,
                            remote: source.session().clone(),
                            remote_path: source.path().to_string(),
                            rate_limit,
                        })
                    }
                    PathType::Local(source) => Err(anyhow!(
                        "both {:?} and {:?} are local, one side must be remote",
                        source,
                        local
                    )),
                }
            })
            .collect(),
    }
}
