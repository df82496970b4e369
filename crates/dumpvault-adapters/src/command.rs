// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dump producer and archiver that shell out to configured programs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use dumpvault_core::collab::{ArchiveError, Archiver, DumpError, DumpProducer};
use dumpvault_core::config::{CommandSpec, DataSource};
use tokio::process::Command;
use tracing::debug;

/// Longest stderr tail kept in error values.
const STDERR_TAIL_BYTES: usize = 2048;

/// Replace every `{key}` in `template` with its value in one left-to-right pass.
///
/// Substituted text is never scanned again, so values may contain brace tokens.
/// Unknown `{...}` tokens are copied through unchanged.
fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let hit = tail.find('}').and_then(|close| {
            let key = &tail[1..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (close, *value))
        });
        match hit {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Last [`STDERR_TAIL_BYTES`] of `stderr`, lossily decoded and trimmed.
fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_owned()
}

fn command(spec: &CommandSpec) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.stdin(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Runs [`CommandSpec`] once per data source, stdout into the dump file.
///
/// Placeholders: `{host}`, `{user}`, `{password}`, `{source}`.
#[derive(Debug, Clone)]
pub struct CommandDumper {
    spec: CommandSpec,
    source: DataSource,
}

impl CommandDumper {
    /// Dumper connecting to `source` with `spec`.
    pub fn new(spec: CommandSpec, source: DataSource) -> Self {
        Self { spec, source }
    }
}

impl DumpProducer for CommandDumper {
    async fn dump(&self, source: &str, out: &Path) -> Result<(), DumpError> {
        let vars = [
            ("host", self.source.host.as_str()),
            ("user", self.source.credentials.user.as_str()),
            ("password", self.source.credentials.password.as_str()),
            ("source", source),
        ];
        let io = |e| DumpError::Io {
            path: out.to_path_buf(),
            source: e,
        };
        let file = tokio::fs::File::create(out).await.map_err(io)?.into_std().await;

        let mut cmd = command(&self.spec);
        cmd.args(self.spec.args.iter().map(|a| render(a, &vars)))
            .envs(self.spec.env.iter().map(|(k, v)| (k, render(v, &vars))))
            .stdout(Stdio::from(file));
        debug!(program = %self.spec.program, source, "spawning dumper");

        let spawn = |e| DumpError::Spawn {
            name: source.to_owned(),
            source: e,
        };
        let Output { status, stderr, .. } = cmd
            .spawn()
            .map_err(spawn)?
            .wait_with_output()
            .await
            .map_err(spawn)?;
        if status.success() {
            Ok(())
        } else {
            Err(DumpError::Failed {
                name: source.to_owned(),
                status: status.to_string(),
                stderr: stderr_tail(&stderr),
            })
        }
    }
}

/// Runs [`CommandSpec`] once to bundle every dump.
///
/// Placeholders: `{archive}`; an argument that is exactly `{inputs}` expands to one
/// argument per input file.
#[derive(Debug, Clone)]
pub struct CommandArchiver {
    spec: CommandSpec,
}

impl CommandArchiver {
    /// Archiver running `spec`.
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    fn args(&self, inputs: &[PathBuf], archive: &Path) -> Vec<OsString> {
        let archive_str = archive.to_string_lossy();
        let mut args = Vec::with_capacity(self.spec.args.len() + inputs.len());
        for template in &self.spec.args {
            match template.as_str() {
                "{inputs}" => args.extend(inputs.iter().map(|p| p.as_os_str().to_owned())),
                "{archive}" => args.push(archive.as_os_str().to_owned()),
                other => args.push(render(other, &[("archive", archive_str.as_ref())]).into()),
            }
        }
        args
    }
}

impl Archiver for CommandArchiver {
    async fn package(&self, inputs: &[PathBuf], archive: &Path) -> Result<(), ArchiveError> {
        let mut cmd = command(&self.spec);
        cmd.args(self.args(inputs, archive))
            .envs(&self.spec.env)
            .stdout(Stdio::null());
        debug!(program = %self.spec.program, inputs = inputs.len(), "spawning archiver");

        let spawn = |e| ArchiveError::Spawn {
            program: self.spec.program.clone(),
            source: e,
        };
        let Output { status, stderr, .. } = cmd
            .spawn()
            .map_err(spawn)?
            .wait_with_output()
            .await
            .map_err(spawn)?;
        if !status.success() {
            return Err(ArchiveError::Failed {
                status: status.to_string(),
                stderr: stderr_tail(&stderr),
            });
        }
        match tokio::fs::try_exists(archive).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ArchiveError::Missing(archive.to_path_buf())),
            Err(source) => Err(ArchiveError::Io {
                path: archive.to_path_buf(),
                source,
            }),
        }
    }
}
