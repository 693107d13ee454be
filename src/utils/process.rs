use std::{
    fs::File,
    io,
    path::PathBuf,
    process::{Child, Command, Stdio},
};

use anyhow::{Context, Result, anyhow, bail};

#[derive(Clone, Debug)]
pub enum StdioSpec {
    Inherit,
    Null,
    Pipe,
    /// Redirect to a file, created/truncated on spawn. Only meaningful
    /// for the stdout of a pipeline's last stage.
    ToFile(PathBuf),
}

impl StdioSpec {
    fn to_stdio(&self) -> io::Result<Stdio> {
        Ok(match self {
            StdioSpec::Inherit => Stdio::inherit(),
            StdioSpec::Null => Stdio::null(),
            StdioSpec::Pipe => Stdio::piped(),
            StdioSpec::ToFile(path) => Stdio::from(File::create(path)?),
        })
    }
}

#[derive(Clone, Debug)]
pub struct CmdSpec {
    program: String,
    args: Vec<String>,
    stdin: StdioSpec,
    stdout: StdioSpec,
    stderr: StdioSpec,
}

impl CmdSpec {
    #[must_use]
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: StdioSpec::Inherit,
            stdout: StdioSpec::Inherit,
            stderr: StdioSpec::Inherit,
        }
    }

    #[must_use]
    pub fn arg(mut self, a: impl Into<String>) -> Self {
        self.args.push(a.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(it.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn stdin(mut self, s: StdioSpec) -> Self {
        self.stdin = s;
        self
    }

    #[must_use]
    pub fn stdout(mut self, s: StdioSpec) -> Self {
        self.stdout = s;
        self
    }

    #[must_use]
    pub fn stderr(mut self, s: StdioSpec) -> Self {
        self.stderr = s;
        self
    }

    pub fn render(&self) -> String {
        let mut out = sh_quote(&self.program);
        for a in &self.args {
            out.push(' ');
            out.push_str(&sh_quote(a));
        }
        if let StdioSpec::ToFile(ref p) = self.stdout {
            out.push_str(" > ");
            out.push_str(&sh_quote(&p.display().to_string()));
        }
        out
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    pub cmds: Vec<CmdSpec>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { cmds: Vec::new() }
    }

    #[must_use]
    pub fn cmd(mut self, c: CmdSpec) -> Self {
        self.cmds.push(c);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    pub fn render(&self) -> String {
        self.cmds
            .iter()
            .map(|c| c.render())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

pub trait Runner: Send + Sync {
    /// Run the pipeline to completion; every stage must exit 0.
    fn run(&self, pipeline: &Pipeline) -> Result<()>;
    /// Run a single command and capture its stdout.
    fn run_capture(&self, pipeline: &Pipeline) -> Result<String>;
}

#[derive(Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Runner for ProcessRunner {
    fn run(&self, pipeline: &Pipeline) -> Result<()> {
        tracing::debug!("exec: {}", pipeline.render());

        if pipeline.is_empty() {
            bail!("empty pipeline");
        }
        let n = pipeline.len();

        let mut children: Vec<Child> = Vec::with_capacity(n);
        let mut prev_stdout: Option<Stdio> = None;

        for (i, spec) in pipeline.cmds.iter().enumerate() {
            let mut cmd = spec.to_command();

            if i == 0 {
                cmd.stdin(spec.stdin.to_stdio()?);
            } else {
                let stdin = prev_stdout
                    .take()
                    .ok_or_else(|| anyhow!("internal pipe error at stage {}", i))?;
                cmd.stdin(stdin);
            }

            if i == n - 1 {
                cmd.stdout(spec.stdout.to_stdio()?);
            } else {
                cmd.stdout(Stdio::piped());
            }

            cmd.stderr(spec.stderr.to_stdio()?);

            let mut child = cmd
                .spawn()
                .with_context(|| format!("spawn {}", spec.render()))?;

            prev_stdout = if i == n - 1 {
                None
            } else {
                Some(Stdio::from(child.stdout.take().ok_or_else(|| {
                    anyhow!("stdout piping not available at stage {}", i)
                })?))
            };

            children.push(child);
        }

        for (i, mut child) in children.into_iter().enumerate() {
            let status = child
                .wait()
                .with_context(|| format!("wait for stage {}: {}", i, pipeline.render()))?;
            if !status.success() {
                bail!("command failed: {} with {status}", pipeline.render());
            }
        }
        Ok(())
    }

    fn run_capture(&self, pipeline: &Pipeline) -> Result<String> {
        tracing::debug!("exec(capture): {}", pipeline.render());

        if pipeline.len() != 1 {
            bail!(
                "capture only works with single command, got {}",
                pipeline.len()
            );
        }
        let spec = &pipeline.cmds[0];
        let mut cmd = spec.to_command();

        cmd.stdout(Stdio::piped());
        cmd.stderr(spec.stderr.to_stdio()?);
        cmd.stdin(spec.stdin.to_stdio()?);

        let out = cmd
            .output()
            .with_context(|| format!("run {}", spec.render()))?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).to_string())
        } else {
            bail!("command failed: {} (status {})", spec.render(), out.status);
        }
    }
}

fn sh_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    if !s
        .bytes()
        .any(|b| b == b' ' || b == b'\'' || b == b'"' || b == b'\\')
    {
        return s.to_string();
    }
    let mut out = String::from("'");
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
