// Azure Pipelines logging commands.
// Writes the `##vso[...]` lines the build agent parses out of task output.

use std::io::{self, Write};

/// Writer for build-log commands.
pub struct BuildLog<W: Write> {
    out: W,
}

impl BuildLog<io::Stdout> {
    /// Build log on the process stdout, where the agent reads commands.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> BuildLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Add a tag to the current build.
    pub fn add_build_tag(&mut self, tag: &str) -> io::Result<()> {
        writeln!(self.out, "##vso[build.addbuildtag]{}", tag)
    }

    /// Mark the current task as failed.
    pub fn task_failed(&mut self) -> io::Result<()> {
        writeln!(self.out, "##vso[task.complete result=Failed;]")
    }

    /// Tag the build and fail the task.
    pub fn fail(&mut self, tag: &str) -> io::Result<()> {
        self.add_build_tag(tag)?;
        self.task_failed()?;
        self.out.flush()
    }

    /// Write a diagnostic line without a command prefix.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{}", text)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
