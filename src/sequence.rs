//! The convergence loop.
//!
//! One attempt sequence runs the tests, asks the provider for a new
//! implementation whenever they fail, writes and commits it, and repeats until
//! the tests pass. The attempt commits are then squashed into one.
//!
//! ```text
//! Idle ──start──▶ Running ──tests pass──▶ Committing ──▶ Done
//!                  │    ▲
//!                  └────┘ tests fail: patch, write, commit
//! ```

use colored::*;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{self, Patch, Section, SectionTracker};
use crate::prompt::{self, PatchContext};
use crate::provider::{CompletionProvider, CompletionRequest, Encoding};
use crate::runner::TestRunner;
use crate::state::{FinishType, SequenceState};
use crate::vcs::Git;

/// Exclusive right to run a sequence. Released on drop.
#[derive(Debug)]
pub struct InFlight {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Everything one working directory needs to run attempt sequences
pub struct Session {
    dir: PathBuf,
    config: Config,
    provider: Box<dyn CompletionProvider>,
    git: Git,
    runner: TestRunner,
    in_flight: Arc<AtomicBool>,
}

impl Session {
    pub fn new(dir: impl Into<PathBuf>, config: Config, provider: Box<dyn CompletionProvider>) -> Self {
        let dir = dir.into();
        Self {
            git: Git::new(&dir),
            runner: TestRunner::new(config.commands.test.clone()),
            dir,
            config,
            provider,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn test_path(&self) -> PathBuf {
        self.config.test_path(&self.dir)
    }

    fn implementation_path(&self) -> PathBuf {
        self.config.implementation_path(&self.dir)
    }

    /// Make sure the working directory is a usable repository.
    pub async fn prepare(&self) -> Result<()> {
        self.git.ensure_repo().await
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claim the session, or `None` if a sequence is already in flight.
    pub fn try_begin(&self) -> Option<InFlight> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight {
                flag: self.in_flight.clone(),
            })
    }

    /// Run one sequence if none is in flight.
    pub async fn run_if_idle(&self) -> Result<Option<SequenceState>> {
        match self.try_begin() {
            Some(slot) => self.run(slot).await.map(Some),
            None => Ok(None),
        }
    }

    /// Run one attempt sequence to completion.
    pub async fn run(&self, _slot: InFlight) -> Result<SequenceState> {
        let mut state = SequenceState::new();
        let boundary = self.git.current_revision().await?;
        info!(boundary = %boundary, "starting attempt sequence");
        state.start(boundary.clone());

        loop {
            let (test_source, implementation_source) = self.read_sources().await?;

            let outcome = self.runner.run(&self.dir).await?;
            state.record_test_run();

            if outcome.passed {
                println!("{}", "Tests pass".green().bold());
                break;
            }

            info!(exit_code = outcome.exit_code, "tests failed");
            if state.at_limit(self.config.looping.max_iterations) {
                println!("\n{}", "Max iterations reached".yellow());
                state.finish(FinishType::MaxIterations);
                return Ok(state);
            }

            state.start_iteration();
            println!(
                "{} {}",
                format!("Attempt {}", state.iteration).bold().cyan(),
                "─".repeat(30)
            );

            let log = self.git.log_since(&boundary).await?;
            let ctx = PatchContext {
                log: &log,
                test_file: &self.config.files.test,
                test_source: &test_source,
                implementation_file: &self.config.files.implementation,
                implementation_source: &implementation_source,
                test_output: &outcome.output,
            };
            let request = prompt::patch_request(self.provider.encoding(), &ctx);

            if self.streams() {
                self.patch_streaming(&request, &mut state).await?;
            } else {
                self.patch_whole(&request, &mut state).await?;
            }
        }

        state.begin_committing();
        self.squash(&boundary, &mut state).await?;
        state.finish(FinishType::Complete);
        Ok(state)
    }

    fn streams(&self) -> bool {
        self.config.provider.stream && self.provider.encoding() == Encoding::Sections
    }

    async fn read_sources(&self) -> Result<(String, String)> {
        let test_source = tokio::fs::read_to_string(self.test_path()).await?;
        let implementation_source = match tokio::fs::read_to_string(self.implementation_path()).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Ok((test_source, implementation_source))
    }

    /// Request a patch and apply it once the full response is in.
    async fn patch_whole(&self, request: &CompletionRequest, state: &mut SequenceState) -> Result<()> {
        let raw = self.provider.generate(request).await?;
        let parsed = match self.provider.encoding() {
            Encoding::Json => extract::parse_json_patch(&raw),
            Encoding::Sections => extract::parse_sections_patch(&raw),
        };
        let patch: Patch = parsed.map_err(|e| {
            dump_raw(&e);
            e
        })?;

        self.apply(Section::Plan, &patch.plan, state).await?;
        self.apply(Section::Code, &patch.code, state).await?;
        self.apply(Section::CommitMessage, &patch.commit_message, state).await
    }

    /// Request a patch and apply each section as soon as it completes.
    async fn patch_streaming(&self, request: &CompletionRequest, state: &mut SequenceState) -> Result<()> {
        let mut stream = self.provider.generate_stream(request).await?;
        let mut buffer = String::new();
        let mut tracker = SectionTracker::new();

        while let Some(chunk) = stream.next().await {
            buffer.push_str(&chunk?);
            for (section, text) in tracker.feed(&buffer) {
                self.apply(section, &text, state).await?;
            }
        }

        let missing = tracker.missing();
        if missing.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = missing.iter().map(|s| format!("<{}>", s)).collect();
        let err = Error::malformed(
            format!("response ended without {} section(s)", names.join(", ")),
            buffer,
        );
        dump_raw(&err);
        Err(err)
    }

    async fn apply(&self, section: Section, text: &str, state: &mut SequenceState) -> Result<()> {
        match section {
            Section::Plan => {
                println!("  {} {}", "Plan:".dimmed(), text.trim_end());
            }
            Section::Code => {
                let code = extract::strip_code_fence(text);
                let path = self.implementation_path();
                tokio::fs::write(&path, code).await?;
                debug!(path = %path.display(), "wrote implementation");
                println!("  {} {}", "Wrote".dimmed(), self.config.files.implementation.yellow());
            }
            Section::CommitMessage => {
                let message = text.trim();
                self.git.commit_all(message).await?;
                state.record_commit();
                println!("  {} {}", "Commit:".dimmed(), message.green());
            }
        }
        Ok(())
    }

    /// Collapse the attempt commits since `boundary` into one.
    async fn squash(&self, boundary: &str, state: &mut SequenceState) -> Result<()> {
        let log = self.git.log_since(boundary).await?;
        if log.trim().is_empty() {
            debug!("nothing to squash");
            return Ok(());
        }

        let count = self.git.count_commits_since(boundary).await?;
        match self.summarize(&log).await {
            Ok(message) => {
                self.git.squash(boundary, &message).await?;
                state.squashed = true;
                info!(commits = count, "squashed attempt commits");
                println!(
                    "  {} {}",
                    format!("Squashed {} commit(s):", count).dimmed(),
                    message.lines().next().unwrap_or_default().green()
                );
            }
            Err(e) => {
                warn!(error = %e, "leaving attempt commits unsquashed");
                println!(
                    "{}",
                    format!("Could not summarize; leaving {} commit(s) unsquashed", count).yellow()
                );
            }
        }
        Ok(())
    }

    async fn summarize(&self, log: &str) -> Result<String> {
        let request = prompt::summary_request(self.provider.encoding(), log);
        let raw = self
            .provider
            .generate(&request)
            .await
            .map_err(|e| Error::Summarization(e.to_string()))?;

        let summary = match self.provider.encoding() {
            Encoding::Json => extract::parse_json_summary(&raw),
            Encoding::Sections => extract::parse_sections_summary(&raw),
        }
        .map_err(|e| Error::Summarization(e.to_string()))?;

        let message = summary.commit_message.trim();
        if message.is_empty() {
            return Err(Error::Summarization("empty commit message".to_string()));
        }
        Ok(message.to_string())
    }
}

/// Raw provider text is only shown when it could not be parsed.
fn dump_raw(err: &Error) {
    if let Error::MalformedResponse { reason, raw } = err {
        eprintln!("{} {}", "Could not parse response:".red(), reason);
        eprintln!("{}", raw.dimmed());
    }
}

/// Print the end-of-sequence summary block
pub fn print_summary(state: &SequenceState) {
    println!();
    println!("{}", "Summary".bold());
    println!("{}", "─".repeat(40));
    println!("  Test runs:  {}", state.test_runs.to_string().cyan());
    println!("  Attempts:   {}", state.iteration.to_string().cyan());
    println!("  Commits:    {}", state.commits_created.to_string().cyan());
    println!("  Squashed:   {}", if state.squashed { "yes".green() } else { "no".dimmed() });
    println!("  Duration:   {}s", state.duration.to_string().cyan());
    if let Some(finish) = &state.finish_type {
        println!("  Finished:   {}", finish.to_string().yellow());
    }
}
