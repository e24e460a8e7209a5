//! Interactive dispatch loop.
//!
//! Lists the registry, reads a selection and input from an [`InputSource`],
//! and routes them to the chosen extension. Every invocation failure is
//! reported on the output and the loop continues.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};

use pluginhost_sdk::{ExtensionError, ExtensionResult};

use crate::config::DispatchConfig;
use crate::error::SelectionError;
use crate::registry::{RegisteredExtension, Registry};

/// Console banner printed at startup.
pub const BANNER: &str = "Plugin Host";

/// A source of operator input lines.
pub trait InputSource {
    /// Next line without its terminator, or `None` at end of input.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Reads lines from stdin.
///
/// The stdin lock is taken per line and released between prompts, so an
/// extension running inside the loop can read stdin itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleInput;

impl InputSource for ConsoleInput {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Fixed list of lines, for tests and scripted sessions.
#[derive(Debug, Default, Clone)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl InputSource for ScriptedInput {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.lines.pop_front())
    }
}

/// Dispatch loop state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Listing,
    AwaitingSelection,
    /// Zero-based position of the selected extension.
    AwaitingInput(usize),
    Invoking { position: usize, input: String },
    Terminated,
}

/// Counters for one loop run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub invocations: usize,
    pub failures: usize,
    pub invalid_selections: usize,
}

/// Parse a one-based selection against `count` listed extensions.
pub fn parse_selection(input: &str, count: usize) -> Result<usize, SelectionError> {
    let selected: usize = input
        .trim()
        .parse()
        .map_err(|_| SelectionError::NotANumber(input.to_string()))?;
    if selected == 0 || selected > count {
        return Err(SelectionError::OutOfRange { selected, count });
    }
    Ok(selected - 1)
}

/// Write the startup banner.
pub fn write_banner(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", BANNER)?;
    writeln!(out, "{}\n", "=".repeat(BANNER.len()))
}

/// Interactive loop over a composed registry.
pub struct DispatchLoop<'a, I, W> {
    registry: &'a Registry,
    input: I,
    output: W,
    config: DispatchConfig,
    state: DispatchState,
    summary: DispatchSummary,
}

impl<'a, I: InputSource, W: Write> DispatchLoop<'a, I, W> {
    pub fn new(registry: &'a Registry, input: I, output: W) -> Self {
        Self::with_config(registry, input, output, DispatchConfig::default())
    }

    pub fn with_config(registry: &'a Registry, input: I, output: W, config: DispatchConfig) -> Self {
        Self {
            registry,
            input,
            output,
            config,
            state: DispatchState::Listing,
            summary: DispatchSummary::default(),
        }
    }

    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    /// Run until the operator quits or input ends.
    pub fn run(mut self) -> io::Result<(DispatchSummary, W)> {
        while self.state != DispatchState::Terminated {
            self.step()?;
        }
        self.output.flush()?;
        Ok((self.summary, self.output))
    }

    /// Advance by one transition.
    pub fn step(&mut self) -> io::Result<()> {
        let state = std::mem::replace(&mut self.state, DispatchState::Terminated);
        self.state = match state {
            DispatchState::Listing => self.list()?,
            DispatchState::AwaitingSelection => self.await_selection()?,
            DispatchState::AwaitingInput(position) => self.await_input(position)?,
            DispatchState::Invoking { position, input } => self.invoke(position, &input)?,
            DispatchState::Terminated => DispatchState::Terminated,
        };
        Ok(())
    }

    fn list(&mut self) -> io::Result<DispatchState> {
        if self.registry.is_empty() {
            writeln!(self.output, "No plugins were found.")?;
            return Ok(DispatchState::Terminated);
        }

        writeln!(self.output, "Available plugins:")?;
        for (i, ext) in self.registry.iter().enumerate() {
            writeln!(self.output, "{}. {}", i + 1, ext.descriptor)?;
        }
        Ok(DispatchState::AwaitingSelection)
    }

    fn await_selection(&mut self) -> io::Result<DispatchState> {
        writeln!(
            self.output,
            "\nEnter plugin number (or '{}' to quit): ",
            self.config.quit_token
        )?;
        self.output.flush()?;

        let line = match self.input.read_line()? {
            Some(line) => line,
            None => return Ok(DispatchState::Terminated),
        };
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case(&self.config.quit_token) {
            return Ok(DispatchState::Terminated);
        }

        match parse_selection(line, self.registry.len())
            .map(|position| (position, self.registry.get(position)))
        {
            Ok((position, Some(ext))) => {
                writeln!(self.output, "\nSelected plugin: {}", ext.descriptor)?;
                if ext.descriptor.streaming {
                    Ok(DispatchState::Invoking {
                        position,
                        input: self.config.streaming_trigger.clone(),
                    })
                } else {
                    Ok(DispatchState::AwaitingInput(position))
                }
            }
            Ok((_, None)) => self.reject_selection(),
            Err(e) => {
                tracing::debug!("Rejected selection: {}", e);
                self.reject_selection()
            }
        }
    }

    fn reject_selection(&mut self) -> io::Result<DispatchState> {
        self.summary.invalid_selections += 1;
        writeln!(self.output, "Invalid selection.")?;
        Ok(DispatchState::AwaitingSelection)
    }

    fn await_input(&mut self, position: usize) -> io::Result<DispatchState> {
        writeln!(self.output, "Enter text to process (or empty line to cancel): ")?;
        self.output.flush()?;

        match self.input.read_line()? {
            None => Ok(DispatchState::Terminated),
            Some(text) if text.trim().is_empty() => Ok(DispatchState::AwaitingSelection),
            Some(text) => Ok(DispatchState::Invoking {
                position,
                input: text,
            }),
        }
    }

    fn invoke(&mut self, position: usize, input: &str) -> io::Result<DispatchState> {
        let registry = self.registry;
        let Some(ext) = registry.get(position) else {
            return Ok(DispatchState::AwaitingSelection);
        };
        self.summary.invocations += 1;

        match execute_isolated(ext, input) {
            Ok(result) => writeln!(self.output, "\nResult: {}", result)?,
            Err(e) => {
                self.summary.failures += 1;
                tracing::debug!("{} failed: {}", ext.descriptor.identity, e);
                writeln!(self.output, "Error executing plugin: {}", e)?;
            }
        }
        Ok(DispatchState::AwaitingSelection)
    }
}

/// Run `execute`, turning a panic into an error.
pub fn execute_isolated(ext: &RegisteredExtension, input: &str) -> ExtensionResult<String> {
    catch_unwind(AssertUnwindSafe(|| ext.instance.execute(input)))
        .unwrap_or_else(|payload| Err(ExtensionError::from_panic(payload.as_ref())))
}
