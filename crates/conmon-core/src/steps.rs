//! Navigation step machine.
//!
//! A program is an ordered list of steps that only grows. Steps run one at a
//! time; a running step may append or splice new steps, jump to a label, or
//! request a page load, which blocks ticking until the driver loop settles it.

use std::fmt::{self, Write};

use tokio::time::{MissedTickBehavior, interval, timeout};

use crate::controller::EngineSettings;
use crate::error::AppError;
use crate::traits::PageDriver;

/// A step action. Receives the machine (to extend the program, jump, or open
/// pages) and the caller's context.
pub type Action<C> = Box<dyn FnMut(&mut StepMachine<C>, &mut C) -> Result<(), AppError> + Send>;

/// Outcome of a single [`StepMachine::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// One step ran.
    Ran,
    /// A page request is outstanding; nothing ran.
    Blocked,
    /// The pointer is past the end of the program.
    Complete,
}

/// The most recently loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub html: String,
}

/// One unit of the program.
pub struct Step<C> {
    /// `None` only while the action is running.
    action: Option<Action<C>>,
    level: usize,
    label: Option<String>,
    executed: bool,
}

impl<C> Step<C> {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn executed(&self) -> bool {
        self.executed
    }
}

pub struct StepMachine<C> {
    steps: Vec<Step<C>>,
    pointer: usize,
    current: Option<usize>,
    running: bool,
    blocked: bool,
    pending: Option<String>,
    page: Option<Page>,
}

impl<C> Default for StepMachine<C> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            pointer: 0,
            current: None,
            running: false,
            blocked: false,
            pending: None,
            page: None,
        }
    }
}

impl<C> StepMachine<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a level-0 step at the end of the program.
    pub fn append<F>(&mut self, action: F)
    where
        F: FnMut(&mut StepMachine<C>, &mut C) -> Result<(), AppError> + Send + 'static,
    {
        self.steps.push(Step {
            action: Some(Box::new(action)),
            level: 0,
            label: None,
            executed: false,
        });
    }

    /// Add a child of the current step, after any children it already
    /// inserted. Does nothing when the current step has already executed,
    /// so a step revisited through a jump cannot insert its children twice.
    pub fn insert_after_current<F>(&mut self, action: F)
    where
        F: FnMut(&mut StepMachine<C>, &mut C) -> Result<(), AppError> + Send + 'static,
    {
        let Some(current) = self.current else {
            self.append(action);
            return;
        };
        if self.steps[current].executed {
            tracing::debug!(step = current + 1, "Step already executed, not inserting");
            return;
        }

        let level = self.steps[current].level + 1;
        let mut at = self.pointer;
        while at < self.steps.len() && self.steps[at].level == level {
            at += 1;
        }
        self.steps.insert(
            at,
            Step {
                action: Some(Box::new(action)),
                level,
                label: None,
                executed: false,
            },
        );
    }

    /// Append before the machine starts, insert after the current step once
    /// it is running.
    pub fn then<F>(&mut self, action: F)
    where
        F: FnMut(&mut StepMachine<C>, &mut C) -> Result<(), AppError> + Send + 'static,
    {
        if self.running {
            self.insert_after_current(action);
        } else {
            self.append(action);
        }
    }

    /// Append a no-op step that can be targeted by [`goto_label`](Self::goto_label).
    pub fn label(&mut self, name: impl Into<String>) {
        self.append(|_, _| Ok(()));
        if let Some(step) = self.steps.last_mut() {
            step.label = Some(name.into());
        }
    }

    /// Move the pointer to the last step carrying `name`.
    pub fn goto_label(&mut self, name: &str) -> Result<(), AppError> {
        let index = self
            .steps
            .iter()
            .rposition(|step| step.label.as_deref() == Some(name))
            .ok_or_else(|| AppError::StepError(format!("unknown label '{name}'")))?;
        self.pointer = index;
        Ok(())
    }

    /// Request a page load. Ticking is blocked until the load settles.
    pub fn open(&mut self, url: impl Into<String>) {
        self.pending = Some(url.into());
        self.blocked = true;
    }

    /// Add a step (via [`then`](Self::then)) that opens `url`.
    pub fn then_open(&mut self, url: impl Into<String>) {
        let url = url.into();
        self.then(move |machine, _| {
            machine.open(url.clone());
            Ok(())
        });
    }

    /// Run at most one step.
    pub fn tick(&mut self, ctx: &mut C) -> Result<Tick, AppError> {
        if self.blocked {
            return Ok(Tick::Blocked);
        }
        if self.pointer >= self.steps.len() {
            self.running = false;
            return Ok(Tick::Complete);
        }

        self.running = true;
        let index = self.pointer;
        self.current = Some(index);
        self.pointer += 1;

        let mut action = self.steps[index]
            .action
            .take()
            .ok_or_else(|| AppError::StepError(format!("step {} is already running", index + 1)))?;
        let result = action(self, ctx);
        // Inserts only ever land at or after the pointer, so `index` is stable.
        let step = &mut self.steps[index];
        step.action = Some(action);
        step.executed = true;

        result.map(|()| Tick::Ran)
    }

    /// Drive the program to completion, loading requested pages through
    /// `driver`.
    pub async fn run<D: PageDriver>(
        &mut self,
        driver: &D,
        ctx: &mut C,
        settings: &EngineSettings,
    ) -> Result<(), AppError> {
        let mut ticker = interval(settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.running = true;

        loop {
            ticker.tick().await;

            if let Some(url) = self.pending.take() {
                tracing::debug!(%url, "Loading page");
                let html = timeout(settings.wait_timeout, driver.load(&url))
                    .await
                    .map_err(|_| AppError::Timeout(settings.wait_timeout.as_secs()))??;
                if settings.debug {
                    tracing::debug!(%url, bytes = html.len(), "Page loaded");
                }
                self.page = Some(Page { url, html });
                self.blocked = false;
                continue;
            }

            match self.tick(ctx)? {
                Tick::Complete => return Ok(()),
                Tick::Ran | Tick::Blocked => {}
            }
        }
    }

    /// The last loaded page.
    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn steps(&self) -> &[Step<C>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// One line per step: number, level, executed flag, label. The current
    /// step is marked with `>`.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (index, step) in self.steps.iter().enumerate() {
            let marker = if self.current == Some(index) { '>' } else { ' ' };
            let _ = writeln!(
                out,
                "{marker}{:>4} level={} executed={}{}",
                index + 1,
                step.level,
                step.executed,
                step.label
                    .as_deref()
                    .map(|label| format!(" label={label}"))
                    .unwrap_or_default()
            );
        }
        out
    }
}

impl<C> fmt::Debug for StepMachine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepMachine")
            .field("steps", &self.steps.len())
            .field("pointer", &self.pointer)
            .field("current", &self.current)
            .field("running", &self.running)
            .field("blocked", &self.blocked)
            .field("pending", &self.pending)
            .finish()
    }
}
