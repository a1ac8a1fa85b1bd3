//! Running one build step through an [`Executor`].
//!
//! ```text
//! Idle ─► CacheChecked ─┬─ hit ──────────────────────────────────────────► Advanced
//!                       └─ miss ─► Executing ─► Committing ─┬─► Committed ─► Advanced
//!                                      │                    └─► HookFailed ─► Idle
//!                                      └─ error ───────────────────────────► Idle
//! ```
//!
//! A container created for the step is destroyed whether the step
//! succeeds or not. Once the commit went through, a failed destroy is
//! only logged; the container stays live in the executor.

use std::io::{Cursor, Read};

use layerbox_core::error::{BuildError, ErrorKind, Result};
use layerbox_core::executor::{ContainerHandle, Executor};
use layerbox_core::hook::CommitHook;
use layerbox_core::step::StepDescriptor;

use crate::image::sha256_bytes;

/// A tar archive to place in the container before running commands.
#[derive(Debug, Clone)]
pub struct StepInput {
    /// Directory inside the container
    pub dest: String,
    /// Plain tar bytes
    pub archive: Vec<u8>,
}

impl StepInput {
    pub fn new(dest: impl Into<String>, archive: Vec<u8>) -> Self {
        Self {
            dest: dest.into(),
            archive,
        }
    }

    /// Content digest, which feeds the step fingerprint.
    pub fn digest(&self) -> String {
        format!("sha256:{}", sha256_bytes(&self.archive))
    }
}

/// A build step: inputs, commands, and paths to collect afterwards.
#[derive(Debug, Clone)]
pub struct BuildStep {
    pub instruction: String,
    pub inputs: Vec<StepInput>,
    pub commands: Vec<Vec<String>>,
    /// Container paths archived after the commands ran
    pub outputs: Vec<String>,
}

impl BuildStep {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            inputs: Vec::new(),
            commands: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: StepInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands.push(argv.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_output(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Descriptor without a container, as used for fingerprinting.
    pub fn descriptor(&self) -> StepDescriptor {
        self.inputs
            .iter()
            .fold(StepDescriptor::new(&self.instruction), |d, input| {
                d.with_input(input.digest())
            })
    }
}

/// Where a step is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    CacheChecked,
    Executing,
    Committing,
    Committed,
    Advanced,
    /// The commit hook rejected the candidate; the step ends back in `Idle`
    HookFailed,
}

impl StepPhase {
    /// Phase a step moves to when `error` interrupts it in this phase.
    pub fn on_error(self, error: &BuildError) -> StepPhase {
        match (self, error.kind()) {
            (StepPhase::Committing, ErrorKind::HookFailed) => StepPhase::HookFailed,
            _ => StepPhase::Idle,
        }
    }
}

/// Result of a completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Satisfied from the build cache; nothing ran
    Cached { image_id: String },
    /// Ran and committed a new layer
    Committed {
        image_id: String,
        /// Archived output paths, in request order
        outputs: Vec<(String, Vec<u8>)>,
    },
}

impl StepOutcome {
    pub fn image_id(&self) -> &str {
        match self {
            StepOutcome::Cached { image_id } | StepOutcome::Committed { image_id, .. } => image_id,
        }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, StepOutcome::Cached { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Skip the cache lookup and always execute
    pub no_cache: bool,
}

/// Drive `step` to completion on `executor`.
pub async fn run_step<E>(
    executor: &mut E,
    step: &BuildStep,
    hook: &dyn CommitHook,
    options: &StepOptions,
) -> Result<StepOutcome>
where
    E: Executor + ?Sized,
{
    let mut phase = StepPhase::Idle;
    let descriptor = step.descriptor();

    if !options.no_cache {
        let fingerprint = descriptor.fingerprint(executor.image_id().as_deref());
        let hit = executor.check_cache(&fingerprint).await?;
        enter(&mut phase, StepPhase::CacheChecked, step);

        if hit {
            if let Some(image_id) = executor.cached_image(&fingerprint).await? {
                executor.advance_to(&image_id).await?;
                enter(&mut phase, StepPhase::Advanced, step);
                tracing::info!(instruction = %step.instruction, image_id = %image_id, "Using cache");
                return Ok(StepOutcome::Cached { image_id });
            }
        }
    }

    let handle = executor.create().await?;
    enter(&mut phase, StepPhase::Executing, step);

    let result = execute_in(executor, &handle, step, descriptor, hook, &mut phase).await;
    let destroyed = executor.destroy(&handle).await;

    match result {
        Ok(outcome) => {
            if let Err(e) = destroyed {
                tracing::warn!(
                    container = %handle,
                    image_id = %outcome.image_id(),
                    error = %e,
                    "Step committed but its container could not be destroyed"
                );
            }
            enter(&mut phase, StepPhase::Advanced, step);
            Ok(outcome)
        }
        Err(e) => {
            if let Err(destroy_error) = destroyed {
                tracing::warn!(
                    container = %handle,
                    error = %destroy_error,
                    "Failed to destroy container after step failure"
                );
            }
            let next = phase.on_error(&e);
            enter(&mut phase, next, step);
            if next == StepPhase::HookFailed {
                enter(&mut phase, StepPhase::Idle, step);
            }
            Err(e)
        }
    }
}

async fn execute_in<E>(
    executor: &mut E,
    handle: &ContainerHandle,
    step: &BuildStep,
    descriptor: StepDescriptor,
    hook: &dyn CommitHook,
    phase: &mut StepPhase,
) -> Result<StepOutcome>
where
    E: Executor + ?Sized,
{
    for input in &step.inputs {
        executor
            .copy_to_container(handle, &input.dest, Box::new(Cursor::new(input.archive.clone())))
            .await?;
    }

    for argv in &step.commands {
        let output = executor.exec(handle, argv).await?;
        if !output.success() {
            return Err(BuildError::StepFailed {
                command: argv.join(" "),
                exit_code: output.exit_code,
                stderr: output.stderr_text(),
            });
        }
    }

    let mut outputs = Vec::with_capacity(step.outputs.len());
    for path in &step.outputs {
        let mut reader = executor.copy_from_container(handle, path).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        outputs.push((path.clone(), data));
    }

    enter(phase, StepPhase::Committing, step);
    let image_id = executor
        .commit(&descriptor.in_container(handle.clone()), hook)
        .await?;
    enter(phase, StepPhase::Committed, step);

    Ok(StepOutcome::Committed { image_id, outputs })
}

fn enter(phase: &mut StepPhase, next: StepPhase, step: &BuildStep) {
    tracing::debug!(instruction = %step.instruction, from = ?*phase, to = ?next, "Step phase");
    *phase = next;
}
