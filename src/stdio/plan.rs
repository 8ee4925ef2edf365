/*!
 * Stdio Plan Builder
 * Classifies, validates and synthesizes every descriptor before spawning
 *
 * The finished plan is immutable: descriptors plus a parallel array of open
 * modes. A new spawn builds a new plan.
 */

use super::classify::{classify, descriptor_type, StdioSource};
use super::extensions::{ExtensionProps, ExtensionTable};
use super::input::merge_input_shortcuts;
use super::mode::resolve_modes;
use super::normalize::normalize_stdio;
use super::synth::{url_path, ResolvedStream, Synthesizer};
use super::types::{
    option_name, Direction, StdioError, StdioMode, StdioOptions, StdioResult, StdioType,
};
use crate::core::limits::STANDARD_FD_COUNT;
use std::path::PathBuf;
use tracing::debug;

/// One I/O slot between parent and child
#[derive(Debug)]
pub struct StdioDescriptor {
    pub index: usize,
    pub direction: Direction,
    pub option_name: String,
    pub stdio_type: StdioType,
    /// Native mode asked for by the raw value: the keyword itself for a
    /// native slot, `Overlapped` when requested alongside other values,
    /// `Pipe` otherwise
    pub requested: StdioMode,
    /// Classified sources; moved into `resolved` for bridged slots
    pub sources: Vec<StdioSource>,
    pub extensions: ExtensionProps,
    pub resolved: Option<ResolvedStream>,
}

impl StdioDescriptor {
    fn new(index: usize, sources: Vec<StdioSource>) -> Self {
        let stdio_type = descriptor_type(&sources);
        let requested = requested_mode(&sources);
        Self {
            index,
            direction: Direction::for_index(index),
            option_name: option_name(index),
            stdio_type,
            requested,
            sources,
            extensions: ExtensionProps::new(),
            resolved: None,
        }
    }

    #[inline]
    pub fn is_bridged(&self) -> bool {
        self.stdio_type.is_bridged()
    }

    #[inline]
    pub fn is_ipc(&self) -> bool {
        self.stdio_type == StdioType::Ipc
    }
}

fn requested_mode(sources: &[StdioSource]) -> StdioMode {
    let mut requested = StdioMode::Pipe;
    for source in sources {
        if let StdioSource::Native(mode) = source {
            match mode {
                StdioMode::Overlapped => return StdioMode::Overlapped,
                StdioMode::Pipe => {}
                other => requested = *other,
            }
        }
    }
    requested
}

/// Resolved stdio for one spawn
#[derive(Debug)]
pub struct StdioPlan {
    descriptors: Vec<StdioDescriptor>,
    modes: Vec<StdioMode>,
}

impl StdioPlan {
    pub fn descriptors(&self) -> &[StdioDescriptor] {
        &self.descriptors
    }

    pub fn modes(&self) -> &[StdioMode] {
        &self.modes
    }

    pub fn descriptor(&self, index: usize) -> Option<&StdioDescriptor> {
        self.descriptors.get(index)
    }

    /// Index of the messaging descriptor, if any
    pub fn ipc_index(&self) -> Option<usize> {
        self.descriptors.iter().position(StdioDescriptor::is_ipc)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Hand the plan to process creation
    pub fn into_parts(self) -> (Vec<StdioDescriptor>, Vec<StdioMode>) {
        (self.descriptors, self.modes)
    }
}

/// Builds a [`StdioPlan`] from the stdio configuration surface
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    cwd: PathBuf,
    extensions: ExtensionTable,
}

impl PlanBuilder {
    /// Relative file paths resolve against `cwd`
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            extensions: ExtensionTable::default(),
        }
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: ExtensionTable) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn build(&self, mut options: StdioOptions) -> StdioResult<StdioPlan> {
        let slots = normalize_stdio(&mut options)?;

        let mut classified: Vec<Vec<StdioSource>> = slots
            .into_iter()
            .map(|slot| slot.into_values().into_iter().map(classify).collect())
            .collect();

        let stdin = std::mem::take(&mut classified[0]);
        classified[0] = merge_input_shortcuts(stdin, options.input.take(), options.input_file.take())?;

        let has_ipc = classified
            .iter()
            .any(|sources| sources.iter().any(|source| matches!(source, StdioSource::Ipc)));
        if options.ipc && !has_ipc {
            classified.push(vec![StdioSource::Ipc]);
        }

        let mut descriptors = Vec::with_capacity(classified.len());
        for (index, sources) in classified.into_iter().enumerate() {
            let sources = rewrite_combined_inherit(index, sources)?;
            let descriptor = StdioDescriptor::new(index, sources);
            validate_descriptor(&descriptor)?;
            descriptors.push(descriptor);
        }
        validate_single_ipc(&descriptors)?;

        let synthesizer = Synthesizer::new(&self.cwd, &options.buffer);
        for descriptor in &mut descriptors {
            descriptor.extensions = self.extensions.apply(descriptor);
            if descriptor.is_bridged() {
                let sources = std::mem::take(&mut descriptor.sources);
                descriptor.resolved = Some(synthesizer.synthesize(
                    &descriptor.option_name,
                    descriptor.direction,
                    sources,
                )?);
            }
        }

        let modes = resolve_modes(&descriptors);
        debug!(
            descriptors = descriptors.len(),
            modes = ?modes,
            "stdio plan resolved"
        );

        Ok(StdioPlan { descriptors, modes })
    }
}

/// `inherit` next to other values forwards through the parent's own stream
fn rewrite_combined_inherit(index: usize, sources: Vec<StdioSource>) -> StdioResult<Vec<StdioSource>> {
    if sources.len() < 2 {
        return Ok(sources);
    }
    sources
        .into_iter()
        .map(|source| match source {
            StdioSource::Native(StdioMode::Inherit) if index < STANDARD_FD_COUNT => {
                Ok(StdioSource::Parent(index as u32))
            }
            StdioSource::Native(mode @ (StdioMode::Inherit | StdioMode::Ignore | StdioMode::Fd(_))) => {
                Err(StdioError::NotCombinable {
                    option_name: option_name(index),
                    value: mode.to_string(),
                })
            }
            StdioSource::Ipc => Err(StdioError::NotCombinable {
                option_name: option_name(index),
                value: "ipc".to_string(),
            }),
            other => Ok(other),
        })
        .collect()
}

fn validate_descriptor(descriptor: &StdioDescriptor) -> StdioResult<()> {
    let option_name = &descriptor.option_name;

    if descriptor.sources.is_empty() {
        return Err(StdioError::Empty {
            option_name: option_name.clone(),
        });
    }

    for source in &descriptor.sources {
        match (source, descriptor.direction) {
            (StdioSource::Url(url), _) => {
                url_path(option_name, url)?;
            }
            (StdioSource::Unresolved(value), _) => {
                return Err(StdioError::FilePath {
                    option_name: option_name.clone(),
                    value: value.clone(),
                })
            }
            (StdioSource::Payload(_), Direction::Output) => {
                return Err(direction_error(option_name, "an in-memory payload", Direction::Input))
            }
            (StdioSource::Reader(_) | StdioSource::Stream(_), Direction::Output) => {
                return Err(direction_error(option_name, "a readable source", Direction::Input))
            }
            (StdioSource::Writer(_), Direction::Input) => {
                return Err(direction_error(option_name, "a writable sink", Direction::Output))
            }
            (StdioSource::Ipc, _) if descriptor.index < STANDARD_FD_COUNT => {
                return Err(StdioError::IpcSlot {
                    option_name: option_name.clone(),
                })
            }
            _ => {}
        }
    }

    Ok(())
}

fn direction_error(option_name: &str, kind: &'static str, expected: Direction) -> StdioError {
    StdioError::Direction {
        option_name: option_name.to_string(),
        kind,
        expected,
    }
}

fn validate_single_ipc(descriptors: &[StdioDescriptor]) -> StdioResult<()> {
    let mut ipc = descriptors.iter().filter(|d| d.is_ipc());
    if let (Some(first), Some(second)) = (ipc.next(), ipc.next()) {
        return Err(StdioError::DuplicateIpc {
            first: first.option_name.clone(),
            second: second.option_name.clone(),
        });
    }
    Ok(())
}
