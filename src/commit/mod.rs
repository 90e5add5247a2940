//! Committing display state
//!
//! A commit walks the [`Display`], collects every changed pipe, plane and output and
//! pushes the changes to the driver in one of three styles:
//!
//! - [`CommitStyle::Legacy`]: one `set_crtc` per modeset, the primary plane folded into it,
//!   legacy cursor ioctls for the cursor and `set_plane` for overlays.
//! - [`CommitStyle::Universal`]: like legacy for modesets, but every plane goes through `set_plane`.
//! - [`CommitStyle::Atomic`]: a single atomic request, see [`Display::try_commit_atomic`].
//!
//! Before any driver call the pending state is validated as a whole. Validation failures
//! leave both the local and the driver state untouched.
//!
//! Only the atomic style is all-or-nothing. The other styles stop at the first failing call
//! and report [`Error::PartialApplyFailure`] if earlier calls were applied already.

use tracing::{instrument, trace};

use crate::device::KmsDevice;
use crate::display::Display;
use crate::error::Error;

mod atomic;
mod legacy;

pub use self::atomic::AtomicRequest;

/// Protocol used to commit changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitStyle {
    /// Legacy per-object calls
    Legacy,
    /// Legacy calls with every plane updated through `set_plane`
    Universal,
    /// Atomic modesetting
    Atomic,
}

bitflags::bitflags! {
    /// Flags of an atomic commit, with their kernel values
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AtomicCommitFlags: u32 {
        /// Send a page flip event on completion
        const PAGE_FLIP_EVENT   = 0x0001;
        /// Validate the request without applying it
        const TEST_ONLY         = 0x0100;
        /// Return before the request is applied
        const NONBLOCK          = 0x0200;
        /// Allow the request to change the mode or active state of crtcs
        const ALLOW_MODESET     = 0x0400;
    }
}

/// What a commit does to one pipe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PipePlan {
    /// Output pending on the pipe
    pub output: Option<usize>,
    /// The pending output needs a modeset
    pub modeset: bool,
    /// An output leaves the pipe
    pub vacated: bool,
}

impl PipePlan {
    /// The pipe has an output after the commit
    pub fn is_active(&self) -> bool {
        self.output.is_some()
    }

    /// The crtc has to be turned off
    pub fn disables(&self) -> bool {
        self.output.is_none() && self.vacated
    }

    /// The mode or active state of the crtc changes
    pub fn changes_mode(&self) -> bool {
        self.modeset || self.disables()
    }
}

impl<D: KmsDevice> Display<D> {
    /// Commit every pending change with the given style.
    ///
    /// [`CommitStyle::Atomic`] implies `ALLOW_MODESET`. On failure of an atomic commit the
    /// local state is unchanged and the commit can be retried.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    #[profiling::function]
    pub fn commit(&mut self, style: CommitStyle) -> Result<(), Error> {
        match style {
            CommitStyle::Atomic => self.try_commit_atomic(AtomicCommitFlags::ALLOW_MODESET),
            CommitStyle::Universal if !self.has_universal_planes => Err(Error::UnsupportedCommitStyle(style)),
            CommitStyle::Legacy | CommitStyle::Universal => self.commit_legacy(style),
        }
    }

    /// Validate the pending output assignments and derive what happens to every pipe
    pub(crate) fn plan(&self) -> Result<Vec<PipePlan>, Error> {
        let mut plans = vec![PipePlan::default(); self.pipes.len()];

        for (idx, output) in self.outputs.iter().enumerate() {
            if let Some(pipe) = output.pending_pipe() {
                let Some(config) = output.config() else {
                    return Err(Error::InvalidOutput(output.name().to_string()));
                };
                if pipe.index() >= plans.len() || !config.valid_crtcs().contains(pipe) {
                    return Err(Error::InvalidPipe {
                        output: output.name().to_string(),
                        pipe,
                    });
                }
                let plan = &mut plans[pipe.index()];
                if let Some(other) = plan.output {
                    return Err(Error::PipeConflict {
                        pipe,
                        first: self.outputs[other].name().to_string(),
                        second: output.name().to_string(),
                    });
                }
                if output.mode().is_none() {
                    return Err(Error::NoMode(output.name().to_string()));
                }
                plan.output = Some(idx);
                plan.modeset |= output.needs_modeset();
            }

            if let Some(active) = output.active_pipe() {
                if output.pending_pipe() != Some(active) {
                    if let Some(plan) = plans.get_mut(active.index()) {
                        plan.vacated = true;
                    }
                }
            }
        }

        trace!(?plans, "Validated output assignments");
        Ok(plans)
    }
}
