//! Outputs
//!
//! An [`Output`] is the unit a caller works with to show content on a connector:
//! pick a pipe with [`Output::set_pipe`], optionally override the mode, fill the planes
//! of the pipe and commit.

use crate::device::{ConnectorId, CrtcId};
use crate::mode::ModeInfo;
use crate::pipe::{PipeId, PipeMask};
use crate::probe::ConnectorConfig;

/// A connector of the display
#[derive(Debug, Clone)]
pub struct Output {
    pub(crate) id: ConnectorId,
    pub(crate) name: String,
    pub(crate) config: Option<ConnectorConfig>,
    pub(crate) pending_pipe: Option<PipeId>,
    pub(crate) override_mode: Option<ModeInfo>,
    pub(crate) mode_changed: bool,
}

impl Output {
    pub(crate) fn new(id: ConnectorId, name: String, config: Option<ConnectorConfig>) -> Output {
        let pending_pipe = config.as_ref().and_then(ConnectorConfig::pipe);
        Output {
            id,
            name,
            config,
            pending_pipe,
            override_mode: None,
            mode_changed: false,
        }
    }

    /// Driver id of the connector
    pub fn id(&self) -> ConnectorId {
        self.id
    }

    /// Name of the connector, e.g. `DP-1`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether probing succeeded. Invalid outputs are skipped by every iterator of the display.
    pub fn is_valid(&self) -> bool {
        self.config.is_some()
    }

    /// Probed configuration, `None` for invalid outputs
    pub fn config(&self) -> Option<&ConnectorConfig> {
        self.config.as_ref()
    }

    /// Whether a sink is attached
    pub fn is_connected(&self) -> bool {
        self.config.as_ref().map_or(false, ConnectorConfig::is_connected)
    }

    /// Pipes this output can be driven by
    pub fn valid_pipes(&self) -> PipeMask {
        self.config
            .as_ref()
            .map_or(PipeMask::empty(), ConnectorConfig::valid_crtcs)
    }

    /// Pipe this output asks for on the next commit
    pub fn pending_pipe(&self) -> Option<PipeId> {
        self.pending_pipe
    }

    /// Pending pipe as a mask, empty if the output is to be disabled
    pub fn pending_pipe_mask(&self) -> PipeMask {
        self.pending_pipe.map_or(PipeMask::empty(), PipeMask::from)
    }

    /// Pipe driving this output after the last commit
    pub fn active_pipe(&self) -> Option<PipeId> {
        self.config.as_ref().and_then(ConnectorConfig::pipe)
    }

    /// Crtc driving this output after the last commit
    pub fn active_crtc(&self) -> Option<CrtcId> {
        self.config.as_ref().and_then(ConnectorConfig::crtc)
    }

    /// Request a pipe for this output, or `None` to disable it.
    ///
    /// The pipe is not validated before the commit.
    pub fn set_pipe(&mut self, pipe: Option<PipeId>) {
        self.pending_pipe = pipe;
    }

    /// Mode used on the next commit: the override if set, else the probed default
    pub fn mode(&self) -> Option<&ModeInfo> {
        self.override_mode
            .as_ref()
            .or_else(|| self.config.as_ref().and_then(ConnectorConfig::default_mode))
    }

    /// Override the probed mode, `None` restores it
    pub fn override_mode(&mut self, mode: Option<ModeInfo>) {
        if self.override_mode != mode {
            self.override_mode = mode;
            self.mode_changed = true;
        }
    }

    /// Select a value of the `scaling mode` connector property
    pub fn set_scaling_mode(&mut self, value: u64) {
        if let Some(config) = self.config.as_mut() {
            config.scaling_mode = Some(value);
            config.scaling_mode_changed = true;
        }
    }

    /// Whether the pending pipe differs from the active one
    pub fn pipe_changed(&self) -> bool {
        self.pending_pipe != self.active_pipe()
    }

    /// Whether committing this output requires a modeset
    pub fn needs_modeset(&self) -> bool {
        self.pipe_changed() || (self.pending_pipe.is_some() && self.mode_changed)
    }

    /// Whether anything about this output changed since the last commit
    pub fn is_dirty(&self) -> bool {
        self.needs_modeset() || self.config.as_ref().map_or(false, |c| c.scaling_mode_changed)
    }

    pub(crate) fn confirm(&mut self, crtc: Option<CrtcId>) {
        let pipe = self.pending_pipe;
        if let Some(config) = self.config.as_mut() {
            config.set_active(pipe, crtc);
        }
        self.mode_changed = false;
    }

    pub(crate) fn confirm_disabled(&mut self) {
        if let Some(config) = self.config.as_mut() {
            config.set_active(None, None);
        }
    }

    pub(crate) fn confirm_scaling_mode(&mut self) {
        if let Some(config) = self.config.as_mut() {
            config.scaling_mode_changed = false;
        }
    }
}
