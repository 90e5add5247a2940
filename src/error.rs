//! Error types of the display model

use std::io;

use crate::commit::CommitStyle;
use crate::device::{ConnectorId, ObjectRef};
use crate::pipe::PipeId;
use crate::plane::Rotation;

/// Errors thrown by the [`Display`](crate::display::Display) and its commit engine
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device encountered an access error
    #[error("DRM access error: {errmsg} ({source})")]
    Access {
        /// Error message associated to the access error
        errmsg: &'static str,
        /// Underlying device error
        #[source]
        source: io::Error,
    },
    /// A property was looked up by name, but the object does not expose it
    #[error(transparent)]
    PropertyNotFound(#[from] PropertyNotFound),
    /// Probing an output failed
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// The plane cannot be rotated this way
    #[error("Rotation {rotation:?} is not supported by plane {plane} of pipe {pipe}")]
    UnsupportedRotation {
        /// Pipe of the plane
        pipe: PipeId,
        /// Index of the plane inside its pipe
        plane: usize,
        /// Requested rotation
        rotation: Rotation,
    },
    /// The display does not support the requested commit style
    #[error("Commit style {0:?} is not supported by this display")]
    UnsupportedCommitStyle(CommitStyle),
    /// The atomic request changes the mode or active state of a pipe without `ALLOW_MODESET`
    #[error("Commit would change the mode of pipe {0}, but modesetting was not allowed")]
    ModesetNotAllowed(PipeId),
    /// The driver refused an atomic request
    #[error("Atomic commit (test only: {test_only}) was rejected by the driver ({source})")]
    CommitRejected {
        /// Whether the rejected request was a `TEST_ONLY` request
        test_only: bool,
        /// Underlying device error
        #[source]
        source: io::Error,
    },
    /// A legacy call sequence failed after some of its calls were already applied.
    ///
    /// Local state and driver state disagree after this error, re-probe to reconcile.
    #[error("DRM access error: {errmsg} on {object:?} after {applied} applied calls ({source})")]
    PartialApplyFailure {
        /// Number of driver calls that succeeded before the failing one
        applied: usize,
        /// Object the failing call was addressed to
        object: ObjectRef,
        /// Error message associated to the failing call
        errmsg: &'static str,
        /// Underlying device error
        #[source]
        source: io::Error,
    },
    /// Two outputs are pending on the same pipe
    #[error("Outputs `{first}` and `{second}` both request pipe {pipe}")]
    PipeConflict {
        /// Contested pipe
        pipe: PipeId,
        /// Name of the first output
        first: String,
        /// Name of the second output
        second: String,
    },
    /// An output is pending on a pipe it cannot drive
    #[error("Output `{output}` cannot be driven by pipe {pipe}")]
    InvalidPipe {
        /// Name of the output
        output: String,
        /// Requested pipe
        pipe: PipeId,
    },
    /// An output is pending on a pipe, but no mode is known for it
    #[error("Output `{0}` has no mode to drive its pipe with")]
    NoMode(String),
    /// An output that failed probing was assigned to a pipe
    #[error("Output `{0}` was not probed successfully and cannot be used")]
    InvalidOutput(String),
    /// No pipe with this identity exists
    #[error("Pipe {0} does not exist")]
    UnknownPipe(PipeId),
    /// No output with this index exists
    #[error("Output #{0} does not exist")]
    UnknownOutput(usize),
    /// A plane shows a framebuffer on a pipe that no output drives
    #[error("Pipe {0} has no output, its planes cannot be enabled")]
    PipeInactive(PipeId),
    /// A pipe stays active without a framebuffer on its primary plane
    #[error("Pipe {0} requires a framebuffer on its primary plane")]
    PrimaryPlaneRequired(PipeId),
    /// A dirty attribute maps to a property that was never resolved
    #[error("The device is missing a required property '{name}' for object ({object:?})")]
    MissingProperty {
        /// Object missing the property
        object: ObjectRef,
        /// Property name
        name: &'static str,
    },
}

/// A property name is not exposed by an object
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Property `{name}` not found on ({object:?})")]
pub struct PropertyNotFound {
    /// Object that was searched
    pub object: ObjectRef,
    /// Requested property name
    pub name: String,
}

/// Errors returned while probing a connector
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    /// None of the connector encoders can be driven by an allowed pipe
    #[error("No allowed crtc can drive connector `{name}` ({connector})")]
    NoValidCrtc {
        /// Connector id
        connector: ConnectorId,
        /// Connector name
        name: String,
    },
    /// The device encountered an access error
    #[error("DRM access error: {errmsg} ({source})")]
    Access {
        /// Error message associated to the access error
        errmsg: &'static str,
        /// Underlying device error
        #[source]
        source: io::Error,
    },
}
