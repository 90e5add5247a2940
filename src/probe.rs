//! Connector configuration probing
//!
//! [`probe_connector`] turns a connector into a [`ConnectorConfig`]: the encoder to use,
//! the pipes able to drive it, the crtc it is currently bound to and the mode to use
//! by default.

use tracing::{debug, trace, warn};

use crate::device::{
    ConnectionState, ConnectorId, ConnectorInfo, CrtcId, EncoderInfo, KmsDevice, ObjectRef,
};
use crate::error::ProbeError;
use crate::mode::ModeInfo;
use crate::pipe::{PipeId, PipeMask};
use crate::props::{ConnectorProperty, PropertyTable};

/// How much work a probe may ask the driver to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeMode {
    /// Use the connector state the driver already knows
    Current,
    /// Run a full detection cycle.
    ///
    /// Tolerates detection failures and falls back to the cached state, and hands out
    /// the fallback mode to any connector without modes.
    Force,
}

/// Probed configuration of a connector
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub(crate) connector: ConnectorInfo,
    pub(crate) encoder: Option<EncoderInfo>,
    pub(crate) crtc: Option<CrtcId>,
    pub(crate) pipe: Option<PipeId>,
    pub(crate) candidate_pipe: PipeId,
    pub(crate) default_mode: Option<ModeInfo>,
    pub(crate) valid_crtcs: PipeMask,
    pub(crate) scaling_mode: Option<u64>,
    pub(crate) scaling_mode_changed: bool,
    pub(crate) props: PropertyTable<ConnectorProperty>,
}

impl ConnectorConfig {
    /// Snapshot of the connector
    pub fn connector(&self) -> &ConnectorInfo {
        &self.connector
    }

    /// Encoder chosen for the connector
    pub fn encoder(&self) -> Option<&EncoderInfo> {
        self.encoder.as_ref()
    }

    /// Crtc driving the connector after the last commit
    pub fn crtc(&self) -> Option<CrtcId> {
        self.crtc
    }

    /// Pipe driving the connector after the last commit
    pub fn pipe(&self) -> Option<PipeId> {
        self.pipe
    }

    /// Pipe the probe would pick for this connector
    pub fn candidate_pipe(&self) -> PipeId {
        self.candidate_pipe
    }

    /// Mode used unless overridden
    pub fn default_mode(&self) -> Option<&ModeInfo> {
        self.default_mode.as_ref()
    }

    /// Pipes this connector can be driven by
    pub fn valid_crtcs(&self) -> PipeMask {
        self.valid_crtcs
    }

    /// Pending scaling mode, if one was selected
    pub fn scaling_mode(&self) -> Option<u64> {
        self.scaling_mode
    }

    /// Whether the scaling mode changed since the last commit
    pub fn scaling_mode_changed(&self) -> bool {
        self.scaling_mode_changed
    }

    /// Resolved connector properties
    pub fn properties(&self) -> &PropertyTable<ConnectorProperty> {
        &self.props
    }

    /// Whether a sink is attached
    pub fn is_connected(&self) -> bool {
        self.connector.state == ConnectionState::Connected
    }

    pub(crate) fn object(&self) -> ObjectRef {
        ObjectRef::Connector(self.connector.id)
    }

    pub(crate) fn set_active(&mut self, pipe: Option<PipeId>, crtc: Option<CrtcId>) {
        self.pipe = pipe;
        self.crtc = crtc;
    }
}

/// The mode a connector should use by default: the preferred one, else the first one
pub fn select_default_mode(connector: &ConnectorInfo) -> Option<&ModeInfo> {
    connector
        .modes
        .iter()
        .find(|mode| mode.is_preferred())
        .or_else(|| connector.modes.first())
}

fn pipe_of(crtcs: &[CrtcId], crtc: CrtcId) -> Option<PipeId> {
    crtcs
        .iter()
        .position(|c| *c == crtc)
        .filter(|idx| *idx < PipeId::MAX)
        .map(PipeId::from_index)
}

/// Probe a connector.
///
/// `crtcs` are the crtcs of the device in pipe order, `allowed` restricts the pipes the
/// connector may be driven by. A crtc already driving the connector is kept if allowed.
/// Fails with [`ProbeError::NoValidCrtc`] if no allowed pipe can drive the connector.
#[profiling::function]
pub fn probe_connector<D: KmsDevice + ?Sized>(
    dev: &D,
    id: ConnectorId,
    crtcs: &[CrtcId],
    allowed: PipeMask,
    mode: ProbeMode,
) -> Result<ConnectorConfig, ProbeError> {
    let connector = match mode {
        ProbeMode::Current => dev.connector(id, false),
        ProbeMode::Force => dev.connector(id, true).or_else(|err| {
            warn!(connector = %id, "Forced probe failed, using cached state: {}", err);
            dev.connector(id, false)
        }),
    }
    .map_err(|source| ProbeError::Access {
        errmsg: "Error loading connector info",
        source,
    })?;

    let encoders = connector
        .encoders
        .iter()
        .filter_map(|encoder| match dev.encoder(*encoder) {
            Ok(info) => Some(info),
            Err(err) => {
                debug!(connector = %id, encoder = %encoder, "Skipping encoder: {}", err);
                None
            }
        })
        .collect::<Vec<_>>();

    let valid_crtcs = encoders
        .iter()
        .fold(PipeMask::empty(), |mask, encoder| mask | encoder.possible_crtcs)
        & PipeMask::first_n(crtcs.len());
    let usable = valid_crtcs & allowed;

    let Some(first_usable) = usable.first() else {
        return Err(ProbeError::NoValidCrtc {
            connector: id,
            name: connector.name(),
        });
    };

    // keep the current binding, tearing it down is expensive
    let bound = connector
        .current_encoder
        .and_then(|current| encoders.iter().find(|encoder| encoder.id == current))
        .and_then(|encoder| encoder.crtc.map(|crtc| (encoder, crtc)))
        .and_then(|(encoder, crtc)| {
            pipe_of(crtcs, crtc)
                .filter(|pipe| usable.contains(*pipe))
                .map(|pipe| (encoder.clone(), crtc, pipe))
        });

    let (encoder, crtc, pipe, candidate_pipe) = match bound {
        Some((encoder, crtc, pipe)) => (Some(encoder), Some(crtc), Some(pipe), pipe),
        None => {
            let encoder = encoders
                .iter()
                .find(|encoder| encoder.possible_crtcs.contains(first_usable))
                .cloned();
            (encoder, None, None, first_usable)
        }
    };

    let default_mode = match select_default_mode(&connector) {
        Some(mode) => Some(mode.clone()),
        None if mode == ProbeMode::Force || connector.state == ConnectionState::Connected => {
            debug!(connector = %id, "No modes reported, using fallback mode");
            Some(ModeInfo::fallback())
        }
        None => None,
    };

    trace!(
        connector = %id,
        ?crtc,
        candidate = %candidate_pipe,
        valid = ?valid_crtcs,
        "Probed connector"
    );

    Ok(ConnectorConfig {
        connector,
        encoder,
        crtc,
        pipe,
        candidate_pipe,
        default_mode,
        valid_crtcs,
        scaling_mode: None,
        scaling_mode_changed: false,
        props: PropertyTable::empty(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{mode_1080p, MockConnector, MockDevice};

    #[test]
    fn prefers_bound_crtc() {
        let dev = MockDevice::builder()
            .pipes(3)
            .connector(MockConnector::connected().possible(0b111).bound_to(2))
            .build();
        let connector = dev.connector_ids()[0];
        let config =
            probe_connector(&dev, connector, &dev.crtc_ids(), PipeMask::first_n(3), ProbeMode::Current)
                .unwrap();

        assert_eq!(config.pipe(), Some(PipeId::from_index(2)));
        assert_eq!(config.crtc(), Some(dev.crtc_ids()[2]));
        assert_eq!(config.candidate_pipe(), PipeId::from_index(2));
        assert_eq!(config.valid_crtcs(), PipeMask::first_n(3));
        assert_eq!(config.default_mode(), Some(&mode_1080p()));
    }

    #[test]
    fn bound_crtc_outside_allowed_mask() {
        let dev = MockDevice::builder()
            .pipes(3)
            .connector(MockConnector::connected().possible(0b111).bound_to(0))
            .build();
        let connector = dev.connector_ids()[0];
        let config = probe_connector(
            &dev,
            connector,
            &dev.crtc_ids(),
            PipeMask::from_bits(0b110),
            ProbeMode::Current,
        )
        .unwrap();

        assert_eq!(config.pipe(), None);
        assert_eq!(config.candidate_pipe(), PipeId::from_index(1));
    }

    #[test]
    fn no_valid_crtc() {
        let dev = MockDevice::builder()
            .pipes(2)
            .connector(MockConnector::connected().possible(0b01))
            .build();
        let connector = dev.connector_ids()[0];
        let err = probe_connector(
            &dev,
            connector,
            &dev.crtc_ids(),
            PipeMask::from_bits(0b10),
            ProbeMode::Current,
        )
        .unwrap_err();
        assert!(matches!(err, ProbeError::NoValidCrtc { name, .. } if name == "HDMI-A-1"));
    }

    #[test]
    fn fallback_mode_only_when_connected() {
        let dev = MockDevice::builder()
            .pipes(1)
            .connector(MockConnector::connected().modes(Vec::new()))
            .connector(MockConnector::disconnected())
            .build();
        let crtcs = dev.crtc_ids();
        let ids = dev.connector_ids();

        let connected =
            probe_connector(&dev, ids[0], &crtcs, PipeMask::first_n(1), ProbeMode::Current).unwrap();
        assert_eq!(connected.default_mode(), Some(&ModeInfo::fallback()));

        let unplugged =
            probe_connector(&dev, ids[1], &crtcs, PipeMask::first_n(1), ProbeMode::Current).unwrap();
        assert!(!unplugged.is_connected());
        assert_eq!(unplugged.default_mode(), None);
    }

    #[test]
    fn forced_probe_tolerates_failures() {
        let dev = MockDevice::builder()
            .pipes(1)
            .connector(MockConnector::disconnected())
            .build();
        dev.fail_forced_probe(true);
        let connector = dev.connector_ids()[0];
        let config =
            probe_connector(&dev, connector, &dev.crtc_ids(), PipeMask::first_n(1), ProbeMode::Force)
                .unwrap();
        assert_eq!(config.default_mode(), Some(&ModeInfo::fallback()));
    }

    #[test]
    fn default_mode_prefers_flagged_mode() {
        let mut small = ModeInfo::fallback();
        small.name = "small".into();
        let dev = MockDevice::builder()
            .pipes(1)
            .connector(MockConnector::connected().modes(vec![small, mode_1080p()]))
            .build();
        let connector = dev.connector(dev.connector_ids()[0], false).unwrap();
        assert_eq!(select_default_mode(&connector), Some(&mode_1080p()));
    }
}
