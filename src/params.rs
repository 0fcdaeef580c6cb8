//! Gate widths and delays derived from the exposure and a per-channel calibration.

use serde::{Deserialize, Serialize};

use crate::regs::Channel;
use crate::units::to_device_units;
use crate::{Error, Result};

/// Gates issued per start. Bursts are not supported by this controller.
pub const GATE_QUANTITY: u32 = 1;

/// Width reduction applied once the exposure reaches `min_exposure_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub min_exposure_ms: f64,
    pub offset_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DelaySource {
    /// Compensation constant of the hardware revision.
    Fixed { ms: f64 },
    /// Set by the operator; `ms` holds the current value.
    Operator { ms: f64 },
}

impl DelaySource {
    pub fn ms(self) -> f64 {
        match self {
            Self::Fixed { ms } | Self::Operator { ms } => ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    pub channel: Channel,
    /// Sorted by descending `min_exposure_ms`; the first one reached applies.
    #[serde(default)]
    pub width_compensation: Vec<Breakpoint>,
    pub delay: DelaySource,
}

impl ChannelCalibration {
    pub fn width_offset_ms(&self, exposure_ms: f64) -> f64 {
        self.width_compensation.iter()
            .find(|breakpoint| exposure_ms >= breakpoint.min_exposure_ms)
            .map(|breakpoint| breakpoint.offset_ms)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub channels: Vec<ChannelCalibration>,
}

// Shutter opening latency grows with exposure; the gate is shortened accordingly.
fn shutter_latency() -> Vec<Breakpoint> {
    vec![
        Breakpoint { min_exposure_ms: 40.0, offset_ms: 8.0 },
        Breakpoint { min_exposure_ms: 30.0, offset_ms: 7.0 },
        Breakpoint { min_exposure_ms: 20.0, offset_ms: 5.0 },
    ]
}

impl CalibrationTable {
    pub fn legacy() -> CalibrationTable {
        CalibrationTable {
            channels: vec![
                ChannelCalibration {
                    channel: Channel::Shutter,
                    width_compensation: shutter_latency(),
                    delay: DelaySource::Fixed { ms: 0.0 },
                },
                ChannelCalibration {
                    channel: Channel::Detector,
                    width_compensation: Vec::new(),
                    delay: DelaySource::Fixed { ms: 8.0 },
                },
                ChannelCalibration {
                    channel: Channel::Auxiliary,
                    width_compensation: Vec::new(),
                    delay: DelaySource::Fixed { ms: 0.0 },
                },
            ]
        }
    }

    pub fn extended() -> CalibrationTable {
        CalibrationTable {
            channels: vec![
                ChannelCalibration {
                    channel: Channel::Shutter,
                    width_compensation: shutter_latency(),
                    delay: DelaySource::Operator { ms: 0.0 },
                },
                ChannelCalibration {
                    channel: Channel::Detector,
                    width_compensation: Vec::new(),
                    delay: DelaySource::Operator { ms: 8.0 },
                },
                ChannelCalibration {
                    channel: Channel::Auxiliary,
                    width_compensation: Vec::new(),
                    delay: DelaySource::Operator { ms: 0.0 },
                },
            ]
        }
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelCalibration> {
        self.channels.iter().find(|calib| calib.channel == channel)
    }

    /// Record an operator-chosen delay, returning it in device units.
    pub fn set_operator_delay(&mut self, channel: Channel, delay_ms: f64) -> Result<u32> {
        let calib = self.channels.iter_mut()
            .find(|calib| calib.channel == channel)
            .ok_or(Error::UnknownChannel(channel))?;
        match calib.delay {
            DelaySource::Fixed { .. } =>
                Err(Error::DelayNotSettable(channel)),
            DelaySource::Operator { .. } => {
                let delay = to_device_units(delay_ms)?;
                calib.delay = DelaySource::Operator { ms: delay_ms };
                Ok(delay)
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (index, calib) in self.channels.iter().enumerate() {
            if self.channels[..index].iter().any(|other| other.channel == calib.channel) {
                return Err(Error::Config(format!("channel {} calibrated twice", calib.channel)))
            }
            let descending = calib.width_compensation.windows(2)
                .all(|pair| pair[0].min_exposure_ms > pair[1].min_exposure_ms);
            if !descending {
                return Err(Error::Config(format!(
                    "{} breakpoints must be sorted by descending exposure", calib.channel)))
            }
            for breakpoint in calib.width_compensation.iter() {
                if !(breakpoint.offset_ms >= 0.0 && breakpoint.offset_ms <= breakpoint.min_exposure_ms) {
                    return Err(Error::Config(format!(
                        "{} offset {} ms at {} ms would produce a negative gate",
                        calib.channel, breakpoint.offset_ms, breakpoint.min_exposure_ms)))
                }
            }
            to_device_units(calib.delay.ms())
                .map_err(|_| Error::Config(format!(
                    "{} delay {} ms does not fit the register", calib.channel, calib.delay.ms())))?;
        }
        Ok(())
    }
}

/// Width and delay of one gate, in device units (microseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelTiming {
    pub width: u32,
    pub delay: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePlan {
    pub channels: Vec<(Channel, ChannelTiming)>,
    pub quantity: u32,
}

impl GatePlan {
    pub fn compute(exposure_ms: f64, calibration: &CalibrationTable) -> Result<GatePlan> {
        if !exposure_ms.is_finite() || exposure_ms < 0.0 {
            return Err(Error::InvalidExposure(exposure_ms))
        }
        let mut channels = Vec::with_capacity(calibration.channels.len());
        for calib in calibration.channels.iter() {
            let width_ms = exposure_ms - calib.width_offset_ms(exposure_ms);
            log::debug!("{} gate width set to {:.3} ms, delay {:.3} ms",
                calib.channel, width_ms, calib.delay.ms());
            let timing = ChannelTiming {
                width: to_device_units(width_ms)
                    .map_err(|_| Error::InvalidExposure(exposure_ms))?,
                delay: to_device_units(calib.delay.ms())?,
            };
            channels.push((calib.channel, timing));
        }
        log::debug!("quantity set to {}", GATE_QUANTITY);
        Ok(GatePlan { channels, quantity: GATE_QUANTITY })
    }

    pub fn timing(&self, channel: Channel) -> Option<ChannelTiming> {
        self.channels.iter()
            .find(|&&(ch, _)| ch == channel)
            .map(|&(_, timing)| timing)
    }
}
