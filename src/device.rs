use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::DeviceConfiguration;
use crate::mode::{Mode, ModeTable};
use crate::params::{CalibrationTable, DelaySource, GatePlan};
use crate::regs::Channel;
use crate::sequencer;
use crate::store::{self, MemoryStore, ParameterStore};
use crate::sys::{is_connection_lost, RegisterPort};
use crate::units::{quantize_exposure, to_device_units};
use crate::{Error, Result};

/// Exposure reported before one has ever been set.
pub const UNSET_EXPOSURE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Idle,
    Busy,
    Disconnected,
}

/// Stage of [`Device::acquire`], reported when one of them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stop,
    Prepare,
    Start,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Stop    => write!(f, "stop"),
            Self::Prepare => write!(f, "prepare"),
            Self::Start   => write!(f, "start"),
        }
    }
}

struct State<P> {
    port: P,
    connected: bool,
    exposure: f64,
    mode: Mode,
    calibration: CalibrationTable,
    store: Box<dyn ParameterStore>,
}

/// Acquisition controller for one gate generator.
///
/// Every operation takes the same lock, so a status poll never observes a half-written gate
/// plan and concurrent callers are serialized.
pub struct Device<P: RegisterPort> {
    config: DeviceConfiguration,
    state: Mutex<State<P>>,
}

impl<P: RegisterPort> fmt::Debug for Device<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Device")
            .field("variant", &self.config.variant)
            .field("connected", &state.connected)
            .field("exposure", &state.exposure)
            .field("mode", &state.mode.name())
            .finish_non_exhaustive()
    }
}

fn lost_connection(error: &Error) -> bool {
    match error {
        Error::Port { source, .. } => is_connection_lost(source),
        Error::Step { source, .. } => lost_connection(source),
        _ => false,
    }
}

// Quantize `ms` and make sure the result fits the width registers.
fn checked_exposure(config: &DeviceConfiguration, ms: f64) -> Result<f64> {
    let quantization = config.quantization;
    let exposure = quantize_exposure(ms, quantization.step_ms, quantization.rounding)?;
    to_device_units(exposure).map_err(|_| Error::InvalidExposure(ms))?;
    Ok(exposure)
}

impl<P: RegisterPort> Device<P> {
    /// Controller whose memorized settings live only as long as it does.
    pub fn new(port: P, config: DeviceConfiguration) -> Device<P> {
        Device::with_store(port, config, Box::new(MemoryStore::new()))
    }

    /// Restore memorized settings from `persisted` and probe the port.
    ///
    /// An unreachable port does not fail construction; the device starts out disconnected.
    pub fn with_store(mut port: P, config: DeviceConfiguration, persisted: Box<dyn ParameterStore>) -> Device<P> {
        let connected = match sequencer::read_status(&config.registers, &mut port) {
            Ok(_) => {
                log::info!("connected to gate generator");
                true
            }
            Err(error) => {
                log::error!("could not connect to gate generator: {}", error);
                false
            }
        };

        let exposure = match store::load_or_default(&*persisted, store::KEY_EXPOSURE, UNSET_EXPOSURE) {
            ms if ms == UNSET_EXPOSURE => UNSET_EXPOSURE,
            ms => checked_exposure(&config, ms)
                .unwrap_or_else(|error| {
                    log::warn!("discarding persisted exposure: {}", error);
                    UNSET_EXPOSURE
                }),
        };

        let mode_id = store::load_or_default(&*persisted, store::KEY_MODE, 0i64);
        let mode = config.modes.validate(mode_id).unwrap_or_else(|error| {
            log::warn!("discarding persisted mode: {}", error);
            config.modes.default_mode().clone()
        });

        let mut calibration = config.calibration.clone();
        let mut memorized_delays = Vec::new();
        for calib in config.calibration.channels.iter() {
            if let DelaySource::Operator { ms } = calib.delay {
                let key = store::delay_key(calib.channel);
                let memorized = matches!(persisted.load(&key), Ok(Some(_)));
                let delay_ms = store::load_or_default(&*persisted, &key, ms);
                match calibration.set_operator_delay(calib.channel, delay_ms) {
                    Ok(_) if memorized => memorized_delays.push((calib.channel, delay_ms)),
                    Ok(_) => (),
                    Err(error) => log::warn!("discarding persisted {}: {}", key, error),
                }
            }
        }

        // Memorized delays are hardware settings; the registers hold them from startup on.
        if connected {
            for (channel, delay_ms) in memorized_delays {
                if let Err(error) = sequencer::write_delay(channel, delay_ms, &config.registers, &mut port) {
                    log::warn!("could not restore {} gate delay: {}", channel, error);
                }
            }
        }

        log::debug!("restored exposure {} ms, mode {}", exposure, mode);
        Device {
            config,
            state: Mutex::new(State { port, connected, exposure, mode, calibration, store: persisted }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Runs `f` against a connected port; a transport failure marks the device disconnected.
    fn with_port<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&DeviceConfiguration, &mut State<P>) -> Result<T>
    {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::PortUnavailable)
        }
        let result = f(&self.config, &mut *state);
        if let Err(error) = &result {
            if lost_connection(error) {
                log::error!("lost connection to gate generator: {}", error);
                state.connected = false;
            }
        }
        result
    }

    pub fn config(&self) -> &DeviceConfiguration {
        &self.config
    }

    pub fn modes(&self) -> &ModeTable {
        &self.config.modes
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Current exposure in ms, or [`UNSET_EXPOSURE`].
    pub fn exposure(&self) -> f64 {
        self.lock().exposure
    }

    /// Quantize and store an exposure, returning the stored value. Does not touch hardware.
    pub fn set_exposure(&self, ms: f64) -> Result<f64> {
        let exposure = checked_exposure(&self.config, ms)?;
        let mut state = self.lock();
        state.exposure = exposure;
        state.memorize(store::KEY_EXPOSURE, &exposure);
        log::debug!("exposure set to {} ms", exposure);
        Ok(exposure)
    }

    pub fn mode(&self) -> Mode {
        self.lock().mode.clone()
    }

    /// Validate and store a mode. Does not touch hardware.
    pub fn set_mode(&self, mode_id: i64) -> Result<Mode> {
        let mode = self.config.modes.validate(mode_id)?;
        let mut state = self.lock();
        state.mode = mode.clone();
        state.memorize(store::KEY_MODE, &mode_id);
        log::debug!("mode set to {}", mode);
        Ok(mode)
    }

    /// Delay currently programmed into the hardware for `channel`, in ms.
    pub fn channel_delay(&self, channel: Channel) -> Result<f64> {
        self.with_port(|config, state| {
            sequencer::read_delay(channel, &config.registers, &mut state.port)
        })
    }

    /// Program an operator-settable delay and use it for subsequent plans.
    pub fn set_channel_delay(&self, channel: Channel, delay_ms: f64) -> Result<()> {
        self.with_port(|config, state| {
            let mut calibration = state.calibration.clone();
            calibration.set_operator_delay(channel, delay_ms)?;
            sequencer::write_delay(channel, delay_ms, &config.registers, &mut state.port)?;
            state.calibration = calibration;
            state.memorize(&store::delay_key(channel), &delay_ms);
            log::debug!("{} gate delay set to {} ms", channel, delay_ms);
            Ok(())
        })
    }

    pub fn stop(&self) -> Result<()> {
        self.with_port(|config, state| state.stop(config))
    }

    /// Compute a fresh gate plan from the current exposure and write it.
    pub fn prepare(&self) -> Result<()> {
        self.with_port(|config, state| state.prepare(config))
    }

    /// Select the current mode. Nothing checks that a plan was prepared first; the generator
    /// runs with whatever widths its registers hold.
    pub fn start(&self) -> Result<()> {
        self.with_port(|config, state| state.start(config))
    }

    /// Stop, prepare and start under one lock. The first failing step aborts the rest.
    pub fn acquire(&self) -> Result<()> {
        self.with_port(|config, state| {
            log::debug!("Acquire");
            state.stop(config).map_err(|error| error.at(Step::Stop))?;
            state.prepare(config).map_err(|error| error.at(Step::Prepare))?;
            state.start(config).map_err(|error| error.at(Step::Start))?;
            Ok(())
        })
    }

    /// Poll the status register. A failed read leaves the device disconnected.
    pub fn status(&self) -> DeviceStatus {
        let mut state = self.lock();
        if !state.connected {
            return DeviceStatus::Disconnected
        }
        match sequencer::read_status(&self.config.registers, &mut state.port) {
            Ok(status) if status.is_busy() => DeviceStatus::Busy,
            Ok(_) => DeviceStatus::Idle,
            Err(error) => {
                log::error!("status poll failed: {}", error);
                state.connected = false;
                DeviceStatus::Disconnected
            }
        }
    }

    /// Whether an alarm was raised since the last reset.
    pub fn alarm_detected(&self) -> Result<bool> {
        self.with_port(|config, state| {
            Ok(sequencer::read_status(&config.registers, &mut state.port)?.is_alarm())
        })
    }

    /// Re-establish the port and clear the disconnected state if the status register answers.
    pub fn reconnect(&self) -> Result<()> {
        let mut state = self.lock();
        state.port.reconnect()?;
        sequencer::read_status(&self.config.registers, &mut state.port)?;
        if !state.connected {
            log::info!("reconnected to gate generator");
        }
        state.connected = true;
        Ok(())
    }
}

impl<P: RegisterPort> State<P> {
    fn stop(&mut self, config: &DeviceConfiguration) -> Result<()> {
        log::debug!("Stop");
        sequencer::halt(&config.registers, &mut self.port)
    }

    fn prepare(&mut self, config: &DeviceConfiguration) -> Result<()> {
        let plan = GatePlan::compute(self.exposure, &self.calibration)?;
        sequencer::apply(&plan, &config.registers, &mut self.port)
    }

    fn start(&mut self, config: &DeviceConfiguration) -> Result<()> {
        log::debug!("Start in {} mode", self.mode);
        sequencer::select_mode(&self.mode, &config.registers, &mut self.port)
    }

    fn memorize<T: serde::Serialize>(&mut self, key: &str, value: &T) {
        if let Err(error) = store::save_value(&mut *self.store, key, value) {
            log::warn!("could not persist {}: {}", key, error);
        }
    }
}

impl Error {
    fn at(self, step: Step) -> Error {
        Error::Step { step, source: Box::new(self) }
    }
}
