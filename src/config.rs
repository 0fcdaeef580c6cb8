//! Deployment configuration: which gateware revision is attached and how it is calibrated.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::mode::ModeTable;
use crate::params::CalibrationTable;
use crate::regs::RegisterMap;
use crate::units::Rounding;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Three modes, exposure in 10 ms steps, fixed detector delay.
    #[default]
    Legacy,
    /// Five modes, microsecond exposure, operator-set delays.
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantization {
    pub step_ms: f64,
    #[serde(default)]
    pub rounding: Rounding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfiguration {
    pub variant: Variant,
    pub quantization: Quantization,
    pub modes: ModeTable,
    pub calibration: CalibrationTable,
    pub registers: RegisterMap,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        DeviceConfiguration::legacy()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigurationFile {
    #[serde(default)]
    variant: Variant,
    quantization: Option<Quantization>,
    modes: Option<ModeTable>,
    calibration: Option<CalibrationTable>,
    registers: Option<RegisterMap>,
}

impl DeviceConfiguration {
    pub fn legacy() -> DeviceConfiguration {
        DeviceConfiguration {
            variant: Variant::Legacy,
            quantization: Quantization { step_ms: 10.0, rounding: Rounding::HalfAwayFromZero },
            modes: ModeTable::legacy(),
            calibration: CalibrationTable::legacy(),
            registers: RegisterMap::default(),
        }
    }

    pub fn extended() -> DeviceConfiguration {
        DeviceConfiguration {
            variant: Variant::Extended,
            quantization: Quantization { step_ms: 0.001, rounding: Rounding::HalfEven },
            modes: ModeTable::extended(),
            calibration: CalibrationTable::extended(),
            registers: RegisterMap::default(),
        }
    }

    pub fn for_variant(variant: Variant) -> DeviceConfiguration {
        match variant {
            Variant::Legacy   => DeviceConfiguration::legacy(),
            Variant::Extended => DeviceConfiguration::extended(),
        }
    }

    /// Parse a TOML document. `variant` picks the preset; any other table replaces that part of
    /// the preset wholesale.
    ///
    /// ```toml
    /// variant = "extended"
    ///
    /// [quantization]
    /// step_ms = 0.01
    /// rounding = "half_away_from_zero"
    /// ```
    pub fn from_toml_str(text: &str) -> Result<DeviceConfiguration> {
        let file: ConfigurationFile = toml::from_str(text)
            .map_err(|error| Error::Config(error.to_string()))?;
        let mut config = DeviceConfiguration::for_variant(file.variant);
        if let Some(quantization) = file.quantization {
            config.quantization = quantization;
        }
        if let Some(modes) = file.modes {
            config.modes = modes;
        }
        if let Some(calibration) = file.calibration {
            config.calibration = calibration;
        }
        if let Some(registers) = file.registers {
            config.registers = registers;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<DeviceConfiguration> {
        let text = fs::read_to_string(path.as_ref())?;
        log::debug!("loading configuration from {}", path.as_ref().display());
        DeviceConfiguration::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let step_ms = self.quantization.step_ms;
        if !step_ms.is_finite() || step_ms <= 0.0 {
            return Err(Error::Config(format!("quantization step must be positive, got {}", step_ms)))
        }
        self.registers.validate()?;
        self.calibration.validate()?;
        for regs in self.registers.enabled_channels() {
            if self.calibration.channel(regs.channel).is_none() {
                return Err(Error::Config(format!("{} channel is enabled but not calibrated", regs.channel)))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::DelaySource;
    use crate::regs::Channel;

    #[test]
    fn presets_are_valid() {
        DeviceConfiguration::legacy().validate().unwrap();
        DeviceConfiguration::extended().validate().unwrap();
        assert_eq!(DeviceConfiguration::legacy(), DeviceConfiguration::default());
    }

    #[rstest::rstest]
    #[test]
    #[case(Variant::Legacy, "")]
    #[case(Variant::Legacy, "variant = \"legacy\"")]
    #[case(Variant::Extended, "variant = \"extended\"")]
    fn variant_selects_preset(#[case] variant: Variant, #[case] text: &str) {
        let config = DeviceConfiguration::from_toml_str(text).unwrap();
        assert_eq!(DeviceConfiguration::for_variant(variant), config);
    }

    #[test]
    fn overrides_replace_preset_parts() {
        let config = DeviceConfiguration::from_toml_str(r#"
            variant = "extended"
            modes = ["freerunning", "triggered_laser"]

            [quantization]
            step_ms = 0.01
            rounding = "half_away_from_zero"

            [[calibration.channels]]
            channel = "shutter"
            delay = { source = "fixed", ms = 0.5 }
            width_compensation = [
                { min_exposure_ms = 100.0, offset_ms = 12.0 },
            ]

            [[calibration.channels]]
            channel = "detector"
            delay = { source = "operator", ms = 4.0 }
        "#).unwrap();
        assert_eq!(Variant::Extended, config.variant);
        assert_eq!(2, config.modes.len());
        assert_eq!(Quantization { step_ms: 0.01, rounding: Rounding::HalfAwayFromZero }, config.quantization);
        let shutter = config.calibration.channel(Channel::Shutter).unwrap();
        assert_eq!(DelaySource::Fixed { ms: 0.5 }, shutter.delay);
        assert_eq!(12.0, shutter.width_offset_ms(150.0));
        assert_eq!(RegisterMap::default(), config.registers);
    }

    #[test]
    fn enabling_uncalibrated_channel_is_rejected() {
        let result = DeviceConfiguration::from_toml_str(r#"
            [[calibration.channels]]
            channel = "shutter"
            delay = { source = "fixed", ms = 0.0 }
        "#);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[rstest::rstest]
    #[test]
    #[case("variant = \"turbo\"")]
    #[case("exposure = 10")]
    #[case("[quantization]\nstep_ms = 0.0")]
    fn bad_documents(#[case] text: &str) {
        assert!(matches!(DeviceConfiguration::from_toml_str(text), Err(Error::Config(_))));
    }
}
