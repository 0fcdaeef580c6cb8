//! Register address map of the gate generator, declared as data.
//!
//! The sequencer only ever looks addresses up through a [`RegisterMap`], so enabling the
//! auxiliary channel or moving a register is a configuration change.

pub mod pilc;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use pilc::Status;

/// Logical gate output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Shutter,
    /// Keithley electrometer or CCD.
    Detector,
    Auxiliary,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Shutter, Channel::Detector, Channel::Auxiliary];

    pub fn name(self) -> &'static str {
        match self {
            Self::Shutter   => "shutter",
            Self::Detector  => "detector",
            Self::Auxiliary => "auxiliary",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text {
            "shutter" => Ok(Self::Shutter),
            "detector" | "keithley" | "ccd" => Ok(Self::Detector),
            "auxiliary" | "moench" => Ok(Self::Auxiliary),
            _ => Err(Error::Config(format!("unknown channel {:?}", text))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRegisters {
    pub channel: Channel,
    pub width: u8,
    pub delay: u8,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    pub mode_select: u8,
    pub status: u8,
    pub quantity: u8,
    /// Channels in the order their registers are written.
    pub channels: Vec<ChannelRegisters>,
}

impl Default for RegisterMap {
    fn default() -> Self {
        RegisterMap {
            mode_select: pilc::ADDR_MODE_SELECT,
            status: pilc::ADDR_STATUS,
            quantity: pilc::ADDR_QUANTITY,
            channels: vec![
                ChannelRegisters {
                    channel: Channel::Shutter,
                    width: pilc::ADDR_SHUTTER_WIDTH,
                    delay: pilc::ADDR_SHUTTER_DELAY,
                    enabled: true,
                },
                ChannelRegisters {
                    channel: Channel::Detector,
                    width: pilc::ADDR_DETECTOR_WIDTH,
                    delay: pilc::ADDR_DETECTOR_DELAY,
                    enabled: true,
                },
                ChannelRegisters {
                    channel: Channel::Auxiliary,
                    width: pilc::ADDR_AUXILIARY_WIDTH,
                    delay: pilc::ADDR_AUXILIARY_DELAY,
                    enabled: false,
                },
            ],
        }
    }
}

impl RegisterMap {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelRegisters> {
        self.channels.iter().find(|regs| regs.channel == channel)
    }

    pub fn enabled_channels(&self) -> impl Iterator<Item = &ChannelRegisters> {
        self.channels.iter().filter(|regs| regs.enabled)
    }

    pub fn validate(&self) -> Result<()> {
        let mut addresses = vec![self.mode_select, self.status, self.quantity];
        for (index, regs) in self.channels.iter().enumerate() {
            if self.channels[..index].iter().any(|other| other.channel == regs.channel) {
                return Err(Error::Config(format!("channel {} mapped twice", regs.channel)))
            }
            addresses.push(regs.width);
            addresses.push(regs.delay);
        }
        addresses.sort_unstable();
        if let Some(pair) = addresses.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(Error::Config(format!("register {:#04x} mapped twice", pair[0])))
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_matches_gateware() {
        let map = RegisterMap::default();
        map.validate().unwrap();
        assert_eq!(0x01, map.mode_select);
        assert_eq!(0x06, map.status);
        let addrs = map.enabled_channels().map(|regs| (regs.width, regs.delay)).collect::<Vec<_>>();
        assert_eq!(vec![(0x03, 0x07), (0x09, 0x0B)], addrs);
        assert_eq!(Some(0x0D), map.channel(Channel::Auxiliary).map(|regs| regs.width));
    }

    #[test]
    fn duplicate_address_is_rejected() {
        let mut map = RegisterMap::default();
        map.channels[1].delay = pilc::ADDR_SHUTTER_DELAY;
        assert!(matches!(map.validate(), Err(Error::Config(_))));
    }

    #[rstest::rstest]
    #[test]
    #[case(Channel::Shutter, "shutter")]
    #[case(Channel::Detector, "keithley")]
    #[case(Channel::Auxiliary, "auxiliary")]
    fn parse_channel(#[case] expect: Channel, #[case] text: &str) {
        assert_eq!(expect, text.parse::<Channel>().unwrap());
    }
}
