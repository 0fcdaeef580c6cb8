//! Triggering modes known to a given gateware revision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hardware code written to the mode-select register to halt gate generation.
pub const STOPPED_CODE: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mode {
    identifier: u32,
    name: String,
}

impl Mode {
    pub fn identifier(&self) -> u32 {
        self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the mode-select register that runs this mode. Code 0 is reserved for "stopped".
    pub fn hardware_code(&self) -> u32 {
        self.identifier + 1
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The closed set of modes for one deployment. Identifiers are positions in the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ModeTable {
    modes: Vec<Mode>,
}

impl ModeTable {
    pub fn new<I, S>(names: I) -> Result<ModeTable>
        where I: IntoIterator<Item = S>, S: Into<String>
    {
        let modes = names.into_iter()
            .enumerate()
            .map(|(index, name)| Mode { identifier: index as u32, name: name.into() })
            .collect::<Vec<_>>();
        if modes.is_empty() {
            return Err(Error::Config("mode table is empty".to_owned()))
        }
        for (index, mode) in modes.iter().enumerate() {
            if modes[..index].iter().any(|other| other.name == mode.name) {
                return Err(Error::Config(format!("mode {:?} declared twice", mode.name)))
            }
        }
        Ok(ModeTable { modes })
    }

    /// Gateware with a single laser/CCD trigger input.
    pub fn legacy() -> ModeTable {
        ModeTable::from_static(&[
            "freerunning",
            "triggered_laser",
            "triggered_laser_ccd",
        ])
    }

    /// Gateware with separate scattering/NEXAFS CCD inputs and a chopper input.
    pub fn extended() -> ModeTable {
        ModeTable::from_static(&[
            "freerunning",
            "triggered_laser",
            "triggered_laser_ccd_scattering",
            "triggered_laser_ccd_nexafs",
            "triggered_laser_chopper_scattering",
        ])
    }

    fn from_static(names: &[&str]) -> ModeTable {
        ModeTable {
            modes: names.iter()
                .enumerate()
                .map(|(index, &name)| Mode { identifier: index as u32, name: name.to_owned() })
                .collect()
        }
    }

    pub fn validate(&self, mode_id: i64) -> Result<Mode> {
        usize::try_from(mode_id).ok()
            .and_then(|index| self.modes.get(index))
            .cloned()
            .ok_or(Error::InvalidMode(mode_id))
    }

    pub fn by_name(&self, name: &str) -> Option<&Mode> {
        self.modes.iter().find(|mode| mode.name == name)
    }

    /// Parse either a mode name or a numeric identifier.
    pub fn parse(&self, text: &str) -> Result<Mode> {
        if let Some(mode) = self.by_name(text) {
            return Ok(mode.clone())
        }
        match text.parse::<i64>() {
            Ok(mode_id) => self.validate(mode_id),
            Err(_) => Err(Error::UnknownModeName(text.to_owned())),
        }
    }

    pub fn default_mode(&self) -> &Mode {
        &self.modes[0]
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mode> {
        self.modes.iter()
    }
}

impl TryFrom<Vec<String>> for ModeTable {
    type Error = Error;

    fn try_from(names: Vec<String>) -> Result<Self> {
        ModeTable::new(names)
    }
}

impl From<ModeTable> for Vec<String> {
    fn from(table: ModeTable) -> Self {
        table.modes.into_iter().map(|mode| mode.name).collect()
    }
}
