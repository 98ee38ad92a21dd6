//! Plan files: rig defaults plus an ordered list of protocol entries.
//!
//! ```json
//! {
//!   "defaults": { "pressure_setpoint_psi": 4.5 },
//!   "sequences": [
//!     { "template": "fill_incubate_drain", "name": "Hybridize", "repeat": 2,
//!       "fluidic_port": 3, "flow_time_s": 10, "incubation_time_min": 5 }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use fluidlink_sequence::{
    FactoryError, FluidicsDefaults, Sequence, SequenceFactory, SequenceParams, SequenceTemplate,
};
use serde::{Deserialize, Serialize};

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub defaults: FluidicsDefaults,
    pub sequences: Vec<PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub template: SequenceTemplate,
    /// Rounds to build; 0 skips the entry.
    #[serde(default = "one")]
    pub repeat: u32,
    #[serde(flatten)]
    pub params: SequenceParams,
}

fn one() -> u32 {
    1
}

impl Plan {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
        Self::parse(&text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("{}: {err}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Expand every entry into sequences, in plan order.
    pub fn expand(&self) -> Result<Vec<Sequence>, FactoryError> {
        let factory = SequenceFactory::new(self.defaults.clone());
        let mut sequences = Vec::new();
        for entry in &self.sequences {
            sequences.extend(factory.build_rounds(entry.template, &entry.params, entry.repeat)?);
        }
        Ok(sequences)
    }
}
