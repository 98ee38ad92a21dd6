use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use fluidlink_frame::{opcode_name, Payload};

use crate::factory::{SequenceParams, SequenceTemplate};

/// A controller command waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub opcode: u8,
    pub payload: Payload,
    pub description: String,
}

impl CommandTemplate {
    pub fn new(opcode: u8, payload: Payload, description: impl Into<String>) -> Self {
        Self {
            opcode,
            payload,
            description: description.into(),
        }
    }
}

/// One step of a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subsequence {
    /// Completes when the controller acknowledges the command.
    McuCommand(CommandTemplate),
    /// Completes after a host-side delay.
    Stopwatch(Duration),
}

impl fmt::Display for Subsequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::McuCommand(command) => write!(
                f,
                "{}: {}",
                opcode_name(command.opcode),
                command.description
            ),
            Self::Stopwatch(duration) => write!(f, "wait {:.1} s", duration.as_secs_f64()),
        }
    }
}

/// A named run of steps built from one template and one parameter set.
#[derive(Debug, Clone)]
pub struct Sequence {
    pub name: String,
    pub template: SequenceTemplate,
    pub params: SequenceParams,
    /// 1-based repetition number.
    pub round: u32,
    pub is_single_round: bool,
    /// Set for pre-use checks; names the port being checked.
    pub port_name: Option<String>,
    steps: VecDeque<Subsequence>,
}

impl Sequence {
    pub fn new(
        name: impl Into<String>,
        template: SequenceTemplate,
        params: SequenceParams,
        steps: impl IntoIterator<Item = Subsequence>,
    ) -> Self {
        Self {
            name: name.into(),
            template,
            params,
            round: 1,
            is_single_round: true,
            port_name: None,
            steps: steps.into_iter().collect(),
        }
    }

    pub fn with_round(mut self, round: u32, is_single_round: bool) -> Self {
        self.round = round;
        self.is_single_round = is_single_round;
        self
    }

    pub fn with_port_name(mut self, port_name: impl Into<String>) -> Self {
        self.port_name = Some(port_name.into());
        self
    }

    /// Remove and return the next step.
    pub fn next_step(&mut self) -> Option<Subsequence> {
        self.steps.pop_front()
    }

    /// Put a step back at the front.
    pub(crate) fn push_front(&mut self, step: Subsequence) {
        self.steps.push_front(step);
    }

    /// Steps not yet started.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> impl Iterator<Item = &Subsequence> {
        self.steps.iter()
    }

    /// Drop every step not yet started.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Name with the round number for multi-round protocols.
    pub fn label(&self) -> String {
        if self.is_single_round {
            self.name.clone()
        } else {
            format!("{} (round {})", self.name, self.round)
        }
    }
}

#[cfg(test)]
mod tests {
    use fluidlink_frame::opcode;

    use super::*;

    fn sample() -> Sequence {
        Sequence::new(
            "Hybridize",
            SequenceTemplate::FillIncubateDrain,
            SequenceParams::default(),
            [
                Subsequence::McuCommand(CommandTemplate::new(
                    opcode::ADD_MEDIUM,
                    Payload::new(),
                    "add",
                )),
                Subsequence::Stopwatch(Duration::from_secs(60)),
            ],
        )
    }

    #[test]
    fn steps_are_consumed_in_order() {
        let mut sequence = sample();
        assert_eq!(sequence.remaining(), 2);

        assert!(matches!(
            sequence.next_step(),
            Some(Subsequence::McuCommand(_))
        ));
        assert_eq!(
            sequence.next_step(),
            Some(Subsequence::Stopwatch(Duration::from_secs(60)))
        );
        assert!(sequence.next_step().is_none());
    }

    #[test]
    fn label_shows_round_for_multi_round() {
        let single = sample();
        assert_eq!(single.label(), "Hybridize");

        let multi = sample().with_round(2, false);
        assert_eq!(multi.label(), "Hybridize (round 2)");
    }

    #[test]
    fn display_names_opcode() {
        let step = Subsequence::McuCommand(CommandTemplate::new(
            opcode::REMOVE_MEDIUM,
            Payload::new(),
            "aspirate",
        ));
        assert_eq!(step.to_string(), "REMOVE_MEDIUM: aspirate");
        assert_eq!(
            Subsequence::Stopwatch(Duration::from_millis(1500)).to_string(),
            "wait 1.5 s"
        );
    }
}
