/// Timeline reconstruction
///
/// Walks the parsed steps accumulating programmed time and derives the two
/// quantities that anchor program time to the table's elapsed-time column:
///   - the pre-roll offset added to the table's first timestamp
///   - the right-margin compensation at each cycle boundary: the length of
///     the isothermal settle hold that opens the next cycle, during which
///     the instrument is not yet acquiring cycle data

use serde::{Deserialize, Serialize};

use crate::data::method::{MethodProgram, StepKind};

/// Programmed time span of one cycle, in minutes from program start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSpan {
    pub number: usize,
    pub start: f64,
    pub end: f64,
    /// Duration of the isothermal hold opening this cycle (0 if none)
    pub opening_hold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Pre-roll hold before the first ramp, in minutes
    pub preroll: f64,
    pub spans: Vec<CycleSpan>,
    /// Total programmed duration
    pub total: f64,
}

impl Timeline {
    pub fn reconstruct(program: &MethodProgram) -> Self {
        let steps = &program.steps;

        // offsets[i] = programmed time at which step i begins
        let mut offsets = Vec::with_capacity(steps.len() + 1);
        let mut elapsed = 0.0;
        for step in steps {
            offsets.push(elapsed);
            elapsed += step.duration;
        }
        offsets.push(elapsed);

        let preroll = steps
            .iter()
            .take_while(|s| s.kind != StepKind::Ramp)
            .find(|s| s.kind == StepKind::Isothermal)
            .map(|s| s.duration)
            .unwrap_or(0.0);

        let spans = program
            .cycles
            .iter()
            .map(|cycle| {
                let first = cycle.steps.first().copied().unwrap_or(0);
                let last = cycle.steps.last().copied().unwrap_or(first);
                CycleSpan {
                    number: cycle.number,
                    start: offsets[first.min(steps.len())],
                    end: offsets[(last + 1).min(steps.len())],
                    opening_hold: cycle.opening_hold(steps).map(|s| s.duration).unwrap_or(0.0),
                }
            })
            .collect::<Vec<_>>();

        log::debug!(
            "Timeline: pre-roll {:.3} min, {} cycle(s), {:.3} min programmed",
            preroll,
            spans.len(),
            elapsed
        );

        Self {
            preroll,
            spans,
            total: elapsed,
        }
    }

    /// Elapsed time at which the first cycle's acquisition starts
    pub fn initial_elapsed(&self, first_timestamp: f64) -> f64 {
        first_timestamp + self.preroll
    }

    /// Compensation subtracted from the right edge of region `k` (0-based):
    /// the opening hold of the following cycle.
    pub fn boundary_compensation(&self, k: usize) -> f64 {
        match self.spans.get(k + 1) {
            Some(span) => span.opening_hold,
            None => {
                log::debug!(
                    "No cycle {} in the method program; boundary after region {} uncompensated",
                    k + 2,
                    k + 1
                );
                0.0
            }
        }
    }

    pub fn cycle_count(&self) -> usize {
        self.spans.len()
    }
}
