/// Method program parser
///
/// Instrument exports carry one `OrgMethod` line per program step, e.g.
///   - `Equilibrate at 40.00 °C`
///   - `Ramp 10.00 °C/min to 200.00 °C`
///   - `Isothermal for 5.00 min`
///   - `Mark end of cycle 1`
///
/// Every line becomes exactly one Step, so step indices always match the
/// source line order. Lines that cannot be interpreted degrade to a
/// zero-length no-op step and are reported as a ParseError diagnostic.
///
/// Steps are grouped into Cycles; each Cycle ends with (and includes) its
/// Mark step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of a program step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Drive the cell to a target temperature (no acquisition time)
    Equilibrate,
    /// Linear heating or cooling at a fixed gradient
    Ramp,
    /// Hold the current temperature for a number of minutes
    Isothermal,
    /// Cycle delimiter
    Mark,
    /// Unrecognised or malformed line, kept for index alignment
    NoOp,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::Equilibrate => write!(f, "Equilibrate"),
            StepKind::Ramp => write!(f, "Ramp"),
            StepKind::Isothermal => write!(f, "Isothermal"),
            StepKind::Mark => write!(f, "Mark"),
            StepKind::NoOp => write!(f, "No-op"),
        }
    }
}

/// One parsed program step. Temperatures in °C, gradient in °C/min,
/// duration in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub index: usize,
    pub kind: StepKind,
    pub start_temp: f64,
    pub end_temp: f64,
    pub gradient: f64,
    pub duration: f64,
}

impl Step {
    fn hold(index: usize, kind: StepKind, temp: f64, duration: f64) -> Self {
        Self {
            index,
            kind,
            start_temp: temp,
            end_temp: temp,
            gradient: 0.0,
            duration,
        }
    }
}

/// A Mark-terminated group of steps (indices into `MethodProgram::steps`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// 1-based cycle number
    pub number: usize,
    pub steps: Vec<usize>,
}

impl Cycle {
    /// The isothermal hold that opens this cycle: the first Isothermal step
    /// before the cycle's first Ramp.
    pub fn opening_hold<'a>(&self, steps: &'a [Step]) -> Option<&'a Step> {
        self.steps
            .iter()
            .filter_map(|&i| steps.get(i))
            .take_while(|s| s.kind != StepKind::Ramp)
            .find(|s| s.kind == StepKind::Isothermal)
    }

    /// Total programmed duration of the cycle in minutes
    pub fn duration(&self, steps: &[Step]) -> f64 {
        self.steps
            .iter()
            .filter_map(|&i| steps.get(i))
            .map(|s| s.duration)
            .sum()
    }
}

/// Non-fatal problem found while parsing a program line
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("step {step}: unrecognised program line \"{text}\"")]
    UnknownStep { step: usize, text: String },
    #[error("step {step}: {kind} needs {expected} numeric value(s), found {found}")]
    MissingValue {
        step: usize,
        kind: StepKind,
        expected: usize,
        found: usize,
    },
    #[error("step {step}: ramp with zero gradient, duration set to 0")]
    ZeroGradient { step: usize },
    #[error("step {step}: negative hold duration {value}")]
    NegativeDuration { step: usize, value: f64 },
}

/// Parsed method program
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodProgram {
    pub steps: Vec<Step>,
    pub cycles: Vec<Cycle>,
    /// Steps after the last Mark (not part of any cycle)
    pub trailing: Vec<usize>,
    #[serde(skip)]
    pub issues: Vec<ParseError>,
}

impl MethodProgram {
    /// Parse program lines (the text after `OrgMethod…:`), in order.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut program = MethodProgram::default();
        let mut cursor = 0.0;
        let mut open: Vec<usize> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            let step = parse_step(index, line.as_ref(), cursor, &mut program.issues);
            log::debug!(
                "Step {}: {} {:.2} -> {:.2} °C, {:.2} °C/min, {:.3} min",
                step.index,
                step.kind,
                step.start_temp,
                step.end_temp,
                step.gradient,
                step.duration
            );
            cursor = step.end_temp;
            open.push(index);
            if step.kind == StepKind::Mark {
                program.cycles.push(Cycle {
                    number: program.cycles.len() + 1,
                    steps: std::mem::take(&mut open),
                });
            }
            program.steps.push(step);
        }

        if !open.is_empty() {
            log::debug!("{} step(s) after the last Mark are not part of a cycle", open.len());
        }
        program.trailing = open;
        program
    }

    pub fn mark_count(&self) -> usize {
        self.steps.iter().filter(|s| s.kind == StepKind::Mark).count()
    }

    /// Total programmed time in minutes
    pub fn total_duration(&self) -> f64 {
        self.steps.iter().map(|s| s.duration).sum()
    }
}

fn classify(text: &str) -> Option<StepKind> {
    if text.contains("Equilibrate") {
        Some(StepKind::Equilibrate)
    } else if text.contains("Ramp") {
        Some(StepKind::Ramp)
    } else if text.contains("Isothermal") {
        Some(StepKind::Isothermal)
    } else if text.contains("Mark") {
        Some(StepKind::Mark)
    } else {
        None
    }
}

fn parse_step(index: usize, text: &str, cursor: f64, issues: &mut Vec<ParseError>) -> Step {
    let mut report = |issue: ParseError| {
        log::warn!("Method program: {}", issue);
        issues.push(issue);
    };
    let values = tokenize_numbers(text);
    let no_op = Step::hold(index, StepKind::NoOp, cursor, 0.0);

    let kind = match classify(text) {
        Some(kind) => kind,
        None => {
            report(ParseError::UnknownStep {
                step: index,
                text: text.trim().to_string(),
            });
            return no_op;
        }
    };

    let expected = match kind {
        StepKind::Ramp => 2,
        StepKind::Equilibrate | StepKind::Isothermal => 1,
        StepKind::Mark | StepKind::NoOp => 0,
    };
    if values.len() < expected {
        report(ParseError::MissingValue {
            step: index,
            kind,
            expected,
            found: values.len(),
        });
        return no_op;
    }

    match kind {
        StepKind::Equilibrate => Step {
            index,
            kind,
            start_temp: cursor,
            end_temp: values[0],
            gradient: 0.0,
            duration: 0.0,
        },
        StepKind::Ramp => {
            let rate = values[0].abs();
            let target = values[1];
            let gradient = if target > cursor { rate } else { -rate };
            let duration = if rate == 0.0 {
                report(ParseError::ZeroGradient { step: index });
                0.0
            } else {
                (target - cursor).abs() / rate
            };
            Step {
                index,
                kind,
                start_temp: cursor,
                end_temp: target,
                gradient,
                duration,
            }
        }
        StepKind::Isothermal => {
            if values[0] < 0.0 {
                report(ParseError::NegativeDuration {
                    step: index,
                    value: values[0],
                });
                return no_op;
            }
            Step::hold(index, kind, cursor, values[0])
        }
        StepKind::Mark | StepKind::NoOp => Step::hold(index, kind, cursor, 0.0),
    }
}

/// Extract every signed decimal number from a line, in order.
///
/// Units and words are ignored. A `-`/`+` directly after a letter or digit
/// is treated as a hyphen, not a sign.
pub fn tokenize_numbers(text: &str) -> Vec<f64> {
    let bytes = text.as_bytes();
    let mut values = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let mut j = i;
        if bytes[j] == b'-' || bytes[j] == b'+' {
            if i > 0 && bytes[i - 1].is_ascii_alphanumeric() {
                i += 1;
                continue;
            }
            j += 1;
        }

        let int_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        let int_digits = j - int_start;

        let mut frac_digits = 0;
        if j < bytes.len() && bytes[j] == b'.' {
            let mut k = j + 1;
            while k < bytes.len() && bytes[k].is_ascii_digit() {
                k += 1;
            }
            frac_digits = k - j - 1;
            if int_digits > 0 || frac_digits > 0 {
                j = k;
            }
        }

        if int_digits + frac_digits == 0 {
            i = start + 1;
            continue;
        }

        // Token is pure ASCII, so slicing on byte offsets is safe.
        if let Ok(v) = text[start..j].parse::<f64>() {
            values.push(v);
        }
        i = j;
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(tokenize_numbers("Ramp 10.00 °C/min to 200.00 °C"), vec![10.0, 200.0]);
        assert_eq!(tokenize_numbers("Equilibrate at -40.5 °C"), vec![-40.5]);
        assert_eq!(tokenize_numbers("Isothermal for .5 min"), vec![0.5]);
        assert!(tokenize_numbers("Mark end of cycle").is_empty());
        assert!(tokenize_numbers("").is_empty());
    }

    #[test]
    fn test_tokenize_hyphen_is_not_sign() {
        assert_eq!(tokenize_numbers("Data-2 storage on"), vec![2.0]);
        assert_eq!(tokenize_numbers("cool to -2.5"), vec![-2.5]);
        assert_eq!(tokenize_numbers("a - b"), Vec::<f64>::new());
    }

    #[test]
    fn test_simple_program() {
        let program = MethodProgram::parse(&["Equilibrate 40", "Ramp 10 to 200", "Mark"]);
        assert_eq!(program.steps.len(), 3);
        assert_eq!(program.cycles.len(), 1);
        assert_eq!(program.cycles[0].steps, vec![0, 1, 2]);
        assert!(program.trailing.is_empty());

        let ramp = &program.steps[1];
        assert_eq!(ramp.kind, StepKind::Ramp);
        assert!((ramp.start_temp - 40.0).abs() < 1e-12);
        assert!((ramp.end_temp - 200.0).abs() < 1e-12);
        assert!((ramp.gradient - 10.0).abs() < 1e-12);
        assert!((ramp.duration - 16.0).abs() < 1e-12);
        assert!(program.issues.is_empty());
    }

    #[test]
    fn test_cooling_ramp_has_negative_gradient() {
        let program = MethodProgram::parse(&[
            "Equilibrate at 200.00 °C",
            "Ramp 20.00 °C/min to -40.00 °C",
        ]);
        let ramp = &program.steps[1];
        assert!((ramp.gradient + 20.0).abs() < 1e-12);
        assert!((ramp.duration - 12.0).abs() < 1e-12);
        assert!(ramp.gradient.signum() == (ramp.end_temp - ramp.start_temp).signum());
    }

    #[test]
    fn test_isothermal_and_mark_keep_temperature() {
        let program = MethodProgram::parse(&[
            "Equilibrate at 50.00 °C",
            "Isothermal for 5.00 min",
            "Mark end of cycle 0",
        ]);
        assert_eq!(program.steps[1].kind, StepKind::Isothermal);
        assert!((program.steps[1].end_temp - 50.0).abs() < 1e-12);
        assert!((program.steps[1].duration - 5.0).abs() < 1e-12);
        assert!((program.steps[2].end_temp - 50.0).abs() < 1e-12);
        assert!((program.steps[2].duration).abs() < 1e-12);
    }

    #[test]
    fn test_cycles_match_marks() {
        let program = MethodProgram::parse(&[
            "Equilibrate at 40.00 °C",
            "Isothermal for 3.00 min",
            "Ramp 10.00 °C/min to 200.00 °C",
            "Mark end of cycle 1",
            "Isothermal for 2.00 min",
            "Ramp 10.00 °C/min to 40.00 °C",
            "Mark end of cycle 2",
            "Isothermal for 1.00 min",
            "Ramp 10.00 °C/min to 200.00 °C",
            "Mark end of cycle 3",
            "Equilibrate at 25.00 °C",
        ]);
        assert_eq!(program.cycles.len(), program.mark_count());
        assert_eq!(program.cycles.len(), 3);
        assert_eq!(program.cycles[1].number, 2);
        assert_eq!(program.cycles[1].steps, vec![4, 5, 6]);
        assert_eq!(program.trailing, vec![10]);

        let hold = program.cycles[1].opening_hold(&program.steps).unwrap();
        assert_eq!(hold.index, 4);
        assert!((program.cycles[1].duration(&program.steps) - 18.0).abs() < 1e-9);
        assert!((program.total_duration() - 3.0 - 16.0 - 18.0 - 17.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_line_degrades_to_noop() {
        let program = MethodProgram::parse(&[
            "Equilibrate at 40.00 °C",
            "Data storage on",
            "Ramp 10.00 °C/min to 100.00 °C",
        ]);
        assert_eq!(program.steps.len(), 3);
        assert_eq!(program.steps[1].kind, StepKind::NoOp);
        assert_eq!(program.steps[1].index, 1);
        assert!((program.steps[1].end_temp - 40.0).abs() < 1e-12);
        assert!((program.steps[2].duration - 6.0).abs() < 1e-12);
        assert!(matches!(program.issues[0], ParseError::UnknownStep { step: 1, .. }));
    }

    #[test]
    fn test_ramp_without_target_is_noop() {
        let program = MethodProgram::parse(&["Equilibrate at 40.00 °C", "Ramp 10.00 °C/min"]);
        assert_eq!(program.steps[1].kind, StepKind::NoOp);
        assert!((program.steps[1].duration).abs() < 1e-12);
        assert_eq!(
            program.issues,
            vec![ParseError::MissingValue {
                step: 1,
                kind: StepKind::Ramp,
                expected: 2,
                found: 1
            }]
        );
    }

    #[test]
    fn test_zero_gradient_ramp() {
        let program = MethodProgram::parse(&["Equilibrate at 40", "Ramp 0.00 °C/min to 100.00 °C"]);
        let ramp = &program.steps[1];
        assert_eq!(ramp.kind, StepKind::Ramp);
        assert!((ramp.end_temp - 100.0).abs() < 1e-12);
        assert!((ramp.duration).abs() < 1e-12);
        assert_eq!(program.issues, vec![ParseError::ZeroGradient { step: 1 }]);
    }

    #[test]
    fn test_opening_hold_ignores_holds_after_ramp() {
        let program = MethodProgram::parse(&[
            "Ramp 10 to 100",
            "Isothermal for 4 min",
            "Mark",
        ]);
        assert!(program.cycles[0].opening_hold(&program.steps).is_none());
    }
}
