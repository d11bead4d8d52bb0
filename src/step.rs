//! Step descriptors for the backup sequence.
//!
//! A step is configuration data, not code: the catalogue of valid step
//! names is fixed here, and the `[backup-sequences]` section is parsed
//! once at config load into structured [`Step`] values. Unknown names or
//! unknown flags fail at load time, never mid-run.

use std::fmt;
use std::str::FromStr;

use strum::{Display, EnumIter, EnumString};

use crate::error::{BackupError, Result};

/// The fixed catalogue of operations a sequence step can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum StepName {
    /// Acquire the exclusive run lock
    Lock,
    /// Release the run lock
    Unlock,
    /// Create a point-in-time snapshot of the source filesystem
    Snapshot,
    /// Export the snapshot into the intermediate directory
    ExportIntermediate,
    /// Prune intermediate artifacts per the lifecycle rule
    PruneIntermediate,
    /// Prune snapshots older than the retention threshold
    PruneSnapshots,
    /// Upload the intermediate artifact to the remote store
    Upload,
    /// Prune remote artifacts per the remote lifecycle rule
    PruneRemote,
}

/// A configured step: a catalogue name plus its parsed flags.
///
/// The only recognized flag is `-y`, which confirms destructive pruning
/// (without it, prune steps report candidates but destroy nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub name: StepName,
    pub yes: bool,
}

impl Step {
    pub fn new(name: StepName) -> Self {
        Self { name, yes: false }
    }

    pub fn confirmed(name: StepName) -> Self {
        Self { name, yes: true }
    }
}

impl FromStr for Step {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| BackupError::config("empty step in [backup-sequences]"))?;
        let name = StepName::from_str(name)
            .map_err(|_| BackupError::config(format!("unknown step name: {name}")))?;

        let mut yes = false;
        for flag in parts {
            match flag {
                "-y" => yes = true,
                other => {
                    return Err(BackupError::config(format!(
                        "unknown flag {other} for step {name}"
                    )))
                }
            }
        }

        Ok(Step { name, yes })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.yes {
            write!(f, "{} -y", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// The default sequence used when `[backup-sequences]` is absent.
pub fn default_sequence() -> Vec<Step> {
    vec![
        Step::new(StepName::Lock),
        Step::new(StepName::Snapshot),
        Step::new(StepName::ExportIntermediate),
        Step::confirmed(StepName::PruneIntermediate),
        Step::confirmed(StepName::PruneSnapshots),
        Step::new(StepName::Unlock),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_step_name_kebab_case() {
        assert_eq!(StepName::ExportIntermediate.to_string(), "export-intermediate");
        assert_eq!(StepName::PruneSnapshots.to_string(), "prune-snapshots");
        assert_eq!("lock".parse::<StepName>().unwrap(), StepName::Lock);
    }

    #[test]
    fn test_step_parse_with_flag() {
        let step: Step = "prune-intermediate -y".parse().unwrap();
        assert_eq!(step.name, StepName::PruneIntermediate);
        assert!(step.yes);

        let step: Step = "snapshot".parse().unwrap();
        assert_eq!(step.name, StepName::Snapshot);
        assert!(!step.yes);
    }

    #[test]
    fn test_step_parse_rejects_unknown_name() {
        assert!("reticulate-splines".parse::<Step>().is_err());
        assert!("".parse::<Step>().is_err());
    }

    #[test]
    fn test_step_parse_rejects_unknown_flag() {
        assert!("prune-snapshots --force".parse::<Step>().is_err());
    }

    #[test]
    fn test_step_display_roundtrip() {
        for name in StepName::iter() {
            let step = Step::confirmed(name);
            let parsed: Step = step.to_string().parse().unwrap();
            assert_eq!(step, parsed);
        }
    }

    #[test]
    fn test_default_sequence_order() {
        let names: Vec<StepName> = default_sequence().iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                StepName::Lock,
                StepName::Snapshot,
                StepName::ExportIntermediate,
                StepName::PruneIntermediate,
                StepName::PruneSnapshots,
                StepName::Unlock,
            ]
        );
    }
}
