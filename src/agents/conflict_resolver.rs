use crate::agents::package_manager::PackageManager;
use crate::agents::requirement::{Requirement, parse_diagnostic};
use crate::error::{DevupError, Result};
use colored::Colorize;
use std::collections::HashSet;
use tracing::{info, warn};

pub const DEFAULT_MAX_PASSES: u32 = 6;

/// A single upgrade that failed during a pass; never fatal on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeFailure {
    pub requirement: Requirement,
    pub reason: String,
}

/// What happened during one check-then-upgrade iteration
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub pass: u32,
    pub diagnostics: Vec<String>,
    pub attempted: Vec<Requirement>,
    pub failed: Vec<UpgradeFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// The check came back clean at the start of `pass`
    Converged { pass: u32 },
    /// Every pass found conflicts; `remaining` holds the last pass's requirements
    Exhausted { passes: u32, remaining: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct ResolutionReport {
    pub passes: Vec<PassReport>,
    pub outcome: ResolutionOutcome,
}

impl ResolutionReport {
    pub fn upgrade_attempts(&self) -> usize {
        self.passes.iter().map(|pass| pass.attempted.len()).sum()
    }

    pub fn upgrade_failures(&self) -> usize {
        self.passes.iter().map(|pass| pass.failed.len()).sum()
    }
}

/// ConflictResolver drives the installed package set toward consistency.
///
/// Each pass re-runs the consistency check, so requirements are always
/// derived from live state. Upgrades are never rolled back. The loop stops
/// after `max_passes` checks at most.
pub struct ConflictResolver<'a> {
    manager: &'a dyn PackageManager,
    max_passes: u32,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(manager: &'a dyn PackageManager, max_passes: u32) -> Result<Self> {
        if max_passes == 0 {
            return Err(DevupError::Config(
                "max_passes must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            manager,
            max_passes,
        })
    }

    /// Resolve conflicts, treating exhaustion of the pass ceiling as fatal
    pub fn resolve(&self) -> Result<ResolutionReport> {
        let report = self.run()?;
        match &report.outcome {
            ResolutionOutcome::Converged { .. } => Ok(report),
            ResolutionOutcome::Exhausted { passes, remaining } => {
                Err(DevupError::ResolutionExhausted {
                    passes: *passes,
                    remaining: remaining.clone(),
                })
            }
        }
    }

    /// Run the pass loop and report the outcome without judging it.
    ///
    /// Only checker failures and unrecognisable check output are errors here.
    pub fn run(&self) -> Result<ResolutionReport> {
        let mut passes = Vec::new();
        let mut remaining = Vec::new();

        for pass in 1..=self.max_passes {
            println!(
                "{}",
                format!("   Dependency resolution pass {pass}/{}...", self.max_passes).cyan()
            );
            info!(pass, "dependency resolution pass");

            let diagnostics = self.manager.check()?;
            if diagnostics.is_empty() {
                println!(
                    "   {}",
                    format!("✓ No dependency conflicts detected (pass {pass})").green()
                );
                info!(pass, "no dependency conflicts detected");
                passes.push(PassReport {
                    pass,
                    ..Default::default()
                });
                return Ok(ResolutionReport {
                    passes,
                    outcome: ResolutionOutcome::Converged { pass },
                });
            }

            let requirements = Self::extract_requirements(&diagnostics);
            if requirements.is_empty() {
                return Err(DevupError::UnrecognizedCheckOutput(diagnostics.join("\n")));
            }

            let mut report = PassReport {
                pass,
                diagnostics,
                ..Default::default()
            };

            for requirement in requirements {
                println!(
                    "   • Upgrading conflicting requirement: {}",
                    requirement.spec().bright_cyan()
                );
                info!(
                    pass,
                    package = %requirement.name,
                    constraint = %requirement.constraint,
                    "upgrading conflicting requirement"
                );

                if let Err(err) = self.manager.upgrade(requirement.spec()) {
                    warn!(pass, requirement = requirement.spec(), "failed to upgrade: {err}");
                    report.failed.push(UpgradeFailure {
                        requirement: requirement.clone(),
                        reason: err.to_string(),
                    });
                }
                report.attempted.push(requirement);
            }

            remaining = report
                .attempted
                .iter()
                .map(|requirement| requirement.spec().to_string())
                .collect();
            passes.push(report);
        }

        // Exhaustion is declared after the final pass's upgrade attempts
        Ok(ResolutionReport {
            passes,
            outcome: ResolutionOutcome::Exhausted {
                passes: self.max_passes,
                remaining,
            },
        })
    }

    /// Parse every diagnostic line, dropping non-matching lines and duplicates
    fn extract_requirements(diagnostics: &[String]) -> Vec<Requirement> {
        let mut seen = HashSet::new();
        diagnostics
            .iter()
            .filter_map(|line| parse_diagnostic(line).into_requirement())
            .filter(|requirement| seen.insert(requirement.spec().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{Call, ScriptedManager, conflict};

    fn persistent(passes: usize) -> Vec<Vec<String>> {
        (0..passes)
            .map(|_| vec![conflict("pkgA", "pkgB>=2.0")])
            .collect()
    }

    #[test]
    fn clean_environment_converges_without_upgrades() {
        let manager = ScriptedManager::new(Vec::<Vec<String>>::new());
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();

        let report = resolver.resolve().unwrap();

        assert_eq!(report.outcome, ResolutionOutcome::Converged { pass: 1 });
        assert_eq!(report.upgrade_attempts(), 0);
        assert_eq!(manager.calls(), vec![Call::Check]);
    }

    #[test]
    fn rerunning_on_converged_state_is_idempotent() {
        let manager = ScriptedManager::new(vec![vec![conflict("pkgA", "pkgB>=2.0")]]);
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();
        resolver.resolve().unwrap();
        let upgrades_before = manager.upgrades().len();

        let again = resolver.resolve().unwrap();

        assert_eq!(again.outcome, ResolutionOutcome::Converged { pass: 1 });
        assert_eq!(manager.upgrades().len(), upgrades_before);
    }

    #[test]
    fn cascading_conflicts_are_recomputed_each_pass() {
        let manager = ScriptedManager::new(vec![
            vec![conflict("pkgA", "pkgB>=2.0")],
            vec![conflict("pkgB", "pkgC<3")],
        ]);
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();

        let report = resolver.resolve().unwrap();

        assert_eq!(report.outcome, ResolutionOutcome::Converged { pass: 3 });
        assert_eq!(
            manager.calls(),
            vec![
                Call::Check,
                Call::Upgrade("pkgB>=2.0".into()),
                Call::Check,
                Call::Upgrade("pkgC<3".into()),
                Call::Check,
            ]
        );
        assert_eq!(report.passes[1].attempted.len(), 1);
        assert_eq!(report.passes[1].attempted[0].name, "pkgC");
    }

    #[test]
    fn exhaustion_is_fatal_after_the_last_pass() {
        let manager = ScriptedManager::new(persistent(DEFAULT_MAX_PASSES as usize));
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();

        let err = resolver.resolve().unwrap_err();

        match err {
            DevupError::ResolutionExhausted { passes, remaining } => {
                assert_eq!(passes, DEFAULT_MAX_PASSES);
                assert_eq!(remaining, vec!["pkgB>=2.0".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.check_count(), DEFAULT_MAX_PASSES as usize);
        assert_eq!(manager.upgrades().len(), DEFAULT_MAX_PASSES as usize);
    }

    #[test]
    fn never_checks_more_than_the_ceiling() {
        // More conflicted outputs scripted than the resolver may consume
        let manager = ScriptedManager::new(persistent(20));
        let resolver = ConflictResolver::new(&manager, 2).unwrap();

        let report = resolver.run().unwrap();

        assert_eq!(
            report.outcome,
            ResolutionOutcome::Exhausted {
                passes: 2,
                remaining: vec!["pkgB>=2.0".into()]
            }
        );
        assert_eq!(manager.check_count(), 2);
        assert_eq!(report.passes.len(), 2);
    }

    #[test]
    fn failed_upgrade_does_not_stop_the_pass() {
        let manager = ScriptedManager::new(vec![vec![
            conflict("pkgA", "pkgB>=2.0"),
            conflict("pkgA", "pkgC==1.1"),
        ]])
        .failing_upgrade("pkgB>=2.0");
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();

        let report = resolver.resolve().unwrap();

        assert_eq!(report.outcome, ResolutionOutcome::Converged { pass: 2 });
        assert_eq!(manager.upgrades(), vec!["pkgB>=2.0", "pkgC==1.1"]);
        assert_eq!(report.upgrade_failures(), 1);
        assert_eq!(report.passes[0].failed[0].requirement.name, "pkgB");
    }

    #[test]
    fn non_matching_lines_are_skipped() {
        let manager = ScriptedManager::new(vec![vec![
            "WARNING: something unrelated".to_string(),
            conflict("pkgA", "pkgB>=2.0"),
        ]]);
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();

        resolver.resolve().unwrap();

        assert_eq!(manager.upgrades(), vec!["pkgB>=2.0"]);
    }

    #[test]
    fn duplicate_requirements_are_upgraded_once_per_pass() {
        let manager = ScriptedManager::new(vec![vec![
            conflict("pkgA", "pkgB>=2.0"),
            conflict("pkgX", "pkgB>=2.0"),
        ]]);
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();

        resolver.resolve().unwrap();

        assert_eq!(manager.upgrades(), vec!["pkgB>=2.0"]);
    }

    #[test]
    fn unrecognised_output_fails_immediately() {
        let manager = ScriptedManager::new(vec![vec![
            "pkgA 1.0 requires pkgB, which is not installed.".to_string(),
        ]]);
        let resolver = ConflictResolver::new(&manager, DEFAULT_MAX_PASSES).unwrap();

        let err = resolver.resolve().unwrap_err();

        assert!(matches!(err, DevupError::UnrecognizedCheckOutput(_)));
        assert_eq!(manager.check_count(), 1);
        assert!(manager.upgrades().is_empty());
    }

    #[test]
    fn zero_passes_is_rejected() {
        let manager = ScriptedManager::default();
        assert!(matches!(
            ConflictResolver::new(&manager, 0),
            Err(DevupError::Config(_))
        ));
    }
}
