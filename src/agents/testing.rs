use crate::agents::package_manager::{OutdatedPackage, PackageManager};
use crate::error::{DevupError, Result};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Check,
    Upgrade(String),
}

/// Package manager fake that replays scripted `check` outputs.
///
/// Once the script runs out every further check reports a clean environment.
#[derive(Default)]
pub struct ScriptedManager {
    checks: RefCell<VecDeque<Vec<String>>>,
    failing: HashSet<String>,
    calls: RefCell<Vec<Call>>,
}

impl ScriptedManager {
    pub fn new<I, L>(checks: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: IntoIterator,
        L::Item: Into<String>,
    {
        Self {
            checks: RefCell::new(
                checks
                    .into_iter()
                    .map(|lines| lines.into_iter().map(Into::into).collect())
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn failing_upgrade(mut self, spec: &str) -> Self {
        self.failing.insert(spec.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn check_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| **call == Call::Check)
            .count()
    }

    pub fn upgrades(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Upgrade(spec) => Some(spec.clone()),
                Call::Check => None,
            })
            .collect()
    }
}

impl PackageManager for ScriptedManager {
    fn check(&self) -> Result<Vec<String>> {
        self.calls.borrow_mut().push(Call::Check);
        Ok(self.checks.borrow_mut().pop_front().unwrap_or_default())
    }

    fn upgrade(&self, spec: &str) -> Result<()> {
        self.calls.borrow_mut().push(Call::Upgrade(spec.to_string()));
        if self.failing.contains(spec) {
            return Err(DevupError::ToolUpgrade(format!("{spec}: no matching distribution")));
        }
        Ok(())
    }

    fn list_outdated(&self) -> Result<Vec<OutdatedPackage>> {
        Ok(Vec::new())
    }
}

/// A diagnostic line in the format `pip check` prints
pub fn conflict(owner: &str, spec: &str) -> String {
    format!("{owner} 1.0 has requirement {spec}, but you have something else installed.")
}
