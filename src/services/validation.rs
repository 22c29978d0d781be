//! Assignment validation against experiment parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::domain::models::{Assignment, Parameter};

/// Mismatches between a trial's assignments and the experiment parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize)]
pub struct AssignmentError {
    /// Parameters with no assignment.
    pub unassigned: Vec<String>,
    /// Assignments naming no parameter.
    pub undefined: Vec<String>,
    pub out_of_bounds: Vec<String>,
    pub duplicated: Vec<String>,
}

impl AssignmentError {
    pub fn is_empty(&self) -> bool {
        self.unassigned.is_empty()
            && self.undefined.is_empty()
            && self.out_of_bounds.is_empty()
            && self.duplicated.is_empty()
    }
}

impl fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid assignments")?;
        let groups = [
            ("unassigned", &self.unassigned),
            ("undefined", &self.undefined),
            ("out of bounds", &self.out_of_bounds),
            ("duplicated", &self.duplicated),
        ];
        let mut sep = ": ";
        for (label, names) in groups {
            if !names.is_empty() {
                write!(f, "{sep}{label} [{}]", names.join(", "))?;
                sep = "; ";
            }
        }
        Ok(())
    }
}

/// Check that every parameter has exactly one in-bounds assignment.
pub fn validate_assignments(assignments: &[Assignment], parameters: &[Parameter]) -> Result<(), AssignmentError> {
    let mut report = AssignmentError::default();

    let mut by_name: BTreeMap<&str, i64> = BTreeMap::new();
    for a in assignments {
        if by_name.contains_key(a.name.as_str()) {
            if !report.duplicated.contains(&a.name) {
                report.duplicated.push(a.name.clone());
            }
        } else {
            by_name.insert(&a.name, a.value);
        }
    }

    for p in parameters {
        match by_name.remove(p.name.as_str()) {
            Some(value) if !p.contains(value) => report.out_of_bounds.push(p.name.clone()),
            Some(_) => {}
            None => report.unassigned.push(p.name.clone()),
        }
    }
    report.undefined = by_name.into_keys().map(str::to_string).collect();

    if report.is_empty() {
        Ok(())
    } else {
        Err(report)
    }
}
