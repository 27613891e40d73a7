//! Resolved action order for one rule phase.

use super::{resolve, ActionCallDescriptor};
use crate::errors::CyclicDependencyError;
use sha2::{Digest, Sha256};

/// Action calls in the order they must run.
#[derive(Debug, Clone)]
pub struct OrderedActionPlan<T> {
    steps: Vec<T>,
}

impl<T> Default for OrderedActionPlan<T> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<T: AsRef<ActionCallDescriptor>> OrderedActionPlan<T> {
    /// Resolves the execution order of `items`.
    ///
    /// # Errors
    ///
    /// Returns `CyclicDependencyError` if the dependencies form a cycle.
    pub fn resolve(items: Vec<T>) -> Result<Self, CyclicDependencyError> {
        let steps = resolve(items)?;
        tracing::debug!(
            steps = steps.len(),
            order = ?steps.iter().map(|s| s.as_ref().name.as_str()).collect::<Vec<_>>(),
            "Resolved action plan"
        );
        Ok(Self { steps })
    }

    /// Iterates over the steps in execution order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.steps.iter()
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the step names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.as_ref().name.as_str()).collect()
    }

    /// Returns a short hash of the ordered descriptors.
    ///
    /// Two plans with the same fingerprint run the same declarations in the
    /// same order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let descriptors: Vec<&ActionCallDescriptor> =
            self.steps.iter().map(AsRef::as_ref).collect();
        let json = serde_json::to_string(&descriptors).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

impl<'a, T> IntoIterator for &'a OrderedActionPlan<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ActionCallDescriptor> {
        vec![
            ActionCallDescriptor::new("record").with_reads(["status"]),
            ActionCallDescriptor::new("capture").with_writes(["status"]),
        ]
    }

    #[test]
    fn test_plan_orders_steps() {
        let plan = OrderedActionPlan::resolve(sample()).unwrap();
        assert_eq!(plan.len(), 2);
        assert!(!plan.is_empty());
        assert_eq!(plan.names(), vec!["capture", "record"]);
    }

    #[test]
    fn test_fingerprint_is_order_independent_for_input() {
        let mut reversed = sample();
        reversed.reverse();

        let a = OrderedActionPlan::resolve(sample()).unwrap();
        let b = OrderedActionPlan::resolve(reversed).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);
    }

    #[test]
    fn test_fingerprint_changes_with_declarations() {
        let a = OrderedActionPlan::resolve(sample()).unwrap();
        let mut changed = sample();
        changed[0] = changed[0].clone().with_reads(["latency"]);
        let b = OrderedActionPlan::resolve(changed).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_empty_plan() {
        let plan: OrderedActionPlan<ActionCallDescriptor> = OrderedActionPlan::default();
        assert!(plan.is_empty());
        assert_eq!(plan.iter().count(), 0);
    }
}
