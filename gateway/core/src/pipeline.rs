//! Pipeline Runner
//!
//! Steps are plain functions over an action. [`run`] executes them in order
//! and stops at the first failure, which lands in the action's error slot.
//! [`setup`] does the same at most once per action instance; streaming
//! sessions call it on every loop iteration.

use crate::action::Action;
use crate::error::ActionError;

/// One sequential unit of work
pub type Step<A> = fn(&mut A) -> Result<(), ActionError>;

/// Execute `steps` in order, skipping the rest once the error slot is set
pub fn run<A: Action>(action: &mut A, steps: &[Step<A>]) {
    for step in steps {
        if action.base().has_error() {
            return;
        }
        if let Err(err) = step(action) {
            action.base_mut().fail(err);
        }
    }
}

/// Like [`run`], but only the first call on an action does anything
pub fn setup<A: Action>(action: &mut A, steps: &[Step<A>]) {
    if action.base().is_setup() {
        return;
    }
    action.base_mut().mark_setup();
    run(action, steps);
}
